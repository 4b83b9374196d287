/// Route guards
///
/// A guard names the `(Operation, ResourceKind)` a route needs and runs the
/// policy engine before the handler. Install it with `route_layer` so the
/// matched path parameters are available:
///
/// ```no_run
/// use axum::{middleware, routing::get, Router};
/// use devtrack_api::middleware::guard::{authorize, Guard};
/// use devtrack_shared::auth::policy::{Operation, PolicyEngine};
/// use devtrack_shared::models::task::ResourceKind;
/// use devtrack_shared::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// let policy = PolicyEngine::new(Arc::new(MemoryStore::new()));
/// let app: Router = Router::new()
///     .route("/projects/:id", get(|| async { "project" }))
///     .route_layer(middleware::from_fn_with_state(
///         Guard::new(policy, Operation::View, ResourceKind::Project),
///         authorize,
///     ));
/// ```
///
/// The resource id is the route's `:id` path parameter. Routes without one
/// (such as `/developers`) evaluate with no id; a non-numeric id is a 400.

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use devtrack_shared::{
    auth::{
        context::SecurityContext,
        policy::{Operation, PolicyEngine},
    },
    models::task::ResourceKind,
};

use std::collections::HashMap;

use crate::error::ApiError;

/// Guard state: the policy engine plus what the route requires
#[derive(Clone)]
pub struct Guard {
    policy: PolicyEngine,
    operation: Operation,
    kind: ResourceKind,
}

impl Guard {
    pub fn new(policy: PolicyEngine, operation: Operation, kind: ResourceKind) -> Self {
        Self {
            policy,
            operation,
            kind,
        }
    }
}

/// Guard middleware; answers 401/403 itself, otherwise runs the handler
pub async fn authorize(
    State(guard): State<Guard>,
    ctx: SecurityContext,
    params: Option<Path<HashMap<String, String>>>,
    req: Request,
    next: Next,
) -> Response {
    let raw_id = params.as_ref().and_then(|Path(params)| params.get("id"));
    let resource_id = match raw_id.map(|raw| raw.parse::<i64>()) {
        None => None,
        Some(Ok(id)) => Some(id),
        Some(Err(_)) => {
            return ApiError::BadRequest("Resource id must be an integer".to_string()).into_response()
        }
    };

    match guard
        .policy
        .check(&ctx, guard.operation, guard.kind, resource_id)
        .await
    {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
