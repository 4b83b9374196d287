/// Current principal and user administration
///
/// # Endpoints
///
/// - `GET /me` - The authenticated caller
/// - `PUT /users/:id/roles` - Replace a user's roles (Manage User)
/// - `PUT /users/:id/enabled` - Enable or disable a user (Manage User)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};
use axum::{
    extract::{Path, State},
    Json,
};
use devtrack_shared::{
    auth::context::{Authenticated, Principal},
    models::{credential::CredentialRecord, role::Role},
    store::CredentialStore,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::info;

/// Role replacement request
#[derive(Debug, Deserialize)]
pub struct SetRolesRequest {
    pub roles: Vec<String>,
}

/// Status change request
#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Returns the caller's principal; 401 when anonymous
pub async fn me(Authenticated(principal): Authenticated) -> Json<Principal> {
    Json(principal)
}

/// Replaces a user's role set
///
/// # Errors
///
/// - `404 Not Found`: No such user
/// - `422 Unprocessable Entity`: Empty list or a name outside the role enumeration
pub async fn set_roles(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
    Json(req): Json<SetRolesRequest>,
) -> ApiResult<Json<CredentialRecord>> {
    let roles = req
        .roles
        .iter()
        .map(|name| name.parse::<Role>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(|e| ApiError::ValidationError(vec![ValidationErrorDetail::new("roles", e.to_string())]))?;

    if roles.is_empty() {
        return Err(ApiError::ValidationError(vec![ValidationErrorDetail::new(
            "roles",
            "At least one role is required",
        )]));
    }

    let record = state
        .store
        .set_roles(id, &roles)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    info!(
        user_id = id,
        changed_by = caller.id(),
        roles = ?record.roles,
        "User roles updated"
    );
    Ok(Json(record))
}

/// Enables or disables a user
///
/// Disabled users stop authenticating immediately: their outstanding
/// tokens resolve to anonymous.
pub async fn set_enabled(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
    Json(req): Json<SetEnabledRequest>,
) -> ApiResult<Json<CredentialRecord>> {
    let record = state
        .store
        .set_enabled(id, req.enabled)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    info!(user_id = id, changed_by = caller.id(), enabled = req.enabled, "User status updated");
    Ok(Json(record))
}
