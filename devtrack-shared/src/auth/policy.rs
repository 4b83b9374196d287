/// Authorization policy engine
///
/// Access decisions are made by named predicates over a [`Principal`] and an
/// optional resource id. Route guards do not call predicates directly: they
/// name an `(Operation, ResourceKind)` pair, and the permission table maps it
/// to the predicate that decides.
///
/// # Permission Table
///
/// | Operation | Resource  | Predicate                   |
/// |-----------|-----------|-----------------------------|
/// | View      | Project   | `can_access_project`        |
/// | View      | Task      | `can_access_task`           |
/// | Modify    | Project   | `can_modify_project`        |
/// | Modify    | Task      | `can_modify_task`           |
/// | View      | Developer | `can_view_all_developers`   |
/// | Manage    | User      | `can_manage_users`          |
/// | View      | AuditLog  | `can_view_audit_logs`       |
///
/// Pairs missing from the table are denied.
///
/// # Role Semantics
///
/// Roles are OR-combined. Administrator and manager grant project/task
/// access outright; any other held role falls through to its own check
/// (assignment for developers, explicit grants for contractors). Anonymous
/// callers, disabled principals, missing assignments and store failures all
/// evaluate to `false`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::{Principal, SecurityContext};
use crate::models::{role::Role, task::ResourceKind};
use crate::store::{DeveloperStore, GrantStore, ResourceStore, StoreResult};

/// Error type for authorization checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// No authenticated caller
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller is authenticated but the predicate refused
    #[error("Access denied")]
    AccessDenied,
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AuthzError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AuthzError::AccessDenied => (StatusCode::FORBIDDEN, "access_denied"),
        };
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// What the caller wants to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Read a resource or listing
    View,

    /// Change a resource
    Modify,

    /// Administer a resource kind
    Manage,
}

/// Named authorization predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    AccessProject,
    AccessTask,
    ModifyProject,
    ModifyTask,
    ViewAllDevelopers,
    ManageUsers,
    ViewAuditLogs,
}

/// `(operation, resource kind) -> predicate`
pub const PERMISSION_TABLE: [(Operation, ResourceKind, Permission); 7] = [
    (Operation::View, ResourceKind::Project, Permission::AccessProject),
    (Operation::View, ResourceKind::Task, Permission::AccessTask),
    (Operation::Modify, ResourceKind::Project, Permission::ModifyProject),
    (Operation::Modify, ResourceKind::Task, Permission::ModifyTask),
    (Operation::View, ResourceKind::Developer, Permission::ViewAllDevelopers),
    (Operation::Manage, ResourceKind::User, Permission::ManageUsers),
    (Operation::View, ResourceKind::AuditLog, Permission::ViewAuditLogs),
];

impl Permission {
    /// Looks up the predicate for an operation on a resource kind
    pub fn lookup(operation: Operation, kind: ResourceKind) -> Option<Permission> {
        PERMISSION_TABLE
            .iter()
            .find(|(op, k, _)| *op == operation && *k == kind)
            .map(|(_, _, permission)| *permission)
    }

    /// Whether the predicate is scoped to a single resource id
    pub fn needs_resource_id(&self) -> bool {
        matches!(
            self,
            Permission::AccessProject
                | Permission::AccessTask
                | Permission::ModifyProject
                | Permission::ModifyTask
        )
    }
}

/// Evaluates permissions against the ownership and grant stores
#[derive(Clone)]
pub struct PolicyEngine {
    resources: Arc<dyn ResourceStore>,
    developers: Arc<dyn DeveloperStore>,
    grants: Arc<dyn GrantStore>,
}

impl PolicyEngine {
    /// Builds an engine over a store implementing every lookup it needs
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: ResourceStore + DeveloperStore + GrantStore + 'static,
    {
        Self {
            resources: store.clone(),
            developers: store.clone(),
            grants: store,
        }
    }

    /// Guard entry point: resolves the permission and evaluates it
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` when the context carries no principal
    /// - `AccessDenied` when the predicate (or the table) refuses
    pub async fn check(
        &self,
        ctx: &SecurityContext,
        operation: Operation,
        kind: ResourceKind,
        resource_id: Option<i64>,
    ) -> Result<(), AuthzError> {
        let principal = ctx.require()?;

        let allowed = match Permission::lookup(operation, kind) {
            Some(permission) => self.evaluate(Some(principal), permission, resource_id).await,
            None => false,
        };

        if allowed {
            Ok(())
        } else {
            debug!(
                user_id = principal.id(),
                operation = ?operation,
                resource = kind.as_str(),
                resource_id = ?resource_id,
                "Access denied"
            );
            Err(AuthzError::AccessDenied)
        }
    }

    /// Evaluates one permission; never fails
    pub async fn evaluate(
        &self,
        principal: Option<&Principal>,
        permission: Permission,
        resource_id: Option<i64>,
    ) -> bool {
        let Some(principal) = principal.filter(|p| p.enabled()) else {
            return false;
        };

        if permission.needs_resource_id() && resource_id.is_none() {
            return false;
        }
        let id = resource_id.unwrap_or_default();

        match permission {
            Permission::AccessProject => self.can_access_project(principal, id).await,
            Permission::AccessTask => self.can_access_task(principal, id).await,
            Permission::ModifyProject => self.can_modify_project(principal, id).await,
            Permission::ModifyTask => self.can_modify_task(principal, id).await,
            Permission::ViewAllDevelopers => self.can_view_all_developers(principal),
            Permission::ManageUsers => self.can_manage_users(principal),
            Permission::ViewAuditLogs => self.can_view_audit_logs(principal),
        }
    }

    pub async fn can_access_project(&self, principal: &Principal, project_id: i64) -> bool {
        if principal.is_privileged() {
            return true;
        }
        if principal.has_role(Role::Developer) && self.is_assigned_in_project(principal, project_id).await {
            return true;
        }
        if principal.has_role(Role::Contractor)
            && self.has_grant(principal, ResourceKind::Project, project_id).await
        {
            return true;
        }
        false
    }

    pub async fn can_access_task(&self, principal: &Principal, task_id: i64) -> bool {
        if principal.is_privileged() {
            return true;
        }
        if principal.has_role(Role::Developer) && self.is_assigned_to_task(principal, task_id).await {
            return true;
        }
        if principal.has_role(Role::Contractor) && self.contractor_can_read_task(principal, task_id).await {
            return true;
        }
        false
    }

    /// Administrators and managers only
    pub async fn can_modify_project(&self, principal: &Principal, _project_id: i64) -> bool {
        principal.is_privileged()
    }

    /// Contractor grants are read-only and never reach here
    pub async fn can_modify_task(&self, principal: &Principal, task_id: i64) -> bool {
        if principal.is_privileged() {
            return true;
        }
        principal.has_role(Role::Developer) && self.is_assigned_to_task(principal, task_id).await
    }

    pub fn can_view_all_developers(&self, principal: &Principal) -> bool {
        principal.is_privileged()
    }

    pub fn can_manage_users(&self, principal: &Principal) -> bool {
        principal.is_privileged()
    }

    pub fn can_view_audit_logs(&self, principal: &Principal) -> bool {
        principal.is_privileged()
    }

    /// Developer profile linked to the caller's credential
    async fn caller_developer_id(&self, principal: &Principal) -> Option<i64> {
        allow_on_error(
            self.developers.find_developer_by_credential(principal.id()).await,
            "developer profile",
        )
        .flatten()
        .map(|developer| developer.id)
    }

    async fn is_assigned_to_task(&self, principal: &Principal, task_id: i64) -> bool {
        let Some(assignee) =
            allow_on_error(self.resources.task_assignee(task_id).await, "task assignee").flatten()
        else {
            return false;
        };

        self.caller_developer_id(principal).await == Some(assignee)
    }

    async fn is_assigned_in_project(&self, principal: &Principal, project_id: i64) -> bool {
        let Some(developer_id) = self.caller_developer_id(principal).await else {
            return false;
        };

        allow_on_error(
            self.resources.project_assignees(project_id).await,
            "project assignees",
        )
        .map(|assignees| assignees.contains(&developer_id))
        .unwrap_or(false)
    }

    /// A grant on the task or on its project
    async fn contractor_can_read_task(&self, principal: &Principal, task_id: i64) -> bool {
        if self.has_grant(principal, ResourceKind::Task, task_id).await {
            return true;
        }

        match allow_on_error(self.resources.find_task(task_id).await, "task").flatten() {
            Some(task) => {
                self.has_grant(principal, ResourceKind::Project, task.project_id)
                    .await
            }
            None => false,
        }
    }

    async fn has_grant(&self, principal: &Principal, kind: ResourceKind, resource_id: i64) -> bool {
        allow_on_error(
            self.grants.has_grant(principal.id(), kind, resource_id).await,
            "resource grant",
        )
        .unwrap_or(false)
    }
}

/// Logs a lookup failure and turns it into `None`
fn allow_on_error<T>(result: StoreResult<T>, lookup: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(lookup, error = %e, "Policy lookup failed, denying");
            None
        }
    }
}
