/// Request-scoped security context
///
/// The authentication middleware inserts a [`Principal`] into the request's
/// extensions when a valid bearer token resolves to an enabled account.
/// Handlers and guards read it back through the [`SecurityContext`]
/// extractor. Nothing here is shared between requests.
///
/// # Example
///
/// ```no_run
/// use devtrack_shared::auth::context::SecurityContext;
///
/// async fn handler(ctx: SecurityContext) -> String {
///     match ctx.principal() {
///         Some(principal) => format!("Hello, {}!", principal.username()),
///         None => "Hello, stranger!".to_string(),
///     }
/// }
/// ```

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::Serialize;
use std::collections::BTreeSet;
use std::convert::Infallible;

use super::policy::AuthzError;
use crate::models::{credential::CredentialRecord, role::Role};

/// The authenticated identity of a request
///
/// Immutable once constructed: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    id: i64,
    username: String,
    email: String,
    roles: BTreeSet<Role>,
    enabled: bool,
}

impl Principal {
    /// Builds a principal from a stored credential record
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            email: record.email.clone(),
            roles: record.roles.clone(),
            enabled: record.enabled,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether any held role grants unconditional project/task access
    pub fn is_privileged(&self) -> bool {
        self.roles.iter().any(Role::is_privileged)
    }
}

/// Per-request view of who the caller is
///
/// Extracting it never fails: anonymous requests get an empty context.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    principal: Option<Principal>,
}

impl SecurityContext {
    /// Context with no authenticated caller
    pub fn anonymous() -> Self {
        Self { principal: None }
    }

    /// Context for an authenticated caller
    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// The caller's roles (empty when anonymous)
    pub fn roles(&self) -> BTreeSet<Role> {
        self.principal
            .as_ref()
            .map(|p| p.roles().clone())
            .unwrap_or_default()
    }

    /// The principal, or `Unauthenticated` for anonymous callers
    pub fn require(&self) -> Result<&Principal, AuthzError> {
        self.principal.as_ref().ok_or(AuthzError::Unauthenticated)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SecurityContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            principal: parts.extensions.get::<Principal>().cloned(),
        })
    }
}

/// Extractor that rejects anonymous callers with 401
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthzError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Authenticated)
            .ok_or(AuthzError::Unauthenticated)
    }
}
