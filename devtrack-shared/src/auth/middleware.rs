/// Authentication middleware for Axum
///
/// Runs on every request. Paths in the [`PublicPaths`] set pass straight
/// through. For everything else the middleware reads an
/// `Authorization: Bearer <token>` header, verifies it as an access token,
/// resolves the subject to an enabled credential record and inserts the
/// resulting [`Principal`] into the request extensions.
///
/// The middleware never rejects a request. Missing, malformed, expired or
/// mis-signed tokens, unknown subjects, disabled accounts and store errors
/// all leave the request anonymous; route guards decide whether anonymous
/// callers may proceed.
///
/// # Example
///
/// ```no_run
/// use axum::{middleware, routing::get, Router};
/// use devtrack_shared::auth::middleware::{authenticate, AuthState, PublicPaths};
/// use devtrack_shared::auth::token::{TokenService, TokenSettings};
/// use devtrack_shared::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tokens = Arc::new(TokenService::new(TokenSettings::new(
///     "k1",
///     "an-example-secret-that-is-32-bytes-or-more",
/// ))?);
/// let state = AuthState::new(tokens, Arc::new(MemoryStore::new()), PublicPaths::new(["/health"]));
///
/// let app: Router = Router::new()
///     .route("/health", get(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(state, authenticate));
/// # Ok(())
/// # }
/// ```

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::Principal;
use super::token::TokenService;
use crate::models::credential::FederationProvider;
use crate::store::CredentialStore;

/// Exact-match set of paths that skip token handling
#[derive(Debug, Clone, Default)]
pub struct PublicPaths {
    paths: HashSet<String>,
}

impl PublicPaths {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Health, login, registration, refresh and each provider's federation endpoints
    pub fn standard(providers: &[FederationProvider]) -> Self {
        let mut public = Self::new(["/health", "/login", "/register", "/token/refresh"]);
        for provider in providers {
            public.insert(format!("/federated/{}/start", provider.as_str()));
            public.insert(format!("/federated/{}/callback", provider.as_str()));
        }
        public
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

/// State shared by every invocation of [`authenticate`]
#[derive(Clone)]
pub struct AuthState {
    tokens: Arc<TokenService>,
    credentials: Arc<dyn CredentialStore>,
    public_paths: Arc<PublicPaths>,
}

impl AuthState {
    pub fn new<S>(tokens: Arc<TokenService>, credentials: Arc<S>, public_paths: PublicPaths) -> Self
    where
        S: CredentialStore + 'static,
    {
        Self {
            tokens,
            credentials,
            public_paths: Arc::new(public_paths),
        }
    }

    /// Resolves a bearer token to an enabled principal
    ///
    /// Returns `None` for every failure; the reason is logged at debug level
    /// (warn for store errors).
    pub async fn resolve(&self, token: &str) -> Option<Principal> {
        let claims = match self.tokens.verify_access(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(reason = %e, "Rejected bearer token");
                return None;
            }
        };

        let record = match self.credentials.find_by_username(claims.subject()).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Token subject has no credential record");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Credential lookup failed, continuing anonymously");
                return None;
            }
        };

        if !record.enabled {
            debug!(user_id = record.id, "Token subject is disabled");
            return None;
        }

        Some(Principal::from_record(&record))
    }
}

/// Extracts the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Global authentication middleware
///
/// Install with `axum::middleware::from_fn_with_state(auth_state, authenticate)`.
pub async fn authenticate(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    // A principal must only ever come from this middleware
    req.extensions_mut().remove::<Principal>();

    if state.public_paths.contains(req.uri().path()) {
        return next.run(req).await;
    }

    let principal = match bearer_token(req.headers()) {
        Some(token) => state.resolve(token).await,
        None => None,
    };

    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::context::SecurityContext;
    use crate::auth::token::{TokenKind, TokenSettings};
    use crate::models::credential::NewCredential;
    use crate::models::role::Role;
    use crate::store::memory::MemoryStore;
    use axum::{body::Body, http::{HeaderValue, Request as HttpRequest, StatusCode}, middleware, routing::get, Router};
    use chrono::Duration;
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    async fn setup() -> (Arc<TokenService>, Arc<MemoryStore>, i64) {
        let tokens = Arc::new(TokenService::new(TokenSettings::new("k1", SECRET)).unwrap());
        let store = Arc::new(MemoryStore::new());
        let created = store
            .create(
                NewCredential {
                    username: "alice".to_string(),
                    email: "alice@example.com".to_string(),
                    password_hash: String::new(),
                    roles: BTreeSet::from([Role::Developer]),
                    provider: FederationProvider::Local,
                    provider_id: None,
                    display_name: None,
                },
                None,
            )
            .await
            .unwrap();
        (tokens, store, created.credential.id)
    }

    fn app(state: AuthState) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|ctx: SecurityContext| async move {
                    ctx.principal()
                        .map(|p| p.username().to_string())
                        .unwrap_or_else(|| "anonymous".to_string())
                }),
            )
            .route("/health", get(|ctx: SecurityContext| async move {
                ctx.is_authenticated().to_string()
            }))
            .layer(middleware::from_fn_with_state(state, authenticate))
    }

    async fn call(app: Router, path: &str, auth: Option<String>) -> String {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_standard_public_paths() {
        let public = PublicPaths::standard(&[FederationProvider::Google]);

        assert!(public.contains("/login"));
        assert!(public.contains("/federated/google/start"));
        assert!(public.contains("/federated/google/callback"));
        assert!(!public.contains("/federated/github/start"));
        assert!(!public.contains("/login/"));
        assert!(!public.contains("/me"));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_principal() {
        let (tokens, store, _) = setup().await;
        let token = tokens.issue_pair("alice").unwrap().access_token;
        let app = app(AuthState::new(tokens, store, PublicPaths::standard(&[])));

        let body = call(app, "/whoami", Some(format!("Bearer {}", token))).await;
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn test_failures_leave_request_anonymous() {
        let (tokens, store, id) = setup().await;
        let state = AuthState::new(tokens.clone(), store.clone(), PublicPaths::standard(&[]));

        // No header
        assert_eq!(call(app(state.clone()), "/whoami", None).await, "anonymous");

        // Garbage
        let body = call(app(state.clone()), "/whoami", Some("Bearer nope".to_string())).await;
        assert_eq!(body, "anonymous");

        // Refresh token presented as access token
        let refresh = tokens.issue_pair("alice").unwrap().refresh_token;
        let body = call(app(state.clone()), "/whoami", Some(format!("Bearer {}", refresh))).await;
        assert_eq!(body, "anonymous");

        // Expired
        let expired = tokens.issue("alice", TokenKind::Access, Duration::zero()).unwrap();
        let body = call(app(state.clone()), "/whoami", Some(format!("Bearer {}", expired))).await;
        assert_eq!(body, "anonymous");

        // Unknown subject
        let ghost = tokens.issue_pair("ghost").unwrap().access_token;
        let body = call(app(state.clone()), "/whoami", Some(format!("Bearer {}", ghost))).await;
        assert_eq!(body, "anonymous");

        // Disabled account
        store.set_enabled(id, false).await.unwrap();
        let token = tokens.issue_pair("alice").unwrap().access_token;
        let body = call(app(state), "/whoami", Some(format!("Bearer {}", token))).await;
        assert_eq!(body, "anonymous");
    }

    #[tokio::test]
    async fn test_public_paths_skip_token_handling() {
        let (tokens, store, _) = setup().await;
        let token = tokens.issue_pair("alice").unwrap().access_token;
        let app = app(AuthState::new(tokens, store, PublicPaths::standard(&[])));

        let body = call(app, "/health", Some(format!("Bearer {}", token))).await;
        assert_eq!(body, "false");
    }
}
