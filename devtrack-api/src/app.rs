/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use devtrack_api::{app::AppState, config::Config};
/// use devtrack_shared::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let providers = config.identity_providers()?;
/// let state = AppState::new(config, Arc::new(MemoryStore::new()), providers)?;
/// let app = devtrack_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::guard::{authorize, Guard},
    routes,
};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use devtrack_shared::{
    auth::{
        credentials::CredentialAuthenticator,
        federation::{provider::IdentityProvider, FederationOrchestrator},
        middleware::{authenticate, AuthState, PublicPaths},
        policy::{Operation, PolicyEngine},
        token::TokenService,
    },
    models::task::ResourceKind,
    store::Store,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,

    /// Token signing and verification
    pub tokens: Arc<TokenService>,

    /// Local login and registration
    pub credentials: CredentialAuthenticator,

    /// Federated login handshake
    pub federation: Arc<FederationOrchestrator>,

    /// Authorization predicates
    pub policy: PolicyEngine,

    /// Persistence collaborators
    pub store: Arc<dyn Store>,

    /// Set when the store is PostgreSQL-backed, for health reporting
    pub db: Option<PgPool>,

    auth: AuthState,
}

impl AppState {
    /// Wires every component over one store
    ///
    /// # Errors
    ///
    /// Fails when the token configuration is invalid.
    pub fn new<S>(
        config: Config,
        store: Arc<S>,
        providers: Vec<Arc<dyn IdentityProvider>>,
    ) -> anyhow::Result<Self>
    where
        S: Store + 'static,
    {
        let tokens = Arc::new(TokenService::new(config.token_settings())?);

        let federation = providers.into_iter().fold(
            FederationOrchestrator::new(config.federation_settings(), tokens.clone(), store.clone()),
            |orchestrator, provider| orchestrator.with_provider(provider),
        );

        let auth = AuthState::new(
            tokens.clone(),
            store.clone(),
            PublicPaths::standard(&federation.providers()),
        );

        Ok(Self {
            config: Arc::new(config),
            tokens,
            credentials: CredentialAuthenticator::new(store.clone()),
            federation: Arc::new(federation),
            policy: PolicyEngine::new(store.clone()),
            store,
            db: None,
            auth,
        })
    }

    /// Records the pool behind a PostgreSQL store
    pub fn with_database(mut self, pool: PgPool) -> Self {
        self.db = Some(pool);
        self
    }

    fn guard(&self, operation: Operation, kind: ResourceKind) -> Guard {
        Guard::new(self.policy.clone(), operation, kind)
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET  /health                        # public
/// ├── POST /login                         # public
/// ├── POST /register                      # public
/// ├── POST /token/refresh                 # public
/// ├── GET  /federated/:provider/start     # public
/// ├── GET  /federated/:provider/callback  # public
/// ├── GET  /me                            # authenticated
/// ├── GET  /projects/:id                  # View Project
/// ├── GET  /tasks/:id                     # View Task
/// ├── PUT  /tasks/:id/status              # Modify Task
/// ├── GET  /developers                    # View Developer
/// ├── PUT  /users/:id/roles               # Manage User
/// └── PUT  /users/:id/enabled             # Manage User
/// ```
///
/// # Middleware Stack
///
/// Applied in order (outermost first):
/// 1. CORS (tower-http CorsLayer)
/// 2. Logging (tower-http TraceLayer)
/// 3. Authentication (global; never rejects)
/// 4. Authorization guards (per route)
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/login", post(routes::auth::login))
        .route("/register", post(routes::auth::register))
        .route("/token/refresh", post(routes::auth::refresh))
        .route("/federated/:provider/start", get(routes::federated::start))
        .route("/federated/:provider/callback", get(routes::federated::callback));

    let account_routes = Router::new().route("/me", get(routes::users::me));

    let project_routes = Router::new()
        .route("/projects/:id", get(routes::resources::get_project))
        .route_layer(middleware::from_fn_with_state(
            state.guard(Operation::View, ResourceKind::Project),
            authorize,
        ));

    let task_view_routes = Router::new()
        .route("/tasks/:id", get(routes::resources::get_task))
        .route_layer(middleware::from_fn_with_state(
            state.guard(Operation::View, ResourceKind::Task),
            authorize,
        ));

    let task_modify_routes = Router::new()
        .route("/tasks/:id/status", put(routes::resources::update_task_status))
        .route_layer(middleware::from_fn_with_state(
            state.guard(Operation::Modify, ResourceKind::Task),
            authorize,
        ));

    let developer_routes = Router::new()
        .route("/developers", get(routes::resources::list_developers))
        .route_layer(middleware::from_fn_with_state(
            state.guard(Operation::View, ResourceKind::Developer),
            authorize,
        ));

    let user_admin_routes = Router::new()
        .route("/users/:id/roles", put(routes::users::set_roles))
        .route("/users/:id/enabled", put(routes::users::set_enabled))
        .route_layer(middleware::from_fn_with_state(
            state.guard(Operation::Manage, ResourceKind::User),
            authorize,
        ));

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|origin| origin == "*") {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(project_routes)
        .merge(task_view_routes)
        .merge(task_modify_routes)
        .merge(developer_routes)
        .merge(user_admin_routes)
        .layer(middleware::from_fn_with_state(state.auth.clone(), authenticate))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
