//! # DevTrack API Server
//!
//! Login, registration, token refresh and federated login for the DevTrack
//! project-tracking backend, with guarded project/task routes.
//!
//! ## Usage
//!
//! ```bash
//! STORE_BACKEND=memory JWT_SECRET=$(openssl rand -hex 32) cargo run -p devtrack-api
//! ```

use devtrack_api::{
    app::{build_router, AppState},
    config::{Config, StoreBackend},
};
use devtrack_shared::{
    db::{
        migrations::run_migrations,
        pool::{create_pool, DatabaseConfig},
    },
    store::{memory::MemoryStore, postgres::PgStore, Store},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devtrack_api=debug,devtrack_shared=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "DevTrack API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            serve(config, Arc::new(MemoryStore::new()), None).await
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

            let pool = create_pool(DatabaseConfig {
                url,
                max_connections: config.database.max_connections,
                ..Default::default()
            })
            .await?;
            run_migrations(&pool).await?;

            serve(config, Arc::new(PgStore::new(pool.clone())), Some(pool)).await
        }
    }
}

async fn serve<S>(config: Config, store: Arc<S>, pool: Option<PgPool>) -> anyhow::Result<()>
where
    S: Store + 'static,
{
    let bind_address = config.bind_address();
    let providers = config.identity_providers()?;

    let mut state = AppState::new(config, store, providers)?;
    if let Some(pool) = pool.clone() {
        state = state.with_database(pool);
    }
    tracing::info!(providers = ?state.federation.providers(), "Federated login providers configured");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received, exiting...");
        })
        .await?;

    if let Some(pool) = pool {
        devtrack_shared::db::pool::close_pool(pool).await;
    }

    Ok(())
}
