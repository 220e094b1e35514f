//! Steeple API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use steeple_common::config::AppConfig;
use steeple_common::db::create_pool;
use steeple_dispatch::provider::PushClient;

use steeple_api::routes::create_router;
use steeple_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("steeple_api=debug,steeple_dispatch=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Steeple API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Push provider client
    let push = PushClient::new(&config)?;

    // Build application state
    let port = config.api_port;
    let state = AppState::new(pool, push, config);

    // Build router (the permissive CORS layer also answers OPTIONS preflight)
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
