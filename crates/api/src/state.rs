//! Shared application state for the Axum API server.

use sqlx::PgPool;

use steeple_common::config::AppConfig;
use steeple_dispatch::provider::PushClient;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub push: PushClient,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(pool: PgPool, push: PushClient, config: AppConfig) -> Self {
        Self { pool, push, config }
    }
}
