use serde::Deserialize;

/// Global application configuration loaded from environment variables.
///
/// Built once at process start and passed into each component — business
/// logic never reads the environment directly.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// OneSignal application identifier
    pub onesignal_app_id: String,

    /// OneSignal REST API key (sent as `Authorization: Basic <key>`)
    pub onesignal_api_key: String,

    /// Base URL of the OneSignal REST API (overridable for tests)
    pub onesignal_api_url: String,

    /// Maximum number of due notifications drained per pass (default: 50)
    pub drain_batch_size: i64,

    /// Interval between drain passes in seconds, used by the drain binary
    /// (default: 60)
    pub drain_interval_secs: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// TCP port for the API server (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            onesignal_app_id: std::env::var("ONESIGNAL_APP_ID").map_err(|_| {
                anyhow::anyhow!("ONESIGNAL_APP_ID environment variable is required")
            })?,
            onesignal_api_key: std::env::var("ONESIGNAL_REST_API_KEY").map_err(|_| {
                anyhow::anyhow!("ONESIGNAL_REST_API_KEY environment variable is required")
            })?,
            onesignal_api_url: std::env::var("ONESIGNAL_API_URL")
                .unwrap_or_else(|_| "https://onesignal.com/api/v1".to_string()),
            drain_batch_size: std::env::var("DRAIN_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DRAIN_BATCH_SIZE must be a valid i64"))?,
            drain_interval_secs: std::env::var("DRAIN_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DRAIN_INTERVAL_SECS must be a valid u64"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
        })
    }
}
