use std::env;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    /// Account whose planner this process serves. Supplied by the sign-in flow.
    pub user_id: Uuid,
    pub data_dir: PathBuf,

    // Remote document store; unset means local-only mode
    pub remote_store_url: Option<String>,
    pub remote_store_token: Option<String>,
    pub remote_batch_limit: usize,
    pub request_timeout_secs: u64,

    pub holiday_api_url: String,
    pub holiday_api_key: Option<String>,

    pub sync_retry_delay_secs: u64,
    pub sync_max_retries: u32,

    pub regen_chunk_size: usize,
    pub regen_chunk_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".into()),

            user_id: env::var("PLANNER_USER_ID")
                .expect("PLANNER_USER_ID must be set")
                .parse()
                .expect("PLANNER_USER_ID must be a UUID"),
            data_dir: env::var("PLANNER_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),

            remote_store_url: env::var("REMOTE_STORE_URL").ok().filter(|s| !s.is_empty()),
            remote_store_token: env::var("REMOTE_STORE_TOKEN").ok().filter(|s| !s.is_empty()),
            remote_batch_limit: env::var("REMOTE_BATCH_LIMIT")
                .unwrap_or_else(|_| "499".into())
                .parse()
                .unwrap_or(499),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),

            holiday_api_url: env::var("HOLIDAY_API_URL").unwrap_or_else(|_| {
                "https://apis.data.go.kr/B090041/openapi/service/SpcdeInfoService/getRestDeInfo"
                    .into()
            }),
            holiday_api_key: env::var("HOLIDAY_API_KEY").ok().filter(|s| !s.is_empty()),

            sync_retry_delay_secs: env::var("SYNC_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "60".into())
                .parse()
                .unwrap_or(60),
            sync_max_retries: env::var("SYNC_MAX_RETRIES")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .unwrap_or(3),

            regen_chunk_size: env::var("REGEN_CHUNK_SIZE")
                .unwrap_or_else(|_| "100".into())
                .parse()
                .unwrap_or(100),
            regen_chunk_delay_ms: env::var("REGEN_CHUNK_DELAY_MS")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
