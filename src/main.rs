use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod error;
mod handlers;
mod models;
mod services;
mod store;

use config::Config;
use services::holidays::{HolidayCache, HolidayService, HolidaySource, PublicHolidayApi};
use services::planner::Planner;
use services::regeneration::RegenerationSettings;
use services::sync::{spawn_sync_worker, SyncReconciler, SyncSettings, SystemClock};
use store::http_remote::HttpRemoteStore;
use store::local::{FileStore, LocalStore, Namespaced};
use store::remote::RemoteStore;

const HOLIDAY_CACHE_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub planner: Arc<Planner>,
    pub sync: Arc<SyncReconciler>,
    pub holidays: Arc<HolidayService>,
    pub ws_tx: broadcast::Sender<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planner_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Local store, scoped to the signed-in account
    let file_store: Arc<dyn LocalStore> = Arc::new(
        FileStore::open(&config.data_dir).expect("Failed to open local planner store"),
    );
    let account_store: Arc<dyn LocalStore> =
        Arc::new(Namespaced::new(file_store.clone(), config.user_id));

    // Holiday lookups; without an API key every day is a regular day
    let holiday_source: Option<Arc<dyn HolidaySource>> = match &config.holiday_api_key {
        Some(key) => Some(Arc::new(
            PublicHolidayApi::new(&config.holiday_api_url, key, config.request_timeout())
                .expect("Failed to build holiday API client"),
        )),
        None => {
            tracing::warn!("HOLIDAY_API_KEY not set; holiday exclusion disabled");
            None
        }
    };
    let holidays = Arc::new(HolidayService::new(
        holiday_source,
        HolidayCache::new(
            Some(file_store.clone()),
            chrono::Duration::days(HOLIDAY_CACHE_DAYS),
        ),
    ));

    // Remote document store; unset means local-only mode
    let remote: Option<Arc<dyn RemoteStore>> = match &config.remote_store_url {
        Some(url) => Some(Arc::new(
            HttpRemoteStore::new(url, config.remote_store_token.clone(), config.request_timeout())
                .expect("Failed to build remote store client"),
        )),
        None => {
            tracing::warn!("REMOTE_STORE_URL not set; running local-only");
            None
        }
    };

    // Event channel shared by the planner, the sync layer and /ws clients
    let (ws_tx, _) = broadcast::channel::<String>(256);

    let planner = Planner::load(
        account_store.clone(),
        holidays.clone(),
        ws_tx.clone(),
        RegenerationSettings {
            chunk_size: config.regen_chunk_size,
            chunk_delay: Duration::from_millis(config.regen_chunk_delay_ms),
        },
    );
    let sync = SyncReconciler::new(
        config.user_id,
        planner.clone(),
        remote,
        account_store,
        SyncSettings {
            retry_delay: Duration::from_secs(config.sync_retry_delay_secs),
            max_retries: config.sync_max_retries,
            batch_limit: config.remote_batch_limit,
        },
        ws_tx.clone(),
        Arc::new(SystemClock),
    );

    let state = AppState {
        config: config.clone(),
        planner: planner.clone(),
        sync: sync.clone(),
        holidays,
        ws_tx,
    };

    // Bring derived todos up to date, then reconcile with the remote store
    planner.request_regeneration();
    {
        let sync = sync.clone();
        tokio::spawn(async move {
            match sync.on_sign_in().await {
                Ok(outcome) => tracing::info!(outcome = ?outcome, "Initial sync finished"),
                Err(e) => tracing::warn!(error = %e, "Initial sync failed; continuing with local data"),
            }
        });
    }
    spawn_sync_worker(sync);

    let app = router(state).layer(cors_layer(&config));

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app).await.expect("Server error");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/ws", get(handlers::ws::ws_handler))
        // Goals
        .route(
            "/api/goals",
            get(handlers::goals::list_goals).post(handlers::goals::create_goal),
        )
        .route(
            "/api/goals/:id",
            get(handlers::goals::get_goal)
                .put(handlers::goals::update_goal)
                .delete(handlers::goals::delete_goal),
        )
        .route("/api/goals/:id/summary", get(handlers::goals::goal_summary))
        // Todos
        .route(
            "/api/todos",
            get(handlers::todos::list_todos).post(handlers::todos::create_todo),
        )
        .route(
            "/api/todos/:id",
            put(handlers::todos::update_todo).delete(handlers::todos::delete_todo),
        )
        .route("/api/todos/:id/toggle", post(handlers::todos::toggle_todo))
        .route(
            "/api/completed-tasks",
            get(handlers::todos::list_completed_tasks),
        )
        // Diary
        .route(
            "/api/diary",
            get(handlers::diary::list_diary_entries).post(handlers::diary::upsert_diary_entry),
        )
        .route(
            "/api/diary/:id",
            put(handlers::diary::update_diary_entry).delete(handlers::diary::delete_diary_entry),
        )
        // Holidays
        .route("/api/holidays/:year", get(handlers::holidays::list_holidays))
        .route(
            "/api/holidays/refresh",
            post(handlers::holidays::refresh_holidays),
        )
        // Sync
        .route("/api/sync/status", get(handlers::sync::sync_status))
        .route("/api/sync/retry", post(handlers::sync::retry_sync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let mut origins: Vec<axum::http::HeaderValue> = Vec::new();
    match config.frontend_url.parse::<axum::http::HeaderValue>() {
        Ok(origin) => origins.push(origin),
        Err(_) => tracing::warn!(url = %config.frontend_url, "Ignoring invalid FRONTEND_URL"),
    }
    // In dev, also allow LAN access (e.g. testing from another device)
    if let Ok(extra) = std::env::var("CORS_EXTRA_ORIGINS") {
        for o in extra.split(',') {
            if let Ok(hv) = o.trim().parse::<axum::http::HeaderValue>() {
                origins.push(hv);
            }
        }
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::store::local::MemoryStore;
    use crate::store::memory_remote::MemoryRemoteStore;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:5173".into(),
            user_id: Uuid::new_v4(),
            data_dir: std::env::temp_dir(),
            remote_store_url: None,
            remote_store_token: None,
            remote_batch_limit: 499,
            request_timeout_secs: 5,
            holiday_api_url: String::new(),
            holiday_api_key: None,
            sync_retry_delay_secs: 60,
            sync_max_retries: 3,
            regen_chunk_size: 100,
            regen_chunk_delay_ms: 0,
        }
    }

    fn test_state(remote: Option<Arc<dyn RemoteStore>>) -> AppState {
        let config = Arc::new(test_config());
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let (ws_tx, _) = broadcast::channel(256);
        let holidays = Arc::new(HolidayService::new(
            None,
            HolidayCache::new(None, chrono::Duration::days(HOLIDAY_CACHE_DAYS)),
        ));
        let planner = Planner::load(
            store.clone(),
            holidays.clone(),
            ws_tx.clone(),
            RegenerationSettings {
                chunk_size: 100,
                chunk_delay: Duration::ZERO,
            },
        );
        let sync = SyncReconciler::new(
            config.user_id,
            planner.clone(),
            remote,
            store,
            SyncSettings::default(),
            ws_tx.clone(),
            Arc::new(SystemClock),
        );
        AppState {
            config,
            planner,
            sync,
            holidays,
            ws_tx,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn weekly_goal() -> Value {
        json!({
            "title": "Gym",
            "type": "weekly",
            "scheduledTime": "09:00",
            "weeklyDays": [1, 3, 5],
            "startDate": "2025-01-01",
            "endDate": "2025-01-14",
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(test_state(None));
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, "GET", "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["remote_store"], "local_only");
    }

    #[tokio::test]
    async fn test_goal_creation_expands_todos() {
        let state = test_state(None);
        let app = router(state.clone());

        let (status, goal) = send(&app, "POST", "/api/goals", Some(weekly_goal())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(goal["type"], "weekly");
        state.planner.regeneration_settled().await;

        let (status, todos) = send(
            &app,
            "GET",
            "/api/todos?startDate=2025-01-01&endDate=2025-01-14",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let dates: Vec<&str> = todos
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["scheduledDate"].as_str().unwrap())
            .collect();
        assert_eq!(
            dates,
            vec!["2025-01-01", "2025-01-03", "2025-01-06", "2025-01-08", "2025-01-10", "2025-01-13"]
        );

        let id = goal["id"].as_str().unwrap();
        let (status, summary) = send(&app, "GET", &format!("/api/goals/{id}/summary"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["planned"], 6);
        assert!(summary["workingDays"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_goal_is_rejected() {
        let app = router(test_state(None));
        let mut body = weekly_goal();
        body["weeklyDays"] = json!([]);
        let (status, err) = send(&app, "POST", "/api/goals", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err["error"]["code"], 422);

        let mut body = weekly_goal();
        body["endDate"] = json!("2024-12-31");
        let (status, _) = send(&app, "POST", "/api/goals", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_toggle_records_completed_task() {
        let state = test_state(None);
        let app = router(state.clone());
        send(&app, "POST", "/api/goals", Some(weekly_goal())).await;
        state.planner.regeneration_settled().await;

        let (_, todos) = send(&app, "GET", "/api/todos", None).await;
        let id = todos[0]["id"].as_str().unwrap().to_string();

        let (status, todo) = send(&app, "POST", &format!("/api/todos/{id}/toggle"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(todo["isCompleted"], true);
        assert!(todo["actualCompletionTime"].is_string());

        let (_, tasks) = send(&app, "GET", "/api/completed-tasks", None).await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["id"], json!(id));

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/todos/{id}"),
            Some(json!({ "scheduledDate": "2025-02-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_diary_upsert_and_limits() {
        let app = router(test_state(None));
        let (status, first) = send(
            &app,
            "POST",
            "/api/diary",
            Some(json!({ "date": "2025-03-01", "content": "rainy" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = send(
            &app,
            "POST",
            "/api/diary",
            Some(json!({ "date": "2025-03-01", "content": "sunny later" })),
        )
        .await;
        assert_eq!(first["id"], second["id"]);

        let (status, _) = send(
            &app,
            "POST",
            "/api/diary",
            Some(json!({ "date": "2025-03-02", "content": "x".repeat(501) })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, entries) = send(&app, "GET", "/api/diary?startDate=2025-03-01", None).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["content"], "sunny later");
    }

    #[tokio::test]
    async fn test_holidays_without_api_key_are_empty() {
        let app = router(test_state(None));
        let (status, body) = send(&app, "GET", "/api/holidays/2025", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = send(&app, "GET", "/api/holidays/99999", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(&app, "POST", "/api/holidays/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], true);
    }

    #[tokio::test]
    async fn test_missing_records_are_404() {
        let app = router(test_state(None));
        let id = Uuid::new_v4();
        let (status, _) = send(&app, "POST", &format!("/api/todos/{id}/toggle"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/api/goals/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_retry_pushes_and_reports() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let state = test_state(Some(remote.clone()));
        let app = router(state);

        send(
            &app,
            "POST",
            "/api/todos",
            Some(json!({ "title": "Taxes", "scheduledDate": "2025-04-10", "scheduledTime": "10:00" })),
        )
        .await;

        let (status, body) = send(&app, "POST", "/api/sync/retry", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["outcome"], "pushed");
        assert_eq!(body["status"]["mirrored"], true);

        let (_, status_body) = send(&app, "GET", "/api/sync/status", None).await;
        assert_eq!(status_body["status"], "success");
        assert_eq!(
            remote.count(crate::store::remote::Collection::Todos).await,
            1
        );
    }

    #[tokio::test]
    async fn test_sync_retry_surfaces_quota_errors() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote
            .set_failure(Some(crate::store::remote::RemoteError::Status {
                status: 429,
                message: "Quota exceeded".into(),
            }))
            .await;
        let app = router(test_state(Some(remote)));
        send(
            &app,
            "POST",
            "/api/todos",
            Some(json!({ "title": "Taxes", "scheduledDate": "2025-04-10", "scheduledTime": "10:00" })),
        )
        .await;

        let (status, _) = send(&app, "POST", "/api/sync/retry", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, body) = send(&app, "GET", "/api/sync/status", None).await;
        assert_eq!(body["quotaExceeded"], true);
        assert_eq!(body["status"], "error");
    }
}
