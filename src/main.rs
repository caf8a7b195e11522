mod catalog;
mod directory;
mod idempotency;
mod import;
mod metrics;
mod models;
mod normalize;
mod notify;
mod push;
mod query;
mod tasks;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::ListingStore;
use directory::StaticDirectory;
use import::Importer;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ImportResponse, SearchResponse};
use notify::InMemoryNotificationLog;
use push::{NoopPush, PushGateway, RestPushClient};
use query::SearchParams;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tasks::FanoutRunner;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "autolist.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let store = ListingStore::from_env();
    let directory = Arc::new(StaticDirectory::from_env());
    let importer = Importer::new(store.clone(), directory);

    let sink = Arc::new(InMemoryNotificationLog::new());
    let push: Arc<dyn PushGateway> = match RestPushClient::from_env() {
        Some(client) => Arc::new(client),
        None => Arc::new(NoopPush),
    };
    let (runner, _worker) = FanoutRunner::spawn(sink, push);

    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        store,
        importer,
        runner,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/cars/import", post(import_cars))
        .route("/cars", get(search_cars))
        .route("/cars/{id}", get(car_details))
        .route("/brands", get(brands))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "autolist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: ListingStore,
    importer: Importer,
    runner: FanoutRunner,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, ImportResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "autolist-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::InvalidInput("unauthorized".to_string()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Autolist API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Import a batch of scraped car records.
///
/// - Method: `POST`
/// - Path: `/cars/import`
/// - Body: `{ "cars": [ ...raw records... ] }`
/// - Response: `ImportResponse`
///
/// Invalid records are dropped, not fatal. Notification fan-out is queued to
/// the background worker; the response never waits for it. An
/// `Idempotency-Key` header replays the stored response for a repeated batch.
async fn import_cars(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<ImportResponse>, AppError> {
    crate::metrics::inc_requests("/cars/import");
    let Some(cars) = payload.get("cars").and_then(|value| value.as_array()) else {
        return Err(AppError::InvalidInput("Invalid format".to_string()));
    };
    info!(
        target = "autolist.api",
        records = cars.len(),
        "import invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let (response, batch) = state.importer.run(cars).await;
            idempotency::redis_set(client, &key, &response, idempotency::ttl_from_env()).await;
            state.runner.enqueue(batch).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let (response, batch) = state.importer.run(cars).await;
        state.idempotency.lock().await.insert(key, response.clone());
        state.runner.enqueue(batch).await;
        return Ok(Json(response));
    }

    let (response, batch) = state.importer.run(cars).await;
    state.runner.enqueue(batch).await;
    Ok(Json(response))
}

/// Search the catalog.
///
/// - Method: `GET`
/// - Path: `/cars`
/// - Query: filters, pagination, `sort`, `q`, `initial`/`full`
/// - Response: `SearchResponse` with the card projection
async fn search_cars(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    crate::metrics::inc_requests("/cars");
    let plan = query::build_plan(&params, state.store.text_search_enabled())
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;
    Ok(Json(query::execute(&state.store, &plan).await))
}

async fn car_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/cars/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidInput("Invalid Car ID".to_string()));
    };
    match state.store.get(uuid).await {
        Some(listing) => Ok(Json(json!({
            "success": true,
            "message": "Car details fetched successfully",
            "data": listing,
        }))),
        None => Err(AppError::NotFound("Car not found".to_string())),
    }
}

/// Distinct brands ordered by listing volume.
async fn brands(State(state): State<AppState>) -> Json<serde_json::Value> {
    crate::metrics::inc_requests("/brands");
    let data = state.store.brand_counts().await;
    Json(json!({
        "success": true,
        "message": "Car brands fetched successfully",
        "total": data.len(),
        "data": data,
    }))
}

#[derive(Debug)]
enum AppError {
    InvalidInput(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        (status, Json(ApiError::new(message))).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
