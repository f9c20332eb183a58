//! `vitalog serve` -- HTTP JSON API over the analysis and trend pipelines.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional API key authentication via VITALOG_API_KEY
//! - Request body size limit
//!
//! Endpoints:
//! - GET    /health                              - Server status (exempt from auth)
//! - POST   /observations                        - Submit an observation
//! - GET    /observations?subject=..             - List a subject's observations, newest first
//! - GET    /observations/{id}                   - One observation with its analysis view
//! - PATCH  /observations/{id}/attributes        - Merge attributes
//! - DELETE /observations/{id}                   - Delete an observation
//! - POST   /observations/{id}/analysis          - Start analysis (fire-and-forget)
//! - GET    /observations/{id}/analysis          - Poll the analysis view
//! - POST   /observations/{id}/analysis/dismiss  - Acknowledge and delete a rejection
//! - POST   /trends                              - Trend report for a date range
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use vitalog_pipeline::{Clock, SystemClock};

use self::handlers::{
    handle_create_observation, handle_delete_observation, handle_dismiss_rejection,
    handle_get_analysis, handle_get_observation, handle_health, handle_list_observations,
    handle_not_found, handle_trends, handle_trigger_analysis, handle_update_attributes,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::commands::open_pipeline;
use crate::config::AppConfig;

/// Maximum request body size: 1 MB. Images are referenced, never uploaded here.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/observations",
            post(handle_create_observation).get(handle_list_observations),
        )
        .route(
            "/observations/{id}",
            get(handle_get_observation).delete(handle_delete_observation),
        )
        .route(
            "/observations/{id}/attributes",
            axum::routing::patch(handle_update_attributes),
        )
        .route(
            "/observations/{id}/analysis",
            post(handle_trigger_analysis).get(handle_get_analysis),
        )
        .route(
            "/observations/{id}/analysis/dismiss",
            post(handle_dismiss_rejection),
        )
        .route("/trends", post(handle_trends))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Open the database, build the pipeline, and serve until Ctrl+C.
pub(crate) async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = open_pipeline(&config, clock.clone())?;

    let api_key = config.server.api_key.clone().filter(|k| !k.is_empty());
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    tracing::info!(
        rate_limit = config.server.rate_limit,
        database = %config.storage.database.display(),
        "rate limit is per minute per IP"
    );

    let state = Arc::new(AppState {
        pipeline,
        clock,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        api_key,
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("vitalog listening on http://{addr}");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(e) => {
            tracing::error!(error = %e, "failed to install Ctrl+C handler; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
