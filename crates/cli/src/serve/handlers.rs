//! HTTP route handlers: health, observations, analysis, trends.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use time::OffsetDateTime;
use vitalog_pipeline::{AnalysisContext, Dismissal, Language, PipelineError, SummaryContext};
use vitalog_storage::{NewObservation, ObservationId, ObservationStore, StorageError, SubjectId};

use super::json_error;
use super::state::AppState;
use crate::commands::parse_day;
use crate::views::ObservationView;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "vitalog_version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

fn storage_error(e: &StorageError) -> Response {
    let status = match e {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::Conflict { .. } => StatusCode::CONFLICT,
        StorageError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        StorageError::Backend(_) => {
            tracing::error!(error = %e, "storage backend error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, &e.to_string()).into_response()
}

fn pipeline_error(e: &PipelineError) -> Response {
    match e {
        PipelineError::Storage(inner) => storage_error(inner),
        PipelineError::InvalidRange { .. } => {
            json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response()
        }
        PipelineError::Join(_) => {
            tracing::error!(error = %e, "analysis task failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}

fn bad_request(rejection: impl std::fmt::Display) -> Response {
    json_error(StatusCode::BAD_REQUEST, &rejection.to_string()).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateObservation {
    subject: String,
    image_ref: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    observed_at: Option<OffsetDateTime>,
}

/// POST /observations
pub(crate) async fn handle_create_observation(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateObservation>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    if body.subject.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "'subject' must not be empty").into_response();
    }
    if body.image_ref.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "'image_ref' must not be empty")
            .into_response();
    }

    let now = state.clock.now();
    let created = state
        .pipeline
        .store
        .create(NewObservation {
            subject: SubjectId::new(body.subject),
            image_ref: body.image_ref,
            attributes: body.attributes,
            observed_at: body.observed_at.unwrap_or(now),
            submitted_at: now,
        })
        .await;
    match created {
        Ok(record) => {
            tracing::info!(id = %record.id, subject = %record.subject, "observation created");
            (
                StatusCode::CREATED,
                Json(ObservationView::new(record, &state.pipeline.reader)),
            )
                .into_response()
        }
        Err(e) => storage_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    subject: String,
}

/// GET /observations?subject=..
pub(crate) async fn handle_list_observations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection),
    };
    match state
        .pipeline
        .store
        .list_by_subject(&SubjectId::new(query.subject))
        .await
    {
        Ok(records) => {
            let views: Vec<ObservationView> = records
                .into_iter()
                .map(|r| ObservationView::new(r, &state.pipeline.reader))
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "observations": views }))).into_response()
        }
        Err(e) => storage_error(&e),
    }
}

/// GET /observations/{id}
pub(crate) async fn handle_get_observation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.pipeline.store.get(ObservationId(id)).await {
        Ok(record) => (
            StatusCode::OK,
            Json(ObservationView::new(record, &state.pipeline.reader)),
        )
            .into_response(),
        Err(e) => storage_error(&e),
    }
}

/// PATCH /observations/{id}/attributes
pub(crate) async fn handle_update_attributes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    body: Result<Json<serde_json::Map<String, serde_json::Value>>, JsonRejection>,
) -> Response {
    let Json(patch) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    match state
        .pipeline
        .store
        .update_attributes(ObservationId(id), patch)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ObservationView::new(record, &state.pipeline.reader)),
        )
            .into_response(),
        Err(e) => storage_error(&e),
    }
}

/// DELETE /observations/{id}
pub(crate) async fn handle_delete_observation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.pipeline.store.delete(ObservationId(id)).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "deleted": id }))).into_response(),
        Err(e) => storage_error(&e),
    }
}

/// POST /observations/{id}/analysis
///
/// Checks the observation exists, then starts an attempt in the background
/// and answers immediately. Clients poll `GET .../analysis` for the outcome.
pub(crate) async fn handle_trigger_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Response {
    let context: AnalysisContext = if body.iter().all(u8::is_ascii_whitespace) {
        AnalysisContext::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(context) => context,
            Err(e) => return bad_request(format!("invalid analysis request: {e}")),
        }
    };

    let id = ObservationId(id);
    let record = match state.pipeline.store.get(id).await {
        Ok(record) => record,
        Err(e) => return storage_error(&e),
    };
    // Detached; the coordinator logs any storage failure on the task itself.
    let _ = state.pipeline.coordinator.spawn(id, context);

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "id": id,
            "analysis": state.pipeline.reader.read(&record),
        })),
    )
        .into_response()
}

/// GET /observations/{id}/analysis
pub(crate) async fn handle_get_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.pipeline.store.get(ObservationId(id)).await {
        Ok(record) => (StatusCode::OK, Json(state.pipeline.reader.read(&record))).into_response(),
        Err(e) => storage_error(&e),
    }
}

/// POST /observations/{id}/analysis/dismiss
pub(crate) async fn handle_dismiss_rejection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state
        .pipeline
        .coordinator
        .dismiss_rejection(ObservationId(id))
        .await
    {
        Ok(Dismissal::Deleted) => {
            (StatusCode::OK, Json(serde_json::json!({ "deleted": id }))).into_response()
        }
        Ok(Dismissal::NotRejected) => json_error(
            StatusCode::CONFLICT,
            &format!("observation {id} is not rejected"),
        )
        .into_response(),
        Err(e) => pipeline_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrendRequest {
    subject: String,
    start: String,
    end: String,
    #[serde(default)]
    language: Language,
}

/// POST /trends
pub(crate) async fn handle_trends(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TrendRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    let (start, end) = match (parse_day(&body.start), parse_day(&body.end)) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(e), _) | (_, Err(e)) => return bad_request(e),
    };
    let context = SummaryContext {
        language: body.language,
        period_label: String::new(),
    };
    match state
        .pipeline
        .trends
        .report(&SubjectId::new(body.subject), start, end, &context)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => pipeline_error(&e),
    }
}
