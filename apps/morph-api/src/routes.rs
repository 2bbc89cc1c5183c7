use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use morph_kernel::{
    BatchProgressView, CompletedBatch, GenerationProgress, MorphKernel, SessionImage,
    SessionResult,
};
use morph_protocol::{AssetRef, MorphError, RunId, SessionId};
use morph_providers::ProviderDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub kernel: MorphKernel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    #[serde(default)]
    asset_ref: String,
    original_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    success: bool,
    session_id: SessionId,
    asset_ref: AssetRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    session_id: SessionId,
    #[serde(default)]
    prompt: String,
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGenerateRequest {
    session_id: SessionId,
    #[serde(default)]
    prompt: String,
    provider: Option<String>,
    iterations: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartedResponse {
    success: bool,
    session_id: SessionId,
    run_id: RunId,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MorphError> for ApiError {
    fn from(error: MorphError) -> Self {
        let status = match &error {
            MorphError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            MorphError::AlreadyGenerating(_) => StatusCode::CONFLICT,
            MorphError::NoProvidersConfigured => StatusCode::SERVICE_UNAVAILABLE,
            error if error.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(%error, "request failed");
        }
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/providers", get(list_providers))
        .route("/api/sessions", post(create_session))
        .route("/api/image/{session_id}", get(session_image))
        .route("/api/generate", post(start_generation))
        .route("/api/progress/{session_id}", get(progress))
        .route("/api/batch-generate", post(start_batch))
        .route("/api/batch-progress/{session_id}", get(batch_progress))
        .route("/api/result/{session_id}", get(result))
        .route("/api/session/{session_id}", delete(delete_session))
        .route("/api/completed-batches", get(completed_batches))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "morph-api"
    }))
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderDescriptor>> {
    Json(state.kernel.providers())
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let session = state
        .kernel
        .create_session(AssetRef::new(request.asset_ref), request.original_name)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            success: true,
            session_id: session.id,
            asset_ref: session.source.asset_ref,
        }),
    ))
}

async fn session_image(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SessionImage>> {
    Ok(Json(state.kernel.session_image(&SessionId::new(session_id))?))
}

async fn start_generation(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<StartedResponse>)> {
    let run_id = state.kernel.start_generation(
        &request.session_id,
        &request.prompt,
        request.provider.as_deref(),
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            success: true,
            session_id: request.session_id,
            run_id,
            status: "generating",
            iterations: None,
        }),
    ))
}

async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchGenerateRequest>,
) -> ApiResult<(StatusCode, Json<StartedResponse>)> {
    let max = state.kernel.policy().max_iterations;
    let iterations = u32::try_from(request.iterations).map_err(|_| {
        ApiError::bad_request(format!(
            "iterations must be between 1 and {max}, got {}",
            request.iterations
        ))
    })?;
    let run_id = state.kernel.start_batch(
        &request.session_id,
        &request.prompt,
        request.provider.as_deref(),
        iterations,
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            success: true,
            session_id: request.session_id,
            run_id,
            status: "batch-generating",
            iterations: Some(iterations),
        }),
    ))
}

async fn progress(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<GenerationProgress>> {
    Ok(Json(state.kernel.progress(&SessionId::new(session_id))?))
}

async fn batch_progress(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<BatchProgressView>> {
    Ok(Json(
        state
            .kernel
            .batch_progress(&SessionId::new(session_id))?,
    ))
}

async fn result(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SessionResult>> {
    Ok(Json(state.kernel.result(&SessionId::new(session_id))?))
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .kernel
        .delete_session(&SessionId::new(session_id))?;
    Ok(Json(json!({ "success": true })))
}

async fn completed_batches(State(state): State<AppState>) -> Json<Vec<CompletedBatch>> {
    Json(state.kernel.completed_batches())
}
