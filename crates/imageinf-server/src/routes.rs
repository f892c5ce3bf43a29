//! HTTP routes and handlers

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::AuthError;
use crate::state::AppState;
use imageinf_core::{Error, FileReference, InferenceResponse, ModelMetadata, Principal, Sensitivity, TuningParams};
use imageinf_pipeline::{JobRequest, JobState, JobStatus};
use imageinf_retrieval::TOKEN_HEADER;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let inference = Router::new()
        .route("/models", get(list_models))
        .route("/jobs", post(submit_job))
        .route("/jobs/sync", post(run_sync))
        .route("/jobs/:job_id", get(get_job));

    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(render_metrics))
        .nest("/inference", inference)
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

async fn fallback() -> Response {
    AppError::NotFound("Not Found".to_string()).into_response()
}

/// The authenticated caller, extracted from `X-Tapis-Token`
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        let principal = state.auth.authenticate(token).await?;
        Ok(Self(principal))
    }
}

/// Inference request body shared by the sync and async endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    #[serde(default = "default_inference_type")]
    pub inference_type: String,

    pub files: Vec<FileReference>,

    #[serde(default)]
    pub model: Option<String>,

    /// Zero-shot candidate labels
    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// Zero-shot sensitivity preset
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
}

fn default_inference_type() -> String {
    "classification".to_string()
}

impl InferenceRequest {
    /// Validate against the registry and build a job for `principal`
    fn into_job(self, principal: Principal, state: &AppState) -> Result<JobRequest, AppError> {
        if self.inference_type != "classification" {
            return Err(AppError::BadRequest(format!(
                "Unsupported inferenceType '{}'",
                self.inference_type
            )));
        }

        if let Some(labels) = &self.labels {
            if labels.is_empty() || labels.iter().any(|l| l.trim().is_empty()) {
                return Err(AppError::BadRequest("labels must be non-empty strings".to_string()));
            }
        }

        let model = self
            .model
            .unwrap_or_else(|| state.config.default_model.clone());
        if !state.registry.contains(&model) {
            return Err(Error::UnknownModel(model).into());
        }

        Ok(JobRequest {
            files: self.files,
            principal,
            model,
            tuning: TuningParams {
                labels: self.labels,
                sensitivity: self.sensitivity,
            },
        })
    }
}

async fn list_models(
    State(state): State<AppState>,
    Authenticated(_principal): Authenticated,
) -> Json<Vec<ModelMetadata>> {
    metrics::counter!("imageinf_requests_total", "endpoint" => "models").increment(1);
    Json(state.registry.list())
}

async fn run_sync(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<InferenceResponse>, AppError> {
    metrics::counter!("imageinf_requests_total", "endpoint" => "sync").increment(1);
    let Json(request) = payload?;

    let max = state.config.sync.max_files;
    if request.files.len() > max {
        return Err(Error::TooManyFiles {
            count: request.files.len(),
            max,
        }
        .into());
    }

    let job = request.into_job(principal, &state)?;
    info!(user = %job.principal.username, model = %job.model, files = job.files.len(), "Synchronous inference");

    let response = state.jobs.run_sync(job, state.config.sync_timeout()).await?;
    Ok(Json(response))
}

async fn submit_job(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    metrics::counter!("imageinf_requests_total", "endpoint" => "submit").increment(1);
    let Json(request) = payload?;

    let job = request.into_job(principal, &state)?;
    info!(user = %job.principal.username, model = %job.model, files = job.files.len(), "Submitting inference job");

    let job_id = state.jobs.submit(job)?;
    let body = json!({ "jobId": job_id, "status": JobState::Pending });
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

async fn get_job(
    State(state): State<AppState>,
    Authenticated(_principal): Authenticated,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    metrics::counter!("imageinf_requests_total", "endpoint" => "poll").increment(1);
    Ok(Json(state.jobs.poll(&job_id)?))
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Inference(Error),
    BadRequest(String),
    NotFound(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Inference(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    fn status_and_detail(self) -> (StatusCode, String) {
        match self {
            AppError::Auth(AuthError::Internal(msg)) => {
                error!(error = %msg, "Authentication error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Auth(err) => (StatusCode::UNAUTHORIZED, err.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Inference(err) => {
                let status = match &err {
                    e if e.is_client_error() => StatusCode::BAD_REQUEST,
                    Error::JobNotFound(_) => StatusCode::NOT_FOUND,
                    Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    Error::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    warn!(error = %err, "Inference request failed");
                }
                (status, err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
