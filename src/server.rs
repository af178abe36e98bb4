//! HTTP surface of the inference service.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt::Display;
use std::sync::Arc;

use log::*;

use crate::appctl::{AppCtl, JobRecord};
use crate::overflow::OverflowPool;
use crate::pipeline::{Prediction, Task};
use crate::registry::{ModelRegistry, ModelsLoaded};
use crate::{iso_timestamp, Error, INLINE_LIMIT};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub overflow: Arc<OverflowPool>,
    pub appctl: Arc<AppCtl>,
}

#[derive(Debug, Deserialize)]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchTextInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResult {
    pub result: serde_json::Value,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub message: &'static str,
    pub status: &'static str,
    pub models_loaded: ModelsLoaded,
}

/// Error body `{detail}`. Service failures are always 500 with the failing
/// operation as context, malformed request bodies keep their 4xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn internal(context: &str, error: impl Display) -> Self {
        let detail = format!("{}: {}", context, error);
        error!("{}", detail);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail,
        }
    }

    fn not_found(detail: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let detail = format!("Invalid request body: {}", rejection.body_text());
        warn!("{}", detail);
        Self {
            status: rejection.status(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.detail }));
        (self.status, body).into_response()
    }
}

/// `Json` extractor whose rejections keep axum's status but use the
/// `{detail}` body of every other error.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/sentiment", post(analyze_sentiment))
        .route("/classify", post(classify_text))
        .route("/ner", post(extract_entities))
        .route("/batch-sentiment", post(batch_analyze_sentiment))
        .route("/jobs/:id", get(job_status))
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        message: "MCP Server for YouTube Data Analysis",
        status: "running",
        models_loaded: state.registry.models_loaded(),
    })
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<TextInput>,
) -> Result<Json<AnalysisResult>, ApiError> {
    analyze_one(&state, Task::Sentiment, input.text)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("Error analyzing sentiment", e))
}

async fn classify_text(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<TextInput>,
) -> Result<Json<AnalysisResult>, ApiError> {
    analyze_one(&state, Task::Classification, input.text)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("Error classifying text", e))
}

async fn extract_entities(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<TextInput>,
) -> Result<Json<AnalysisResult>, ApiError> {
    analyze_one(&state, Task::Ner, input.text)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("Error extracting entities", e))
}

/// Answers the first `INLINE_LIMIT` texts right away. Larger batches are
/// also queued in full for the overflow pool; if it cannot take the job the
/// response goes out anyway, just without a `job_id`.
async fn batch_analyze_sentiment(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<BatchTextInput>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let context = "Error batch analyzing sentiment";
    let BatchTextInput { texts } = input;
    let inline: Vec<String> = texts.iter().take(INLINE_LIMIT).cloned().collect();

    let registry = state.registry.clone();
    let predictions = blocking(move || {
        let pipeline = registry.ensure_loaded(Task::Sentiment)?;
        if inline.is_empty() {
            return Ok(Vec::new());
        }
        pipeline.predict(&inline)
    })
    .await
    .map_err(|e| ApiError::internal(context, e))?;
    info!(
        "Batch sentiment analysis performed on {} texts",
        predictions.len()
    );

    let job_id = if texts.len() > INLINE_LIMIT {
        match state.overflow.submit(Task::Sentiment, texts) {
            Ok(id) => Some(id),
            Err(error) => {
                warn!("Full batch not scheduled: {}", error);
                None
            }
        }
    } else {
        None
    };

    let result = serde_json::to_value(predictions).map_err(|e| ApiError::internal(context, e))?;
    Ok(Json(AnalysisResult {
        result,
        timestamp: iso_timestamp(),
        job_id,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .appctl
        .job(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Unknown job: {}", id)))
}

async fn analyze_one(state: &AppState, task: Task, text: String) -> Result<AnalysisResult, Error> {
    let registry = state.registry.clone();
    let prediction: Prediction = blocking(move || {
        let pipeline = registry.ensure_loaded(task)?;
        pipeline
            .predict(&[text])?
            .pop()
            .ok_or_else(|| Error::Inference(format!("{} model returned nothing", task)))
    })
    .await?;
    info!("{} analysis performed", task);

    Ok(AnalysisResult {
        result: prediction.into_result()?,
        timestamp: iso_timestamp(),
        job_id: None,
    })
}

/// Model loading and inference block, keep them off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Inference(format!("inference task failed: {}", e)))?
}
