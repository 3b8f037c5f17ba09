//! Core library for fitcheck.  This module wires together the HTTP surface,
//! the upload staging and resize step, and the analyzer that talks to the
//! vision provider.

mod config;
pub mod analyzer;
pub mod imaging;
pub mod metrics;
pub mod presets;
pub mod staging;

pub use config::{AppConfig, DEFAULT_MAX_UPLOAD_BYTES};

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::analyzer::{AnalyzeError, GeminiProvider};
use crate::imaging::TransformError;
use crate::metrics::{Metrics, Outcome};
use crate::staging::StagedUpload;

pub use crate::analyzer::{AnalysisResult, Analyzer, ProviderError, ResponseError, VisionProvider};
pub use crate::presets::{Preset, PresetTable};

/// Multipart field carrying the photo.
pub const IMAGE_FIELD: &str = "image";
/// Optional multipart field selecting the preset.
pub const PRESET_FIELD: &str = "preset_id";

/// Room for multipart boundaries, part headers and the preset field on top of
/// the file size cap.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Every way an `/analyze` call can fail.  The handler is the only place that
/// turns these into HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("image file is required")]
    NoFile,
    #[error("only image uploads are accepted (got {0})")]
    NotAnImage(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::NotAnImage(_) | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Staging(_) | ApiError::Transform(_) | ApiError::Analyze(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoFile => "no_file",
            ApiError::NotAnImage(_) => "unsupported_media_type",
            ApiError::TooLarge { .. } => "payload_too_large",
            ApiError::Multipart(_) => "invalid_multipart",
            ApiError::Staging(_) => "staging_failed",
            ApiError::Transform(_) => "image_processing_failed",
            ApiError::Analyze(AnalyzeError::Provider(_)) => "provider_error",
            ApiError::Analyze(AnalyzeError::Timeout(_)) => "provider_timeout",
            ApiError::Analyze(AnalyzeError::InvalidResponse(_)) => "invalid_response",
        }
    }

    fn outcome(&self) -> Outcome {
        match self {
            ApiError::NoFile
            | ApiError::NotAnImage(_)
            | ApiError::TooLarge { .. }
            | ApiError::Multipart(_) => Outcome::ClientError,
            ApiError::Staging(_) | ApiError::Transform(_) => Outcome::TransformError,
            ApiError::Analyze(AnalyzeError::Provider(_)) => Outcome::ProviderError,
            ApiError::Analyze(AnalyzeError::Timeout(_)) => Outcome::Timeout,
            ApiError::Analyze(AnalyzeError::InvalidResponse(_)) => Outcome::InvalidResponse,
        }
    }

    fn body(&self) -> ErrorResponse {
        if self.status().is_client_error() {
            ErrorResponse {
                error: self.to_string(),
                code: self.code(),
                message: None,
            }
        } else {
            ErrorResponse {
                error: "analysis failed".to_string(),
                code: self.code(),
                message: Some(self.to_string()),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Shared, read-only application state.  Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub analyzer: Analyzer,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Assemble state around an explicit provider.
    pub fn new(config: AppConfig, provider: Arc<dyn VisionProvider>) -> Self {
        let analyzer = Analyzer::new(
            provider,
            Duration::from_millis(config.provider_timeout_ms),
        );
        Self {
            config: Arc::new(config),
            analyzer,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

/// Build state backed by the Gemini provider.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let provider = GeminiProvider::new(config.gemini.clone())?;
    tracing::info!(
        model = %config.gemini.model,
        presets = ?config.presets.ids(),
        upload_dir = %config.upload_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        timeout_ms = config.provider_timeout_ms,
        "analyzer configured"
    );
    Ok(AppState::new(config, Arc::new(provider)))
}

/// Build state from environment variables; see [`AppConfig::from_env`].
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health_handler))
        .route("/analyze", post(analyze_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[derive(Default)]
struct UploadForm {
    image: Option<Vec<u8>>,
    preset_id: Option<String>,
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::TooLarge { limit }
    } else {
        ApiError::Multipart(err.body_text())
    }
}

/// Read a file field chunk by chunk, stopping as soon as the cap is crossed.
async fn read_limited(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Walk the form.  The content type of the image field is checked from its
/// headers, before any of its bytes are read.
async fn read_form(mut multipart: Multipart, limit: usize) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(IMAGE_FIELD) => {
                let content_type = field.content_type().unwrap_or_default().to_owned();
                if !content_type.starts_with("image/") {
                    let shown = if content_type.is_empty() {
                        "no content type".to_string()
                    } else {
                        content_type
                    };
                    return Err(ApiError::NotAnImage(shown));
                }
                form.image = Some(read_limited(field, limit).await?);
            }
            Some(PRESET_FIELD) => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                form.preset_id = Some(value);
            }
            _ => {} // ignore unknown fields
        }
    }
    Ok(form)
}

/// The request pipeline: validate the form, stage the upload, downscale,
/// analyze.  Staged files are removed when the guard goes out of scope,
/// whichever way this function exits.
async fn analyze_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<AnalysisResult, ApiError> {
    let multipart = multipart.map_err(|rejection| ApiError::Multipart(rejection.body_text()))?;
    let cfg = &state.config;
    let form = read_form(multipart, cfg.max_upload_bytes).await?;
    let image = form
        .image
        .filter(|bytes| !bytes.is_empty())
        .ok_or(ApiError::NoFile)?;
    let preset = cfg.presets.resolve(form.preset_id.as_deref());
    tracing::info!(
        preset = %preset.id,
        requested = ?form.preset_id,
        bytes = image.len(),
        "analysis requested"
    );

    let staged = StagedUpload::create(&cfg.upload_dir, image)
        .await
        .map_err(ApiError::Staging)?;
    let (_staged, jpeg, info) = staged.downscale(cfg.resize).await?;
    tracing::debug!(
        source = ?info.source,
        output = ?info.output,
        jpeg_bytes = info.bytes,
        "image downscaled"
    );

    let started = Instant::now();
    let outcome = state.analyzer.analyze(&jpeg, preset).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.observe_provider_latency(elapsed_ms);
    let result = outcome?;

    tracing::info!(
        preset = %preset.id,
        provider = %state.analyzer.provider_name(),
        total_score = ?result.total_score(),
        elapsed_ms,
        "analysis complete"
    );
    Ok(result)
}

/// Handler for `POST /analyze`.
async fn analyze_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match analyze_upload(&state, multipart).await {
        Ok(result) => {
            state.metrics.record_outcome(Outcome::Success);
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(err) => {
            state.metrics.record_outcome(err.outcome());
            if err.status().is_server_error() {
                tracing::error!(code = err.code(), error = %err, "analysis failed");
            } else {
                tracing::info!(code = err.code(), error = %err, "analysis request rejected");
            }
            err.into_response()
        }
    }
}

/// Liveness endpoint.  The timestamp uses the same shape as JavaScript's
/// `toISOString` (millisecond precision, `Z` suffix).
async fn health_handler() -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(),
    )
        .into_response()
}
