//! The analysis pipeline: build prompt, call the vision provider, extract the
//! JSON payload and validate it.
//!
//! Providers sit behind the [`VisionProvider`] trait so the prompt and
//! response contract stays the same whichever hosted model is used.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::presets::Preset;

pub mod gemini;
pub mod prompt;
pub mod response;

pub use self::gemini::{GeminiConfig, GeminiProvider};
pub use self::prompt::Prompt;
pub use self::response::{AnalysisResult, ResponseError};

/// MIME type of the images the request handler produces.
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to build provider client: {0}")]
    Client(String),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider error: {0}")]
    Api(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    InvalidResponse(#[from] ResponseError),
    #[error("provider did not answer within {0} ms")]
    Timeout(u64),
}

/// A hosted multimodal model that turns a prompt plus one inline image into
/// free text.  One call is one request/response exchange.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ProviderError>;
}

#[derive(Clone)]
pub struct Analyzer {
    provider: Arc<dyn VisionProvider>,
    timeout: Duration,
}

impl Analyzer {
    pub fn new(provider: Arc<dyn VisionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Score one (already downscaled) JPEG image under `preset`.  Nothing is
    /// retried; the first failure is returned.
    pub async fn analyze(
        &self,
        image: &[u8],
        preset: &Preset,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let prompt = Prompt::for_preset(preset).combined();
        let start = Instant::now();
        let raw = tokio::time::timeout(
            self.timeout,
            self.provider.generate(&prompt, image, IMAGE_MIME_TYPE),
        )
        .await
        .map_err(|_| AnalyzeError::Timeout(self.timeout.as_millis() as u64))??;
        tracing::debug!(
            provider = %self.provider.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            reply_len = raw.len(),
            "provider replied"
        );

        let result = AnalysisResult::parse(&raw).map_err(|err| {
            tracing::warn!(error = %err, reply_len = raw.len(), "provider reply rejected");
            tracing::debug!(reply = %raw, "rejected reply");
            err
        })?;
        let anomalies = result.anomalies();
        if !anomalies.is_empty() {
            tracing::warn!(
                preset = %preset.id,
                count = anomalies.len(),
                anomalies = ?anomalies,
                "reply departs from rubric; passing through"
            );
        }
        Ok(result)
    }
}
