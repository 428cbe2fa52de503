//! Content generation capability used by the stage executors.

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{GenerationRequest, SlideSpec};

/// Error type for generator backends.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GeneratorError {
    /// Network hiccup or upstream 5xx.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Throttled by upstream")]
    Throttled { retry_after_secs: Option<u64> },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with something unusable.
    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    /// Upstream refused the input.
    #[error("Rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl GeneratorError {
    /// Returns true if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeneratorError::Transient(_)
                | GeneratorError::Throttled { .. }
                | GeneratorError::Timeout(_)
                | GeneratorError::InvalidOutput(_)
        )
    }
}

/// Inputs describing one slide to a generator.
#[derive(Debug, Clone, Copy)]
pub struct SlideContext<'a> {
    pub request: &'a GenerationRequest,
    pub index: u32,
    pub total: u32,
    pub spec: &'a SlideSpec,
    /// Body text, when already generated.
    pub content: Option<&'a str>,
}

/// Opaque text and image generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Produce the ordered slide outline for a request.
    async fn outline(&self, request: &GenerationRequest) -> Result<Vec<SlideSpec>, GeneratorError>;

    /// Produce the body text of one slide.
    async fn slide_content(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError>;

    /// Select an image for one slide. `None` means the slide has no image.
    async fn image(&self, slide: SlideContext<'_>) -> Result<Option<String>, GeneratorError>;

    /// Produce speaker notes for one slide.
    async fn speaker_notes(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError>;
}
