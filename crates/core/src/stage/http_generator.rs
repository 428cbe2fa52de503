//! Generator backed by a JSON-over-HTTP content service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::generator::{ContentGenerator, GeneratorError, SlideContext};
use crate::task::{GenerationRequest, SlideSpec};

/// HTTP content service client.
///
/// Every operation is a `POST {base_url}/v1/{operation}` with a JSON body.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Transient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Map a non-success status to a generator error.
    fn classify(status: u16, message: String, retry_after: Option<u64>) -> GeneratorError {
        match status {
            429 => GeneratorError::Throttled {
                retry_after_secs: retry_after,
            },
            402 => GeneratorError::QuotaExhausted(message),
            500..=599 => GeneratorError::Transient(format!("{} - {}", status, message)),
            _ => GeneratorError::Rejected { status, message },
        }
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<T, GeneratorError> {
        let url = format!("{}/v1/{}", self.base_url, operation);
        debug!(%url, "Calling content service");

        let mut request = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout(self.timeout)
            } else {
                GeneratorError::Transient(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServiceError>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);
            return Err(Self::classify(status, message, retry_after));
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout(self.timeout)
            } else {
                GeneratorError::InvalidOutput(e.to_string())
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct SlideRequest<'a> {
    request: &'a GenerationRequest,
    index: u32,
    total: u32,
    slide: &'a SlideSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

impl<'a> From<SlideContext<'a>> for SlideRequest<'a> {
    fn from(ctx: SlideContext<'a>) -> Self {
        Self {
            request: ctx.request,
            index: ctx.index,
            total: ctx.total,
            slide: ctx.spec,
            content: ctx.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OutlineResponse {
    slides: Vec<SlideSpec>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    image_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotesResponse {
    speaker_notes: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    error: String,
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn outline(&self, request: &GenerationRequest) -> Result<Vec<SlideSpec>, GeneratorError> {
        let response: OutlineResponse = self.call("outline", request).await?;
        Ok(response.slides)
    }

    async fn slide_content(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        let response: ContentResponse = self.call("content", &SlideRequest::from(slide)).await?;
        if response.content.trim().is_empty() {
            return Err(GeneratorError::InvalidOutput("empty slide content".to_string()));
        }
        Ok(response.content)
    }

    async fn image(&self, slide: SlideContext<'_>) -> Result<Option<String>, GeneratorError> {
        let response: ImageResponse = self.call("image", &SlideRequest::from(slide)).await?;
        Ok(response.image_ref)
    }

    async fn speaker_notes(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        let response: NotesResponse = self.call("notes", &SlideRequest::from(slide)).await?;
        Ok(response.speaker_notes)
    }
}
