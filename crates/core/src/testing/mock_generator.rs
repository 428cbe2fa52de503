//! Mock content generator for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::stage::{ContentGenerator, GeneratorError, SlideContext, TemplateGenerator};
use crate::task::{GenerationRequest, SlideSpec, Stage};

/// A recorded generator call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub stage: Stage,
    /// Slide the call was for; `None` for the outline.
    pub slide_index: Option<u32>,
}

/// Mock implementation of the ContentGenerator trait.
///
/// Produces the same output as [`TemplateGenerator`] unless told otherwise:
/// - Replace the outline with a fixed one
/// - Script failures per stage (consumed one call at a time)
/// - Delay calls to simulate a slow upstream
/// - Record every call
///
/// # Example
///
/// ```rust,ignore
/// use deckforge_core::testing::MockGenerator;
///
/// let generator = MockGenerator::new();
/// generator.fail_next(Stage::Content, GeneratorError::Transient("503".into()), 3);
///
/// // ... run the pipeline ...
///
/// assert_eq!(generator.calls_for(Stage::Content), 4);
/// ```
#[derive(Debug, Default)]
pub struct MockGenerator {
    template: TemplateGenerator,
    outline: Mutex<Option<Vec<SlideSpec>>>,
    failures: Mutex<HashMap<Stage, VecDeque<GeneratorError>>>,
    delays: Mutex<HashMap<Stage, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGenerator {
    /// Create a new mock generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `outline` from every outline call.
    pub fn set_outline(&self, outline: Vec<SlideSpec>) {
        *self.outline.lock().unwrap() = Some(outline);
    }

    /// Fail the next `times` calls for `stage` with `error`.
    pub fn fail_next(&self, stage: Stage, error: GeneratorError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(stage).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Sleep for `delay` before answering calls for `stage`.
    pub fn set_delay(&self, stage: Stage, delay: Duration) {
        self.delays.lock().unwrap().insert(stage, delay);
    }

    /// All recorded calls, in call order.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made for `stage`.
    pub fn calls_for(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.stage == stage)
            .count()
    }

    /// Record the call, apply any delay and pop a scripted failure.
    async fn begin(&self, stage: Stage, slide_index: Option<u32>) -> Result<(), GeneratorError> {
        self.calls.lock().unwrap().push(RecordedCall { stage, slide_index });

        let delay = self.delays.lock().unwrap().get(&stage).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn outline(&self, request: &GenerationRequest) -> Result<Vec<SlideSpec>, GeneratorError> {
        self.begin(Stage::Outline, None).await?;
        let fixed = self.outline.lock().unwrap().clone();
        match fixed {
            Some(outline) => Ok(outline),
            None => self.template.outline(request).await,
        }
    }

    async fn slide_content(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        self.begin(Stage::Content, Some(slide.index)).await?;
        self.template.slide_content(slide).await
    }

    async fn image(&self, slide: SlideContext<'_>) -> Result<Option<String>, GeneratorError> {
        self.begin(Stage::Image, Some(slide.index)).await?;
        self.template.image(slide).await
    }

    async fn speaker_notes(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        self.begin(Stage::Notes, Some(slide.index)).await?;
        self.template.speaker_notes(slide).await
    }
}
