//! Stage executor contract and the generator-backed executors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::compile::CompileExecutor;
use super::generator::{ContentGenerator, GeneratorError, SlideContext};
use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::task::{SlideSpec, Stage, Task};

/// Failure reported by a stage executor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Worth retrying with backoff.
    #[error("Retryable stage error: {0}")]
    Retryable(String),

    /// Retrying cannot help; fails the task.
    #[error("Fatal stage error: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Retryable(message) | StageError::Fatal(message) => message,
        }
    }
}

impl From<GeneratorError> for StageError {
    fn from(err: GeneratorError) -> Self {
        if err.is_retryable() {
            StageError::Retryable(err.to_string())
        } else {
            StageError::Fatal(err.to_string())
        }
    }
}

/// Successful output of one stage unit.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Outline(Vec<SlideSpec>),
    Content(String),
    Image(Option<String>),
    Notes(String),
    Compiled(ArtifactRef),
}

impl StageOutput {
    /// The stage that produces this kind of output.
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Outline(_) => Stage::Outline,
            StageOutput::Content(_) => Stage::Content,
            StageOutput::Image(_) => Stage::Image,
            StageOutput::Notes(_) => Stage::Notes,
            StageOutput::Compiled(_) => Stage::Compile,
        }
    }
}

/// Executes one stage unit against a snapshot of a task.
///
/// Executors never write task state; the orchestrator applies their output.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, task: &Task, slide_index: Option<u32>) -> Result<StageOutput, StageError>;
}

/// Resolve the outline entry behind a per-slide dispatch.
fn slide_context(task: &Task, slide_index: Option<u32>) -> Result<SlideContext<'_>, StageError> {
    let index = slide_index
        .ok_or_else(|| StageError::Fatal("per-slide stage dispatched without a slide".to_string()))?;
    let outline = task
        .outline
        .as_ref()
        .ok_or_else(|| StageError::Fatal("outline missing".to_string()))?;
    let spec = outline
        .get(index as usize)
        .ok_or_else(|| StageError::Fatal(format!("slide {} is not in the outline", index)))?;
    let content = task.slide(index).and_then(|s| s.content.as_deref());
    Ok(SlideContext {
        request: &task.request,
        index,
        total: outline.len() as u32,
        spec,
        content,
    })
}

/// Produces the outline and validates its length against the request bounds.
pub struct OutlineExecutor {
    generator: Arc<dyn ContentGenerator>,
}

impl OutlineExecutor {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for OutlineExecutor {
    fn stage(&self) -> Stage {
        Stage::Outline
    }

    async fn execute(&self, task: &Task, _slide_index: Option<u32>) -> Result<StageOutput, StageError> {
        let outline = self.generator.outline(&task.request).await?;
        let bounds = task.request.bounds;
        if !bounds.contains(outline.len()) {
            // The model may do better on another attempt.
            return Err(StageError::Retryable(format!(
                "outline has {} slides, expected {} to {}",
                outline.len(),
                bounds.min,
                bounds.max
            )));
        }
        if outline.iter().any(|s| s.title.trim().is_empty()) {
            return Err(StageError::Retryable("outline contains an untitled slide".to_string()));
        }
        Ok(StageOutput::Outline(outline))
    }
}

pub struct ContentExecutor {
    generator: Arc<dyn ContentGenerator>,
}

impl ContentExecutor {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for ContentExecutor {
    fn stage(&self) -> Stage {
        Stage::Content
    }

    async fn execute(&self, task: &Task, slide_index: Option<u32>) -> Result<StageOutput, StageError> {
        let slide = slide_context(task, slide_index)?;
        let content = self.generator.slide_content(slide).await?;
        Ok(StageOutput::Content(content))
    }
}

pub struct ImageExecutor {
    generator: Arc<dyn ContentGenerator>,
}

impl ImageExecutor {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for ImageExecutor {
    fn stage(&self) -> Stage {
        Stage::Image
    }

    async fn execute(&self, task: &Task, slide_index: Option<u32>) -> Result<StageOutput, StageError> {
        let slide = slide_context(task, slide_index)?;
        let image_ref = self.generator.image(slide).await?;
        Ok(StageOutput::Image(image_ref))
    }
}

pub struct NotesExecutor {
    generator: Arc<dyn ContentGenerator>,
}

impl NotesExecutor {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for NotesExecutor {
    fn stage(&self) -> Stage {
        Stage::Notes
    }

    async fn execute(&self, task: &Task, slide_index: Option<u32>) -> Result<StageOutput, StageError> {
        let slide = slide_context(task, slide_index)?;
        let notes = self.generator.speaker_notes(slide).await?;
        Ok(StageOutput::Notes(notes))
    }
}

/// One executor per stage.
#[derive(Clone)]
pub struct ExecutorSet {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    /// The standard executors for a generator and artifact store.
    pub fn new(generator: Arc<dyn ContentGenerator>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let executors: Vec<Arc<dyn StageExecutor>> = vec![
            Arc::new(OutlineExecutor::new(generator.clone())),
            Arc::new(ContentExecutor::new(generator.clone())),
            Arc::new(ImageExecutor::new(generator.clone())),
            Arc::new(NotesExecutor::new(generator)),
            Arc::new(CompileExecutor::new(artifacts)),
        ];
        Self {
            executors: executors.into_iter().map(|e| (e.stage(), e)).collect(),
        }
    }

    /// Replace the executor for its stage.
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(executor.stage(), executor);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }
}
