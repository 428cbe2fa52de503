//! Testing utilities and mock implementations.
//!
//! This module provides mocks for the external capabilities (content
//! generation and artifact storage) and fixtures for task records, allowing
//! pipeline tests without network or disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use deckforge_core::testing::{fixtures, MockArtifactStore, MockGenerator};
//!
//! let generator = Arc::new(MockGenerator::new());
//! let artifacts = Arc::new(MockArtifactStore::new());
//! let executors = ExecutorSet::new(generator.clone(), artifacts.clone());
//!
//! // Configure failures
//! generator.fail_next(Stage::Image, GeneratorError::Throttled { retry_after_secs: None }, 1);
//! ```

mod mock_artifact_store;
mod mock_generator;

pub use mock_artifact_store::MockArtifactStore;
pub use mock_generator::{MockGenerator, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::task::{
        GenerationRequest, Language, Slide, SlideBounds, SlideSpec, Style, Task, TaskStatus,
    };

    /// A valid request for `num_slides` slides with default options.
    pub fn request(topic: &str, num_slides: u32) -> GenerationRequest {
        GenerationRequest {
            topic: topic.to_string(),
            audience: None,
            num_slides,
            bounds: SlideBounds {
                min: num_slides,
                max: num_slides,
            },
            style: Style::Professional,
            language: Language::En,
            duration_minutes: None,
        }
    }

    /// A freshly created task (status `CREATED`, version 1).
    pub fn task(topic: &str, num_slides: u32) -> Task {
        Task::new(request(topic, num_slides), "tester")
    }

    /// A task whose outline has been applied, waiting for content.
    pub fn task_with_outline(topic: &str, num_slides: u32) -> Task {
        let mut task = task(topic, num_slides);
        let outline: Vec<SlideSpec> = (0..num_slides)
            .map(|i| {
                SlideSpec::new(
                    format!("{} {}", topic, i + 1),
                    vec![format!("Point {}", i + 1)],
                )
            })
            .collect();
        task.slides = outline
            .iter()
            .enumerate()
            .map(|(i, spec)| Slide::from_spec(i as u32, spec))
            .collect();
        task.outline = Some(outline);
        task.outline_progress.complete();
        task.status = TaskStatus::ContentPending;
        task
    }

    /// A task with content on every slide (edit version 1), waiting for
    /// assets.
    pub fn task_with_content(topic: &str, num_slides: u32) -> Task {
        let mut task = task_with_outline(topic, num_slides);
        for slide in &mut task.slides {
            slide.content = Some(format!("Content of {}", slide.title));
            slide.stage_state.content.complete();
            slide.edit_version = 1;
        }
        task.status = TaskStatus::AssetsPending;
        task
    }
}
