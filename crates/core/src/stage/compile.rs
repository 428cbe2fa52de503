//! Deck compilation: renders slides to Markdown plus a JSON manifest.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::executor::{StageError, StageExecutor, StageOutput};
use crate::artifact::{ArtifactError, ArtifactRef, ArtifactStore};
use crate::task::{Stage, Task};

pub const DECK_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";
pub const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// Artifact key of the compiled deck.
pub fn deck_key(task_id: &str) -> String {
    format!("tasks/{}/deck.md", task_id)
}

/// Artifact key of the deck manifest.
pub fn manifest_key(task_id: &str) -> String {
    format!("tasks/{}/manifest.json", task_id)
}

/// Render every slide as one Markdown section, separated by `---`.
///
/// Fails if any slide has no content.
pub fn render_markdown(task: &Task) -> Result<String, StageError> {
    if task.slides.is_empty() {
        return Err(StageError::Fatal("deck has no slides".to_string()));
    }

    let mut sections = Vec::with_capacity(task.slides.len());
    for slide in &task.slides {
        let content = slide
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StageError::Fatal(format!("slide {} has no content", slide.index)))?;

        let mut section = format!("## {}\n\n{}\n", slide.title, content.trim_end());
        if let Some(image_ref) = &slide.image_ref {
            section.push_str(&format!("\n![{}]({})\n", slide.title, image_ref));
        }
        if let Some(notes) = &slide.speaker_notes {
            section.push_str("\n<!-- notes\n");
            section.push_str(notes.trim_end());
            section.push_str("\n-->\n");
        }
        sections.push(section);
    }

    Ok(format!(
        "# {}\n\n{}",
        task.request.topic,
        sections.join("\n---\n\n")
    ))
}

#[derive(Debug, Serialize)]
struct DeckManifest<'a> {
    task_id: &'a str,
    topic: &'a str,
    style: &'a str,
    language: &'a str,
    slide_count: usize,
    deck: &'a ArtifactRef,
    slides: Vec<ManifestSlide<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestSlide<'a> {
    index: u32,
    title: &'a str,
    edit_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_ref: Option<&'a str>,
}

fn artifact_failure(err: ArtifactError) -> StageError {
    match err {
        ArtifactError::InvalidKey(_) => StageError::Fatal(err.to_string()),
        other => StageError::Retryable(other.to_string()),
    }
}

/// Writes the compiled deck and its manifest to the artifact store.
pub struct CompileExecutor {
    artifacts: Arc<dyn ArtifactStore>,
}

impl CompileExecutor {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl StageExecutor for CompileExecutor {
    fn stage(&self) -> Stage {
        Stage::Compile
    }

    async fn execute(&self, task: &Task, _slide_index: Option<u32>) -> Result<StageOutput, StageError> {
        let markdown = render_markdown(task)?;
        let deck = self
            .artifacts
            .put(&deck_key(&task.id), markdown.into_bytes(), DECK_CONTENT_TYPE)
            .await
            .map_err(artifact_failure)?;

        let manifest = DeckManifest {
            task_id: &task.id,
            topic: &task.request.topic,
            style: task.request.style.as_str(),
            language: task.request.language.code(),
            slide_count: task.slides.len(),
            deck: &deck,
            slides: task
                .slides
                .iter()
                .map(|s| ManifestSlide {
                    index: s.index,
                    title: &s.title,
                    edit_version: s.edit_version,
                    image_ref: s.image_ref.as_deref(),
                })
                .collect(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StageError::Fatal(format!("manifest encoding failed: {}", e)))?;
        self.artifacts
            .put(&manifest_key(&task.id), manifest_bytes, MANIFEST_CONTENT_TYPE)
            .await
            .map_err(artifact_failure)?;

        info!(
            task_id = %task.id,
            key = %deck.key,
            size_bytes = deck.size_bytes,
            "Compiled deck"
        );
        Ok(StageOutput::Compiled(deck))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockArtifactStore};

    #[test]
    fn test_render_markdown() {
        let mut task = fixtures::task_with_outline("Rust", 2);
        for slide in &mut task.slides {
            slide.content = Some(format!("Body {}", slide.index));
        }
        task.slides[0].image_ref = Some("stock://a.png".to_string());
        task.slides[1].speaker_notes = Some("Say hi".to_string());

        let markdown = render_markdown(&task).unwrap();
        assert!(markdown.starts_with("# Rust\n"));
        assert_eq!(markdown.matches("\n---\n").count(), 1);
        assert!(markdown.contains("Body 0"));
        assert!(markdown.contains("](stock://a.png)"));
        assert!(markdown.contains("<!-- notes\nSay hi\n-->"));
    }

    #[test]
    fn test_missing_content_is_fatal() {
        let mut task = fixtures::task_with_outline("Rust", 2);
        task.slides[0].content = Some("Body".to_string());

        let err = render_markdown(&task).unwrap_err();
        assert_eq!(err, StageError::Fatal("slide 1 has no content".to_string()));
    }

    #[tokio::test]
    async fn test_compile_writes_deck_and_manifest() {
        let artifacts = Arc::new(MockArtifactStore::new());
        let task = fixtures::task_with_content("Rust", 3);

        let output = CompileExecutor::new(artifacts.clone())
            .execute(&task, None)
            .await
            .unwrap();

        let deck = match output {
            StageOutput::Compiled(deck) => deck,
            other => panic!("unexpected output: {:?}", other),
        };
        assert_eq!(deck.key, deck_key(&task.id));
        let bytes = artifacts.get(&deck.key).await.unwrap();
        assert!(deck.verify(&bytes));

        let manifest: serde_json::Value =
            serde_json::from_slice(&artifacts.get(&manifest_key(&task.id)).await.unwrap()).unwrap();
        assert_eq!(manifest["slide_count"], 3);
        assert_eq!(manifest["deck"]["checksum"], deck.checksum.as_str());
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let artifacts = Arc::new(MockArtifactStore::new());
        artifacts.set_next_error(ArtifactError::Unavailable("disk full".to_string()));
        let task = fixtures::task_with_content("Rust", 1);

        let err = CompileExecutor::new(artifacts)
            .execute(&task, None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
