//! Deterministic offline generator.

use async_trait::async_trait;

use super::generator::{ContentGenerator, GeneratorError, SlideContext};
use crate::task::{GenerationRequest, SlideSpec, Style};

/// Generator that builds slides from fixed templates.
///
/// Output depends only on the request, which makes it suitable for local
/// runs and tests.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    fn slug(text: &str) -> String {
        let mut slug = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                slug.extend(c.to_lowercase());
            } else if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
        }
        slug.trim_end_matches('-').to_string()
    }

    fn tone(style: Style) -> &'static str {
        match style {
            Style::Professional => "Key takeaway",
            Style::Casual => "The short version",
            Style::Academic => "Central claim",
            Style::Creative => "Big idea",
            Style::Minimal => "Point",
        }
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn outline(&self, request: &GenerationRequest) -> Result<Vec<SlideSpec>, GeneratorError> {
        let topic = &request.topic;
        let count = request.num_slides;
        let outline = (0..count)
            .map(|i| {
                let title = if i == 0 {
                    format!("Introduction to {}", topic)
                } else if i + 1 == count && count > 2 {
                    "Summary".to_string()
                } else {
                    format!("{}: part {}", topic, i)
                };
                let key_points = (1..=3)
                    .map(|p| format!("{} point {}", title, p))
                    .collect();
                SlideSpec::new(title, key_points)
            })
            .collect();
        Ok(outline)
    }

    async fn slide_content(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        let mut body = format!(
            "{}: {}\n",
            Self::tone(slide.request.style),
            slide.spec.title
        );
        for point in &slide.spec.key_points {
            body.push_str(&format!("- {}\n", point));
        }
        if let Some(audience) = &slide.request.audience {
            body.push_str(&format!("\nFor {}.\n", audience));
        }
        Ok(body)
    }

    async fn image(&self, slide: SlideContext<'_>) -> Result<Option<String>, GeneratorError> {
        if slide.request.style == Style::Minimal {
            return Ok(None);
        }
        Ok(Some(format!(
            "stock://{}/{}-{}",
            slide.request.style.as_str(),
            Self::slug(&slide.spec.title),
            slide.index
        )))
    }

    async fn speaker_notes(&self, slide: SlideContext<'_>) -> Result<String, GeneratorError> {
        let mut notes = format!(
            "Slide {} of {} ({}). Walk through: {}.",
            slide.index + 1,
            slide.total,
            slide.request.language.name(),
            slide.spec.title
        );
        if let Some(minutes) = slide.request.duration_minutes {
            let seconds = u64::from(minutes) * 60 / u64::from(slide.total.max(1));
            notes.push_str(&format!(" Aim for about {} seconds.", seconds));
        }
        Ok(notes)
    }
}
