//! Submission validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{GenerationRequest, Language, SlideBounds, Style};

/// Raw generation parameters as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    pub num_slides: u32,
    #[serde(default)]
    pub min_slides: Option<u32>,
    #[serde(default)]
    pub max_slides: Option<u32>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

impl GenerationParams {
    pub fn new(topic: impl Into<String>, num_slides: u32) -> Self {
        Self {
            topic: topic.into(),
            num_slides,
            ..Default::default()
        }
    }
}

/// Limits applied to every submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLimits {
    #[serde(default = "default_min_slides")]
    pub min_slides: u32,
    #[serde(default = "default_max_slides")]
    pub max_slides: u32,
    #[serde(default = "default_max_topic_len")]
    pub max_topic_len: usize,
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: u32,
}

fn default_min_slides() -> u32 {
    1
}

fn default_max_slides() -> u32 {
    50
}

fn default_max_topic_len() -> usize {
    500
}

fn default_max_duration_minutes() -> u32 {
    240
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            min_slides: default_min_slides(),
            max_slides: default_max_slides(),
            max_topic_len: default_max_topic_len(),
            max_duration_minutes: default_max_duration_minutes(),
        }
    }
}

/// A single rejected field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// All violations found in a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Returns true if `field` was rejected.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "invalid request: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Validate raw parameters into a typed request, collecting every violation.
pub fn validate_request(
    params: &GenerationParams,
    limits: &RequestLimits,
) -> Result<GenerationRequest, ValidationError> {
    let mut violations = Vec::new();
    let mut reject = |field: &str, message: String| {
        violations.push(FieldViolation {
            field: field.to_string(),
            message,
        });
    };

    let topic = params.topic.trim().to_string();
    if topic.is_empty() {
        reject("topic", "must not be empty".to_string());
    } else if topic.chars().count() > limits.max_topic_len {
        reject(
            "topic",
            format!("must be at most {} characters", limits.max_topic_len),
        );
    }

    let num_slides = params.num_slides;
    if num_slides < limits.min_slides || num_slides > limits.max_slides {
        reject(
            "num_slides",
            format!(
                "must be between {} and {}",
                limits.min_slides, limits.max_slides
            ),
        );
    }

    let min = params.min_slides.unwrap_or(num_slides);
    let max = params.max_slides.unwrap_or(num_slides);
    if min < limits.min_slides || min > num_slides {
        reject(
            "min_slides",
            format!("must be between {} and num_slides", limits.min_slides),
        );
    }
    if max > limits.max_slides || max < num_slides {
        reject(
            "max_slides",
            format!("must be between num_slides and {}", limits.max_slides),
        );
    }

    let style = match params.style.as_deref() {
        None => Style::default(),
        Some(raw) => raw.parse::<Style>().unwrap_or_else(|e| {
            reject("style", e);
            Style::default()
        }),
    };

    let language = match params.language.as_deref() {
        None => Language::default(),
        Some(raw) => raw.parse::<Language>().unwrap_or_else(|e| {
            reject("language", e);
            Language::default()
        }),
    };

    if let Some(duration) = params.duration_minutes {
        if duration == 0 || duration > limits.max_duration_minutes {
            reject(
                "duration_minutes",
                format!("must be between 1 and {}", limits.max_duration_minutes),
            );
        }
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    let audience = params
        .audience
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Ok(GenerationRequest {
        topic,
        audience,
        num_slides,
        bounds: SlideBounds { min, max },
        style,
        language,
        duration_minutes: params.duration_minutes,
    })
}
