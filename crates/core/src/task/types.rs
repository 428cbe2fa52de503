//! Core task data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::TaskError;
use crate::artifact::ArtifactRef;

// ============================================================================
// Request Types
// ============================================================================

/// Visual and rhetorical style of the generated deck.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    #[default]
    Professional,
    Casual,
    Academic,
    Creative,
    Minimal,
}

impl Style {
    /// All supported styles.
    pub const ALL: [Style; 5] = [
        Style::Professional,
        Style::Casual,
        Style::Academic,
        Style::Creative,
        Style::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Professional => "professional",
            Style::Casual => "casual",
            Style::Academic => "academic",
            Style::Creative => "creative",
            Style::Minimal => "minimal",
        }
    }
}

impl FromStr for Style {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Style::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| format!("unsupported style '{}'", s))
    }
}

/// Output language of the generated deck.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
    Zh,
    Ja,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 8] = [
        Language::En,
        Language::Es,
        Language::Fr,
        Language::De,
        Language::It,
        Language::Pt,
        Language::Zh,
        Language::Ja,
    ];

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Pt => "pt",
            Language::Zh => "zh",
            Language::Ja => "ja",
        }
    }

    /// English name of the language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::It => "Italian",
            Language::Pt => "Portuguese",
            Language::Zh => "Chinese",
            Language::Ja => "Japanese",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == wanted || lang.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unsupported language '{}'", s))
    }
}

/// Inclusive bounds on the number of slides the outline may produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlideBounds {
    pub min: u32,
    pub max: u32,
}

impl SlideBounds {
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min as usize && count <= self.max as usize
    }
}

/// Validated generation parameters. Immutable once a task exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// Presentation topic.
    pub topic: String,
    /// Intended audience, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Target slide count.
    pub num_slides: u32,
    /// Accepted outline length.
    pub bounds: SlideBounds,
    pub style: Style,
    pub language: Language,
    /// Planned talk duration in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

// ============================================================================
// Stages and Phases
// ============================================================================

/// A single executable pipeline step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Outline,
    Content,
    Image,
    Notes,
    Compile,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Outline,
        Stage::Content,
        Stage::Image,
        Stage::Notes,
        Stage::Compile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::Content => "content",
            Stage::Image => "image",
            Stage::Notes => "notes",
            Stage::Compile => "compile",
        }
    }

    /// The top-level phase this stage runs in.
    pub fn phase(&self) -> Phase {
        match self {
            Stage::Outline => Phase::Outline,
            Stage::Content => Phase::Content,
            Stage::Image | Stage::Notes => Phase::Assets,
            Stage::Compile => Phase::Compile,
        }
    }

    /// Whether this stage fans out one dispatch per slide.
    pub fn is_per_slide(&self) -> bool {
        matches!(self, Stage::Content | Stage::Image | Stage::Notes)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Top-level pipeline phase. Each phase has one `*_PENDING` status and
/// one checkpoint status reached when all of its stages complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Outline,
    Content,
    Assets,
    Compile,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Outline, Phase::Content, Phase::Assets, Phase::Compile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Outline => "outline",
            Phase::Content => "content",
            Phase::Assets => "assets",
            Phase::Compile => "compile",
        }
    }

    /// Stages executed during this phase.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Phase::Outline => &[Stage::Outline],
            Phase::Content => &[Stage::Content],
            Phase::Assets => &[Stage::Image, Stage::Notes],
            Phase::Compile => &[Stage::Compile],
        }
    }

    pub fn pending_status(&self) -> TaskStatus {
        match self {
            Phase::Outline => TaskStatus::OutlinePending,
            Phase::Content => TaskStatus::ContentPending,
            Phase::Assets => TaskStatus::AssetsPending,
            Phase::Compile => TaskStatus::Compiling,
        }
    }

    /// Status reached once the phase completes.
    pub fn done_status(&self) -> TaskStatus {
        match self {
            Phase::Outline => TaskStatus::OutlineReady,
            Phase::Content => TaskStatus::ContentReady,
            Phase::Assets => TaskStatus::AssetsReady,
            Phase::Compile => TaskStatus::Completed,
        }
    }

    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Outline => Some(Phase::Content),
            Phase::Content => Some(Phase::Assets),
            Phase::Assets => Some(Phase::Compile),
            Phase::Compile => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

// ============================================================================
// Task Status
// ============================================================================

/// Current status of a task.
///
/// State machine flow:
/// ```text
/// CREATED -> OUTLINE_PENDING -> OUTLINE_READY -> CONTENT_PENDING -> CONTENT_READY
///         -> ASSETS_PENDING -> ASSETS_READY -> COMPILING -> COMPLETED <-> EDITING
///
/// Any non-terminal state (including EDITING) can transition to FAILED.
/// FAILED can only leave through an explicit resume into a *_PENDING state.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    OutlinePending,
    OutlineReady,
    ContentPending,
    ContentReady,
    AssetsPending,
    AssetsReady,
    Compiling,
    Completed,
    Editing,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 11] = [
        TaskStatus::Created,
        TaskStatus::OutlinePending,
        TaskStatus::OutlineReady,
        TaskStatus::ContentPending,
        TaskStatus::ContentReady,
        TaskStatus::AssetsPending,
        TaskStatus::AssetsReady,
        TaskStatus::Compiling,
        TaskStatus::Completed,
        TaskStatus::Editing,
        TaskStatus::Failed,
    ];

    /// Statuses in which stage dispatches are in flight.
    pub const IN_FLIGHT: [TaskStatus; 4] = [
        TaskStatus::OutlinePending,
        TaskStatus::ContentPending,
        TaskStatus::AssetsPending,
        TaskStatus::Compiling,
    ];

    /// Returns the status as a string (for filtering and persistence).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::OutlinePending => "OUTLINE_PENDING",
            TaskStatus::OutlineReady => "OUTLINE_READY",
            TaskStatus::ContentPending => "CONTENT_PENDING",
            TaskStatus::ContentReady => "CONTENT_READY",
            TaskStatus::AssetsPending => "ASSETS_PENDING",
            TaskStatus::AssetsReady => "ASSETS_READY",
            TaskStatus::Compiling => "COMPILING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Editing => "EDITING",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Position along the pipeline. `EDITING` shares the rank of
    /// `COMPLETED`; `FAILED` has no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            TaskStatus::Created => Some(0),
            TaskStatus::OutlinePending => Some(1),
            TaskStatus::OutlineReady => Some(2),
            TaskStatus::ContentPending => Some(3),
            TaskStatus::ContentReady => Some(4),
            TaskStatus::AssetsPending => Some(5),
            TaskStatus::AssetsReady => Some(6),
            TaskStatus::Compiling => Some(7),
            TaskStatus::Completed | TaskStatus::Editing => Some(8),
            TaskStatus::Failed => None,
        }
    }

    /// Returns true if no further pipeline transitions happen on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Returns true while the pipeline may still write to the task.
    pub fn is_generating(&self) -> bool {
        !matches!(
            self,
            TaskStatus::Completed | TaskStatus::Editing | TaskStatus::Failed
        )
    }

    /// The phase whose dispatches are in flight, if any.
    pub fn active_phase(&self) -> Option<Phase> {
        match self {
            TaskStatus::OutlinePending => Some(Phase::Outline),
            TaskStatus::ContentPending => Some(Phase::Content),
            TaskStatus::AssetsPending => Some(Phase::Assets),
            TaskStatus::Compiling => Some(Phase::Compile),
            _ => None,
        }
    }

    /// Number of phases fully completed when in this status.
    pub fn completed_phases(&self) -> u32 {
        match self {
            TaskStatus::Created | TaskStatus::OutlinePending => 0,
            TaskStatus::OutlineReady | TaskStatus::ContentPending => 1,
            TaskStatus::ContentReady | TaskStatus::AssetsPending => 2,
            TaskStatus::AssetsReady | TaskStatus::Compiling => 3,
            TaskStatus::Completed | TaskStatus::Editing => 4,
            TaskStatus::Failed => 0,
        }
    }

    /// The latest externally visible checkpoint implied by this status.
    pub fn checkpoint(&self) -> Option<TaskStatus> {
        match self.completed_phases() {
            _ if *self == TaskStatus::Failed => None,
            0 => None,
            1 => Some(TaskStatus::OutlineReady),
            2 => Some(TaskStatus::ContentReady),
            3 => Some(TaskStatus::AssetsReady),
            _ => Some(TaskStatus::Completed),
        }
    }

    /// Returns true if `next` is a forward edge of the transition graph.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Completed, Editing) | (Editing, Completed) => true,
            (Editing, _) | (_, Editing) => false,
            _ => matches!((self.rank(), next.rank()), (Some(from), Some(to)) if to == from + 1),
        }
    }

    /// Returns true if an explicit resume may move a task from this status
    /// into `next`.
    pub fn can_resume_to(&self, next: TaskStatus) -> bool {
        *self == TaskStatus::Failed && TaskStatus::IN_FLIGHT.contains(&next)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

// ============================================================================
// Slides
// ============================================================================

/// One entry of the generated outline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
}

impl SlideSpec {
    pub fn new(title: impl Into<String>, key_points: Vec<String>) -> Self {
        Self {
            title: title.into(),
            key_points,
        }
    }
}

/// Progress of one dispatchable unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitProgress {
    /// Result applied.
    #[serde(default)]
    pub done: bool,
    /// Dispatches issued so far in the current epoch (1-indexed).
    #[serde(default)]
    pub attempts: u32,
    /// When the current attempt must report back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Last retryable error seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl UnitProgress {
    /// A unit armed for its first dispatch.
    pub fn armed(deadline: DateTime<Utc>) -> Self {
        Self {
            done: false,
            attempts: 1,
            deadline: Some(deadline),
            last_error: None,
        }
    }

    /// Returns true if the current attempt missed its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.done && self.deadline.is_some_and(|deadline| deadline < now)
    }

    pub fn complete(&mut self) {
        self.done = true;
        self.deadline = None;
    }
}

/// Per-slide completion state of the fan-out stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SlideStageState {
    #[serde(default)]
    pub content: UnitProgress,
    #[serde(default)]
    pub image: UnitProgress,
    #[serde(default)]
    pub notes: UnitProgress,
}

impl SlideStageState {
    pub fn get(&self, stage: Stage) -> Option<&UnitProgress> {
        match stage {
            Stage::Content => Some(&self.content),
            Stage::Image => Some(&self.image),
            Stage::Notes => Some(&self.notes),
            Stage::Outline | Stage::Compile => None,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> Option<&mut UnitProgress> {
        match stage {
            Stage::Content => Some(&mut self.content),
            Stage::Image => Some(&mut self.image),
            Stage::Notes => Some(&mut self.notes),
            Stage::Outline | Stage::Compile => None,
        }
    }
}

/// A slide of the presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slide {
    /// Position in the deck (0-based, stable).
    pub index: u32,
    /// Title copied from the outline.
    pub title: String,
    /// Generated or edited body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Selected image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_notes: Option<String>,
    #[serde(default)]
    pub stage_state: SlideStageState,
    /// Bumped on every generated or manual mutation of this slide.
    #[serde(default)]
    pub edit_version: u64,
}

impl Slide {
    /// An empty slide created from its outline entry.
    pub fn from_spec(index: u32, spec: &SlideSpec) -> Self {
        Self {
            index,
            title: spec.title.clone(),
            content: None,
            image_ref: None,
            speaker_notes: None,
            stage_state: SlideStageState::default(),
            edit_version: 0,
        }
    }
}

// ============================================================================
// Failures and History
// ============================================================================

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A stage reported a fatal error.
    Stage,
    /// A stage kept failing transiently past the attempt budget.
    RetriesExhausted,
    /// Cancelled by a caller.
    Cancelled,
    /// Rebuilding the deck after a manual edit failed.
    Edit,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Stage => "stage",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Edit => "edit",
        }
    }
}

/// Last fatal error recorded on a failed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_index: Option<u32>,
    pub failed_at: DateTime<Utc>,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
            slide_index: None,
            failed_at: Utc::now(),
        }
    }

    /// Attribute the failure to a stage unit.
    pub fn at_unit(mut self, stage: Stage, slide_index: Option<u32>) -> Self {
        self.stage = Some(stage);
        self.slide_index = slide_index;
        self
    }
}

/// One status change, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Version of the write that performed the transition.
    pub version: u64,
    pub at: DateTime<Utc>,
}

/// Completed vs total top-level phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed_stages: u32,
    pub total_stages: u32,
}

// ============================================================================
// Task
// ============================================================================

/// A presentation generation request and its evolving state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier (UUID).
    pub id: String,

    /// Current status.
    pub status: TaskStatus,

    /// Validated generation parameters.
    pub request: GenerationRequest,

    /// Outline produced by the outline stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Vec<SlideSpec>>,

    /// Slides, created once the outline exists.
    #[serde(default)]
    pub slides: Vec<Slide>,

    /// Compiled deck, set when the task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_location: Option<ArtifactRef>,

    /// Last fatal error, set only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,

    /// Current exclusive-edit token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,

    /// Incremented by the store on every persisted mutation.
    pub version: u64,

    /// Version at which the current phase was entered. Dispatches carry it
    /// as their expected version.
    #[serde(default)]
    pub stage_epoch: u64,

    #[serde(default)]
    pub outline_progress: UnitProgress,

    #[serde(default)]
    pub compile_progress: UnitProgress,

    /// Slides were edited since the deck was last compiled.
    #[serde(default)]
    pub edits_uncompiled: bool,

    #[serde(default)]
    pub transitions: Vec<StatusTransition>,

    /// Caller that submitted the task.
    pub created_by: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task in `CREATED`.
    pub fn new(request: GenerationRequest, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: TaskStatus::Created,
            request,
            outline: None,
            slides: Vec::new(),
            compiled_location: None,
            error: None,
            lock_token: None,
            lock_expires_at: None,
            version: 1,
            stage_epoch: 0,
            outline_progress: UnitProgress::default(),
            compile_progress: UnitProgress::default(),
            edits_uncompiled: false,
            transitions: Vec::new(),
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress across the four top-level phases.
    pub fn progress(&self) -> Progress {
        let completed_stages = match (self.status, self.transitions.last()) {
            // A failed task keeps the progress it had reached.
            (TaskStatus::Failed, Some(last)) => last.from.completed_phases(),
            (status, _) => status.completed_phases(),
        };
        Progress {
            completed_stages,
            total_stages: Phase::ALL.len() as u32,
        }
    }

    /// Returns true if an unexpired edit lock is held.
    pub fn lock_is_active(&self, now: DateTime<Utc>) -> bool {
        self.lock_token.is_some() && self.lock_expires_at.is_some_and(|expires| expires > now)
    }

    pub fn slide(&self, index: u32) -> Option<&Slide> {
        self.slides.get(index as usize)
    }

    pub fn slide_mut(&mut self, index: u32) -> Option<&mut Slide> {
        self.slides.get_mut(index as usize)
    }

    /// Progress of one dispatch unit.
    pub fn unit(&self, stage: Stage, slide_index: Option<u32>) -> Option<&UnitProgress> {
        match (stage, slide_index) {
            (Stage::Outline, None) => Some(&self.outline_progress),
            (Stage::Compile, None) => Some(&self.compile_progress),
            (stage, Some(index)) if stage.is_per_slide() => {
                self.slide(index).and_then(|slide| slide.stage_state.get(stage))
            }
            _ => None,
        }
    }

    pub fn unit_mut(&mut self, stage: Stage, slide_index: Option<u32>) -> Option<&mut UnitProgress> {
        match (stage, slide_index) {
            (Stage::Outline, None) => Some(&mut self.outline_progress),
            (Stage::Compile, None) => Some(&mut self.compile_progress),
            (stage, Some(index)) if stage.is_per_slide() => self
                .slide_mut(index)
                .and_then(|slide| slide.stage_state.get_mut(stage)),
            _ => None,
        }
    }

    /// All dispatch units of a phase, in slide order.
    pub fn phase_units(&self, phase: Phase) -> Vec<(Stage, Option<u32>)> {
        let mut units = Vec::new();
        for stage in phase.stages() {
            if stage.is_per_slide() {
                units.extend(self.slides.iter().map(|slide| (*stage, Some(slide.index))));
            } else {
                units.push((*stage, None));
            }
        }
        units
    }

    /// Returns true when every unit of the phase has been applied.
    pub fn phase_complete(&self, phase: Phase) -> bool {
        let units = self.phase_units(phase);
        !units.is_empty()
            && units
                .iter()
                .all(|(stage, index)| self.unit(*stage, *index).is_some_and(|unit| unit.done))
    }

    /// Move to `next`, recording the transition. The recorded version is the
    /// version the pending write will receive.
    ///
    /// Fails with `InvalidTransition` and leaves the task untouched unless
    /// `next` is an edge of the status graph or an explicit resume.
    pub fn record_transition(
        &mut self,
        next: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) && !self.status.can_resume_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.transitions.push(StatusTransition {
            from: self.status,
            to: next,
            version: self.version + 1,
            at,
        });
        self.status = next;
        Ok(())
    }

    /// Move to `FAILED`, recording the failure and dropping any edit lock.
    pub fn mark_failed(&mut self, failure: TaskFailure) -> Result<(), TaskError> {
        self.record_transition(TaskStatus::Failed, failure.failed_at)?;
        self.error = Some(failure);
        self.lock_token = None;
        self.lock_expires_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            topic: "Intro to AI".to_string(),
            audience: None,
            num_slides: 3,
            bounds: SlideBounds { min: 3, max: 3 },
            style: Style::Professional,
            language: Language::En,
            duration_minutes: None,
        }
    }

    fn task_with_slides(count: u32) -> Task {
        let mut task = Task::new(request(), "tester");
        task.slides = (0..count)
            .map(|i| Slide::from_spec(i, &SlideSpec::new(format!("Slide {}", i), vec![])))
            .collect();
        task
    }

    #[test]
    fn test_new_task_is_created() {
        let task = Task::new(request(), "tester");
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.version, 1);
        assert!(task.outline.is_none());
        assert!(task.slides.is_empty());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_forward_transitions() {
        use TaskStatus::*;
        let path = [
            Created,
            OutlinePending,
            OutlineReady,
            ContentPending,
            ContentReady,
            AssetsPending,
            AssetsReady,
            Compiling,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            assert!(!pair[1].can_transition_to(pair[0]), "{} -> {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::ContentPending));
        assert!(!TaskStatus::OutlinePending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::ContentReady.can_transition_to(TaskStatus::Editing));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for status in TaskStatus::ALL {
            let expected = !matches!(status, TaskStatus::Completed | TaskStatus::Failed);
            assert_eq!(status.can_transition_to(TaskStatus::Failed), expected, "{}", status);
        }
    }

    #[test]
    fn test_editing_side_branch() {
        assert!(TaskStatus::Completed.can_transition_to(TaskStatus::Editing));
        assert!(TaskStatus::Editing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Editing.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Compiling.can_transition_to(TaskStatus::Editing));
    }

    #[test]
    fn test_resume_only_from_failed() {
        assert!(TaskStatus::Failed.can_resume_to(TaskStatus::ContentPending));
        assert!(!TaskStatus::Failed.can_resume_to(TaskStatus::ContentReady));
        assert!(!TaskStatus::Completed.can_resume_to(TaskStatus::ContentPending));
    }

    #[test]
    fn test_rank_is_monotonic_along_pipeline() {
        let ranks: Vec<u8> = [
            TaskStatus::Created,
            TaskStatus::OutlinePending,
            TaskStatus::OutlineReady,
            TaskStatus::ContentPending,
            TaskStatus::ContentReady,
            TaskStatus::AssetsPending,
            TaskStatus::AssetsReady,
            TaskStatus::Compiling,
            TaskStatus::Completed,
        ]
        .iter()
        .filter_map(|s| s.rank())
        .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(TaskStatus::Failed.rank(), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::OutlinePending).unwrap();
        assert_eq!(json, "\"OUTLINE_PENDING\"");
        let parsed: TaskStatus = serde_json::from_str("\"ASSETS_READY\"").unwrap();
        assert_eq!(parsed, TaskStatus::AssetsReady);
        assert_eq!("compiling".parse::<TaskStatus>().unwrap(), TaskStatus::Compiling);
    }

    #[test]
    fn test_checkpoint() {
        assert_eq!(TaskStatus::OutlinePending.checkpoint(), None);
        assert_eq!(
            TaskStatus::ContentPending.checkpoint(),
            Some(TaskStatus::OutlineReady)
        );
        assert_eq!(
            TaskStatus::Compiling.checkpoint(),
            Some(TaskStatus::AssetsReady)
        );
        assert_eq!(TaskStatus::Failed.checkpoint(), None);
    }

    #[test]
    fn test_style_and_language_parsing() {
        assert_eq!("Academic".parse::<Style>().unwrap(), Style::Academic);
        assert!("baroque".parse::<Style>().is_err());
        assert_eq!("FR".parse::<Language>().unwrap(), Language::Fr);
        assert_eq!("german".parse::<Language>().unwrap(), Language::De);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_phase_units_fan_out() {
        let task = task_with_slides(3);
        assert_eq!(task.phase_units(Phase::Outline), vec![(Stage::Outline, None)]);
        assert_eq!(task.phase_units(Phase::Content).len(), 3);
        let assets = task.phase_units(Phase::Assets);
        assert_eq!(assets.len(), 6);
        assert!(assets.contains(&(Stage::Image, Some(2))));
        assert!(assets.contains(&(Stage::Notes, Some(0))));
    }

    #[test]
    fn test_phase_complete_requires_every_slide() {
        let mut task = task_with_slides(2);
        assert!(!task.phase_complete(Phase::Content));
        task.unit_mut(Stage::Content, Some(0)).unwrap().complete();
        assert!(!task.phase_complete(Phase::Content));
        task.unit_mut(Stage::Content, Some(1)).unwrap().complete();
        assert!(task.phase_complete(Phase::Content));
    }

    #[test]
    fn test_phase_complete_false_without_slides() {
        let task = Task::new(request(), "tester");
        assert!(!task.phase_complete(Phase::Content));
    }

    #[test]
    fn test_unit_lookup_rejects_mismatched_index() {
        let task = task_with_slides(1);
        assert!(task.unit(Stage::Outline, Some(0)).is_none());
        assert!(task.unit(Stage::Content, None).is_none());
        assert!(task.unit(Stage::Content, Some(5)).is_none());
        assert!(task.unit(Stage::Image, Some(0)).is_some());
    }

    #[test]
    fn test_unit_overdue() {
        let now = Utc::now();
        let unit = UnitProgress::armed(now - chrono::Duration::seconds(1));
        assert!(unit.is_overdue(now));
        let mut done = unit.clone();
        done.complete();
        assert!(!done.is_overdue(now));
        assert!(!UnitProgress::default().is_overdue(now));
    }

    #[test]
    fn test_lock_is_active() {
        let now = Utc::now();
        let mut task = Task::new(request(), "tester");
        assert!(!task.lock_is_active(now));
        task.lock_token = Some("tok".to_string());
        task.lock_expires_at = Some(now + chrono::Duration::seconds(30));
        assert!(task.lock_is_active(now));
        task.lock_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!task.lock_is_active(now));
    }

    #[test]
    fn test_record_transition() {
        let mut task = Task::new(request(), "tester");
        let now = Utc::now();
        task.record_transition(TaskStatus::OutlinePending, now).unwrap();
        assert_eq!(task.status, TaskStatus::OutlinePending);
        assert_eq!(task.transitions.len(), 1);
        assert_eq!(task.transitions[0].from, TaskStatus::Created);
        assert_eq!(task.transitions[0].version, 2);
    }

    #[test]
    fn test_record_transition_refuses_moves_off_the_graph() {
        let mut task = Task::new(request(), "tester");
        let now = Utc::now();
        task.record_transition(TaskStatus::OutlinePending, now).unwrap();
        task.record_transition(TaskStatus::Failed, now).unwrap();
        let before = task.clone();

        let err = task.record_transition(TaskStatus::Completed, now).unwrap_err();
        assert_eq!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Completed,
            }
        );
        assert_eq!(task, before);

        let err = task
            .mark_failed(TaskFailure::new(FailureKind::Stage, "again"))
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task, before);

        // An explicit resume re-enters a pending status.
        task.record_transition(TaskStatus::ContentPending, now).unwrap();
        assert_eq!(task.status, TaskStatus::ContentPending);
    }

    #[test]
    fn test_mark_failed_drops_lock() {
        let mut task = Task::new(request(), "tester");
        task.lock_token = Some("tok".to_string());
        task.lock_expires_at = Some(Utc::now());
        task.mark_failed(TaskFailure::new(FailureKind::Edit, "boom").at_unit(Stage::Compile, None))
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.lock_token.is_none());
        let error = task.error.unwrap();
        assert_eq!(error.kind, FailureKind::Edit);
        assert_eq!(error.stage, Some(Stage::Compile));
    }

    #[test]
    fn test_progress_of_failed_task_keeps_reached_phase() {
        let mut task = Task::new(request(), "tester");
        let now = Utc::now();
        task.record_transition(TaskStatus::OutlinePending, now).unwrap();
        task.record_transition(TaskStatus::OutlineReady, now).unwrap();
        task.record_transition(TaskStatus::ContentPending, now).unwrap();
        task.record_transition(TaskStatus::Failed, now).unwrap();
        assert_eq!(task.progress().completed_stages, 1);
        assert_eq!(task.progress().total_stages, 4);
    }
}
