pub mod artifact;
pub mod config;
pub mod dispatch;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod stage;
pub mod status;
pub mod task;
pub mod testing;

pub use artifact::{ArtifactError, ArtifactRef, ArtifactStore, FsArtifactStore};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseBackend,
    GeneratorBackend, SanitizedConfig,
};
pub use dispatch::{DispatchError, DispatchMessage, DispatchQueue, InMemoryDispatchQueue};
pub use lock::{LockConfig, LockError, LockLease, SlideEdits};
pub use orchestrator::{
    DispatchOutcome, EditLock, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorStatus,
};
pub use stage::{
    ContentGenerator, ExecutorSet, GeneratorError, HttpGenerator, RetryConfig, StageError,
    TemplateGenerator,
};
pub use status::{StageBreakdown, StatusError, StatusFacade, StatusView};
pub use task::{
    GenerationParams, InMemoryTaskStore, Phase, RequestLimits, SqliteTaskStore, Stage, Task,
    TaskError, TaskFilter, TaskStatus, TaskStore, ValidationError,
};
