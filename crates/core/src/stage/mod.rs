//! Stage executors and the generation capability behind them.

mod compile;
mod executor;
mod generator;
mod http_generator;
mod retry;
mod template;

pub use compile::{deck_key, manifest_key, render_markdown, CompileExecutor, DECK_CONTENT_TYPE};
pub use executor::{
    ContentExecutor, ExecutorSet, ImageExecutor, NotesExecutor, OutlineExecutor, StageError,
    StageExecutor, StageOutput,
};
pub use generator::{ContentGenerator, GeneratorError, SlideContext};
pub use http_generator::HttpGenerator;
pub use retry::RetryConfig;
pub use template::TemplateGenerator;
