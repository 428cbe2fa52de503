//! Caller-facing status, stage breakdown and download.

mod facade;
mod types;

pub use facade::StatusFacade;
pub use types::{
    ResultView, SlideView, StageBreakdown, StageState, StageStatus, StatusError, StatusView,
    TaskSummary,
};
