//! HTTP server for the deckforge generation engine.

pub mod api;
pub mod metrics;
pub mod state;
