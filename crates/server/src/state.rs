use deckforge_core::{Config, Orchestrator, SanitizedConfig, StatusFacade};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Orchestrator,
    status: StatusFacade,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Orchestrator, status: StatusFacade) -> Self {
        Self {
            config,
            orchestrator,
            status,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn status(&self) -> &StatusFacade {
        &self.status
    }
}
