use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::lock::LockConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::task::RequestLimits;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Task store backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    /// Tasks live only as long as the process.
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("deckforge.db")
}

/// Compiled deck storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_root")]
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Available generator backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorBackend {
    /// Offline, deterministic templates.
    #[default]
    Template,
    /// Remote content service.
    Http,
}

/// Generator configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub backend: GeneratorBackend,
    /// Required when backend = "http"
    #[serde(default)]
    pub http: Option<HttpGeneratorConfig>,
}

/// HTTP content service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpGeneratorConfig {
    /// Service base URL (e.g., "http://localhost:9400")
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 60)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub artifacts: ArtifactsConfig,
    pub orchestrator: OrchestratorConfig,
    pub locks: LockConfig,
    pub limits: RequestLimits,
    pub generator: SanitizedGeneratorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGeneratorConfig {
    pub backend: GeneratorBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<SanitizedHttpGeneratorConfig>,
}

/// Sanitized HTTP generator config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedHttpGeneratorConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            artifacts: config.artifacts.clone(),
            orchestrator: config.orchestrator.clone(),
            locks: config.locks.clone(),
            limits: config.limits.clone(),
            generator: SanitizedGeneratorConfig {
                backend: config.generator.backend,
                http: config.generator.http.as_ref().map(|h| SanitizedHttpGeneratorConfig {
                    url: h.url.clone(),
                    api_key_configured: h.api_key.as_ref().is_some_and(|k| !k.is_empty()),
                    timeout_secs: h.timeout_secs,
                }),
            },
        }
    }
}
