use super::{
    types::{Config, GeneratorBackend},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Orchestrator has workers, a stage timeout and a retry budget
/// - Request and lock limits are consistent
/// - The http generator backend has a URL
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |message: &str| Err(ConfigError::ValidationError(message.to_string()));

    if config.server.port == 0 {
        return fail("server.port cannot be 0");
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.workers == 0 {
        return fail("orchestrator.workers must be at least 1");
    }
    if orchestrator.stage_timeout_ms == 0 {
        return fail("orchestrator.stage_timeout_ms cannot be 0");
    }
    if orchestrator.retry.max_attempts == 0 {
        return fail("orchestrator.retry.max_attempts must be at least 1");
    }

    let limits = &config.limits;
    if limits.min_slides == 0 || limits.min_slides > limits.max_slides {
        return fail("limits.min_slides must be between 1 and limits.max_slides");
    }

    let locks = &config.locks;
    if locks.implicit_ttl_secs == 0 || locks.default_ttl_secs == 0 {
        return fail("lock ttls cannot be 0");
    }
    if locks.default_ttl_secs > locks.max_ttl_secs {
        return fail("locks.default_ttl_secs cannot exceed locks.max_ttl_secs");
    }

    if config.generator.backend == GeneratorBackend::Http {
        match &config.generator.http {
            Some(http) if !http.url.trim().is_empty() => {}
            _ => return fail("generator.http.url is required when generator.backend = \"http\""),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneratorConfig, HttpGeneratorConfig, ServerConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.orchestrator.workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_inverted_limits_fail() {
        let mut config = Config::default();
        config.limits.min_slides = 10;
        config.limits.max_slides = 5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_http_backend_needs_url() {
        let mut config = Config::default();
        config.generator = GeneratorConfig {
            backend: GeneratorBackend::Http,
            http: None,
        };
        assert!(validate_config(&config).is_err());

        config.generator.http = Some(HttpGeneratorConfig {
            url: "http://localhost:9400".to_string(),
            api_key: None,
            timeout_secs: 30,
        });
        assert!(validate_config(&config).is_ok());
    }
}
