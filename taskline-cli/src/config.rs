//! Configuration module
//!
//! Handles CLI configuration including the orchestrator URL.

use taskline_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
}

impl Config {
    pub fn new(orchestrator_url: impl Into<String>) -> Self {
        Self {
            orchestrator_url: orchestrator_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client for the configured orchestrator
    pub fn client(&self) -> OrchestratorClient {
        OrchestratorClient::new(&self.orchestrator_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_dropped() {
        let config = Config::new("http://localhost:8080/");
        assert_eq!(config.orchestrator_url, "http://localhost:8080");
        assert_eq!(config.client().base_url(), "http://localhost:8080");
    }
}
