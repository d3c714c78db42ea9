//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CatalogError;
use crate::rules::{RuleCatalog, RuleRegistry};

/// Timeouts and catalogue location for the transition engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Budget for one asynchronous rule check.
    pub check_timeout_ms: u64,
    /// How long an applied transition waits for a send/skip decision.
    pub decision_ttl_secs: u64,
    /// TOML rule catalogue; the built-in catalogue when unset.
    pub catalog_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 5_000,
            decision_ttl_secs: 900,
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - LOANGATE_CHECK_TIMEOUT_MS (optional, default: 5000)
    /// - LOANGATE_DECISION_TTL_SECS (optional, default: 900)
    /// - LOANGATE_CATALOG (optional, default: built-in catalogue)
    ///
    /// Unparseable numbers fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let check_timeout_ms = std::env::var("LOANGATE_CHECK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.check_timeout_ms);
        let decision_ttl_secs = std::env::var("LOANGATE_DECISION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.decision_ttl_secs);
        let catalog_path = std::env::var("LOANGATE_CATALOG").ok().map(PathBuf::from);

        Self {
            check_timeout_ms,
            decision_ttl_secs,
            catalog_path,
        }
    }

    pub fn with_check_timeout_ms(mut self, ms: u64) -> Self {
        self.check_timeout_ms = ms;
        self
    }

    pub fn with_decision_ttl_secs(mut self, secs: u64) -> Self {
        self.decision_ttl_secs = secs;
        self
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn decision_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.decision_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        chrono::Duration::seconds(secs)
    }

    /// Load the configured catalogue, or the built-in one.
    pub fn load_registry(&self) -> Result<RuleRegistry, CatalogError> {
        match &self.catalog_path {
            Some(path) => RuleCatalog::load(path)?.into_registry(),
            None => RuleCatalog::standard().into_registry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.check_timeout(), Duration::from_secs(5));
        assert_eq!(config.decision_ttl(), chrono::Duration::minutes(15));
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn default_registry_is_standard_catalogue() {
        let registry = EngineConfig::default().load_registry().unwrap();
        assert!(registry.lookup("status", "Approved").is_some());
    }

    #[test]
    fn missing_catalogue_file_errors() {
        let err = EngineConfig::default()
            .with_catalog_path("/nonexistent/loangate/rules.toml")
            .load_registry()
            .unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
