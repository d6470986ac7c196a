//! Engine configuration
//!
//! One TOML document carries the routing policy, budget limits, pricing
//! overrides and storage paths. Every section is optional and falls back
//! to its defaults. Environment variables override file values.
//!
//! ```toml
//! audit_log_path = "/var/lib/tiergate/audit_log.jsonl"
//! estimator = "word_count"
//!
//! [routing]
//! max_attempts = 3
//! escalation = ["cheap", "mid", "high"]
//!
//! [routing.defaults]
//! cheap = "anthropic/claude-haiku-4"
//!
//! [budgets]
//! max_daily_cost_usd = 10.0
//!
//! [pricing."local/llama"]
//! prompt = 0.0
//! completion = 0.0
//! ```

use crate::budget::config::BudgetConfig;
use crate::error::{AdmissionResult, ConfigError};
use crate::estimate::EstimatorKind;
use crate::pricing::{ModelPricing, PricingTable};
use crate::router::policy::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_AUDIT_LOG: &str = "TOKEN_AUDIT_LOG";
pub const ENV_STATE_PATH: &str = "TIERGATE_STATE_PATH";
pub const ENV_PERSIST_TIMEOUT_MS: &str = "TIERGATE_PERSIST_TIMEOUT_MS";

pub const DEFAULT_PERSIST_TIMEOUT_MS: u64 = 2000;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub routing: RoutingPolicy,
    pub budgets: BudgetConfig,
    /// Merged over the built-in pricing table
    pub pricing: BTreeMap<String, ModelPricing>,
    pub audit_log_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub persist_timeout_ms: u64,
    /// Used when a request carries no unit estimate
    pub estimator: EstimatorKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::default(),
            budgets: BudgetConfig::default(),
            pricing: BTreeMap::new(),
            audit_log_path: None,
            state_path: None,
            persist_timeout_ms: DEFAULT_PERSIST_TIMEOUT_MS,
            estimator: EstimatorKind::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Override fields from process environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_AUDIT_LOG).filter(|v| !v.is_empty()) {
            self.audit_log_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_STATE_PATH).filter(|v| !v.is_empty()) {
            self.state_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = lookup(ENV_PERSIST_TIMEOUT_MS) {
            if let Ok(n) = ms.trim().parse() {
                self.persist_timeout_ms = n;
            }
        }
    }

    /// Built-in pricing with this config's overrides applied
    pub fn pricing_table(&self) -> PricingTable {
        PricingTable::default().with_overrides(&self.pricing)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    /// Validate everything once at load time. Returns warnings to log.
    pub fn validate(&self) -> AdmissionResult<Vec<String>> {
        let mut warnings = self.routing.validate()?;
        warnings.extend(self.budgets.validate()?);

        for (resource, rates) in &self.pricing {
            let rates_ok = [rates.prompt, rates.completion]
                .iter()
                .all(|r| r.is_finite() && *r >= 0.0);
            if !rates_ok {
                return Err(ConfigError::invalid(
                    format!("pricing.{}", resource),
                    "rates must be finite and >= 0",
                )
                .into());
            }
        }

        let table = self.pricing_table();
        for (tier, resource) in &self.routing.defaults {
            if !table.contains(resource) {
                warnings.push(format!(
                    "resource `{}` for tier `{}` has no pricing entry and will be treated as free",
                    resource, tier
                ));
            }
        }

        if self.persist_timeout_ms == 0 {
            warnings
                .push("persist_timeout_ms is 0; every snapshot write will time out".to_string());
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdmissionError, RoutingError};
    use crate::router::classifier::TaskCategory;
    use crate::router::policy::ResourceTier;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            audit_log_path = "/tmp/audit.jsonl"
            persist_timeout_ms = 500
            estimator = "word_count"

            [routing]
            max_attempts = 4

            [routing.defaults]
            cheap = "local/llama"

            [routing.routes]
            extract = "mid"

            [budgets]
            max_daily_cost_usd = 10.0

            [budgets.alert_thresholds]
            daily_cost_usd = 8.0

            [pricing."local/llama"]
            prompt = 0.0001
            completion = 0.0002
            "#,
        )
        .unwrap();

        assert_eq!(config.audit_log_path, Some(PathBuf::from("/tmp/audit.jsonl")));
        assert_eq!(config.persist_timeout(), Duration::from_millis(500));
        assert_eq!(config.estimator, EstimatorKind::WordCount);
        assert_eq!(config.routing.max_attempts, 4);
        assert_eq!(config.routing.tier_for(TaskCategory::Extract), ResourceTier::Mid);
        assert_eq!(config.budgets.max_daily_cost_usd, 10.0);
        assert_eq!(config.budgets.max_cost_per_task_usd, 5.0);
        assert_eq!(
            config.pricing_table().lookup("local/llama"),
            ModelPricing::new(0.0001, 0.0002)
        );
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_unpriced_default_resource_warns() {
        let config = EngineConfig::from_toml_str(
            r#"
            [routing.defaults]
            high = "acme/unlisted"
            "#,
        )
        .unwrap();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("acme/unlisted"));
    }

    #[test]
    fn test_unconfigured_tier_fails_validation() {
        let mut config = EngineConfig::default();
        config.routing.escalation =
            vec![ResourceTier::Cheap, ResourceTier::Mid, ResourceTier::High];
        config.routing.defaults.remove(&ResourceTier::Mid);
        assert!(matches!(
            config.validate(),
            Err(AdmissionError::Routing(RoutingError::UnconfiguredTier { .. }))
        ));
    }

    #[test]
    fn test_negative_pricing_fails_validation() {
        let mut config = EngineConfig::default();
        config
            .pricing
            .insert("x/y".into(), ModelPricing::new(-1.0, 0.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = EngineConfig::from_toml_str("[routing\nmax_attempts = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            (ENV_AUDIT_LOG, "/data/audit.jsonl"),
            (ENV_STATE_PATH, ""),
            (ENV_PERSIST_TIMEOUT_MS, "not-a-number"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.audit_log_path, Some(PathBuf::from("/data/audit.jsonl")));
        assert_eq!(config.state_path, None);
        assert_eq!(config.persist_timeout_ms, DEFAULT_PERSIST_TIMEOUT_MS);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[budgets]\nmax_units_per_task = 1000").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.budgets.max_units_per_task, 1000);

        let missing = EngineConfig::from_file(Path::new("/nonexistent/tiergate.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
