//! Per-run configuration.
//!
//! A [RunConfig] is always handed to [crate::Flow] explicitly.
//! Nothing in this crate reads the environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// The backends that take part in a run, by registered name.
    /// The first one is the reference of the equivalence check.
    pub backends: Vec<String>,
    /// Prepended to every stage name when outputs are stored.
    pub namespace_prefix: String,
    /// Relative tolerance for comparing floats across backends.
    pub tolerance: f64,
    pub max_workers: usize,
    /// Recompute every task. Results are still stored.
    pub ignore_cache: bool,
    /// Once a task fails, start no other task of its stage.
    pub stop_stage_on_failure: bool,
    /// Replaces the stage name itself, per stage.
    pub stage_namespaces: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backends: vec!["eager".into(), "sqlite".into(), "raw_sqlite".into()],
            namespace_prefix: String::new(),
            tolerance: DEFAULT_TOLERANCE,
            max_workers: 4,
            ignore_cache: false,
            stop_stage_on_failure: false,
            stage_namespaces: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;

        let config: Self = toml::from_str(&content).map_err(|error| ConfigError::TomlFile {
            path: path.to_path_buf(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("`max_workers` must be at least 1".into()));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "`tolerance` must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        let mut seen = Vec::with_capacity(self.backends.len());
        for name in &self.backends {
            if seen.contains(&name) {
                return Err(ConfigError::Invalid(format!("backend `{name}` is listed twice")));
            }
            seen.push(name);
        }
        Ok(())
    }

    /// The namespace the outputs of `stage` are stored under.
    pub fn namespace(&self, stage: &str) -> String {
        let stage = self.stage_namespaces.get(stage).map_or(stage, |s| s.as_str());
        format!("{}{}", self.namespace_prefix, stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_files_keep_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            backends = ["eager", "sqlite"]
            tolerance = 1e-6

            [stage_namespaces]
            load = "raw"
            "#,
        )
        .unwrap();
        assert_eq!(config.backends, ["eager", "sqlite"]);
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.max_workers, 4);
        assert!(!config.ignore_cache);
        assert_eq!(config.namespace("load"), "raw");
        assert_eq!(config.namespace("transform"), "transform");
    }

    #[test]
    fn prefix_applies_to_overrides() {
        let config = RunConfig {
            namespace_prefix: "nightly.".into(),
            stage_namespaces: [("load".to_owned(), "raw".to_owned())].into(),
            ..RunConfig::default()
        };
        assert_eq!(config.namespace("load"), "nightly.raw");
        assert_eq!(config.namespace("check"), "nightly.check");
    }

    #[test]
    fn rejects_nonsense() {
        assert!(matches!(
            RunConfig::from_toml_str("max_workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str("tolerance = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RunConfig::from_toml_str(r#"backends = ["eager", "eager"]"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(RunConfig::from_toml_str("workers = 2"), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = RunConfig {
            ignore_cache: true,
            ..RunConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }
}
