//! Configuration for pipeline chains and the runtime that drives them.

use crate::error::ErrorPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options shared by every stage of a pipeline chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum transforms running at once within a stage (unbounded if unset)
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Failure handling applied at every barrier
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable metrics collection and progress reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            error_policy: ErrorPolicy::default(),
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: PipelineConfig = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrency == Some(0) {
            anyhow::bail!("max_concurrency must be > 0");
        }
        if self.worker_threads == Some(0) {
            anyhow::bail!("worker_threads must be > 0");
        }
        if self.enable_metrics && self.metrics_interval_secs == 0 {
            anyhow::bail!("metrics_interval_secs must be > 0");
        }
        Ok(())
    }
}

fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.max_concurrency.is_none());
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
        assert!(config.enable_metrics);
        assert_eq!(config.metrics_interval_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = PipelineConfig::from_yaml(
            "max_concurrency: 4\nerror_policy: carry_forward\n",
        )
        .unwrap();
        assert_eq!(config.max_concurrency, Some(4));
        assert_eq!(config.error_policy, ErrorPolicy::CarryForward);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_from_json() {
        let config = PipelineConfig::from_json(
            r#"{"worker_threads": 2, "enable_metrics": false}"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, Some(2));
        assert!(!config.enable_metrics);
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
    }

    #[test]
    fn test_validation_invalid() {
        let config = PipelineConfig {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            metrics_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            metrics_interval_secs: 0,
            enable_metrics: false,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("pipeline.yaml");
        let yaml = PipelineConfig {
            max_concurrency: Some(8),
            error_policy: ErrorPolicy::CarryForward,
            ..Default::default()
        }
        .to_yaml()
        .unwrap();
        std::fs::write(&yaml_path, yaml).unwrap();
        let loaded = PipelineConfig::from_file(&yaml_path).unwrap();
        assert_eq!(loaded.max_concurrency, Some(8));
        assert_eq!(loaded.error_policy, ErrorPolicy::CarryForward);

        let json_path = dir.path().join("pipeline.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        file.write_all(br#"{"max_concurrency": 3}"#).unwrap();
        let loaded = PipelineConfig::from_file(&json_path).unwrap();
        assert_eq!(loaded.max_concurrency, Some(3));

        let missing = dir.path().join("missing.yaml");
        assert!(PipelineConfig::from_file(&missing).is_err());
    }
}
