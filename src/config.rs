use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::page::PageGranularity;
use crate::rollup::Metric;

/// Top-level configuration for a fiberwatch query run.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// NMS connection configuration.
    pub nms: NmsConfig,

    /// The query to run.
    pub query: QueryConfig,
}

/// NMS connection configuration.
#[derive(Debug, Deserialize)]
pub struct NmsConfig {
    /// NMS HTTP endpoint (e.g., "http://localhost:8080").
    pub endpoint: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_nms_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Declared inputs of one rollup query.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Front-end element identifier (`<dma>/<element>`).
    pub front_end_element: String,

    /// Telemetry parameter id whose history is rolled up.
    pub parameter_id: u32,

    /// Parameter id for the OFDMA utilization figure.
    /// Required for the `split_ofdma` metric.
    #[serde(default)]
    pub ofdma_parameter_id: Option<u32>,

    /// Table on the front-end element listing collector ids. Default: 1200500.
    #[serde(default = "default_backend_table_id")]
    pub backend_table_id: u32,

    /// Per-collector entity table of channels/service groups.
    pub entity_table_id: u32,

    /// Requested metric, selecting the output schema.
    pub metric: Metric,

    /// Start of the query range. Default: 24 hours before the end.
    #[serde(default)]
    pub initial_time: Option<DateTime<Utc>>,

    /// End of the query range. Default: now.
    #[serde(default)]
    pub final_time: Option<DateTime<Utc>>,

    /// Unit of work per emitted page. Default: one collector.
    #[serde(default)]
    pub page: PageGranularity,
}

// --- Defaults ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nms_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backend_table_id() -> u32 {
    1_200_500
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.nms.endpoint.is_empty() {
            bail!("nms.endpoint is required");
        }

        self.query.validate()
    }
}

impl QueryConfig {
    /// Validate the query inputs.
    ///
    /// A malformed front-end element id is deliberately not rejected
    /// here: it resolves to an empty topology at query time.
    pub fn validate(&self) -> Result<()> {
        if self.front_end_element.is_empty() {
            bail!("query.front_end_element is required");
        }

        if self.parameter_id == 0 {
            bail!("query.parameter_id is required");
        }

        if self.entity_table_id == 0 {
            bail!("query.entity_table_id is required");
        }

        if self.metric == Metric::SplitOfdma && self.ofdma_parameter_id.is_none() {
            bail!("query.ofdma_parameter_id is required for the split_ofdma metric");
        }

        if let (Some(initial), Some(r#final)) = (self.initial_time, self.final_time) {
            if initial >= r#final {
                bail!("query.initial_time must precede query.final_time");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> &'static str {
        r#"
nms:
  endpoint: "http://localhost:8080"
query:
  front_end_element: "152/4007"
  parameter_id: 1100021
  entity_table_id: 1200600
  metric: peak
"#
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg: Config = serde_yaml::from_str(base_yaml()).expect("parses");
        cfg.validate().expect("valid");

        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.nms.timeout, Duration::from_secs(30));
        assert_eq!(cfg.query.backend_table_id, 1_200_500);
        assert_eq!(cfg.query.metric, Metric::Peak);
        assert_eq!(cfg.query.page, PageGranularity::Collector);
        assert!(cfg.query.initial_time.is_none());
    }

    #[test]
    fn test_full_query_config() {
        let yaml = r#"
log_level: debug
nms:
  endpoint: "http://nms:8080"
  timeout: 10s
query:
  front_end_element: "152/4007"
  parameter_id: 1100021
  ofdma_parameter_id: 1100050
  backend_table_id: 1300000
  entity_table_id: 1200600
  metric: split_ofdma
  initial_time: "2024-04-01T00:00:00Z"
  final_time: "2024-04-02T00:00:00Z"
  page: backlog
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parses");
        cfg.validate().expect("valid");

        assert_eq!(cfg.nms.timeout, Duration::from_secs(10));
        assert_eq!(cfg.query.metric, Metric::SplitOfdma);
        assert_eq!(cfg.query.page, PageGranularity::Backlog);
        assert_eq!(cfg.query.ofdma_parameter_id, Some(1100050));
    }

    #[test]
    fn test_split_ofdma_requires_ofdma_parameter() {
        let mut cfg: Config = serde_yaml::from_str(base_yaml()).expect("parses");
        cfg.query.metric = Metric::SplitOfdma;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_time_range_rejected() {
        let mut cfg: Config = serde_yaml::from_str(base_yaml()).expect("parses");
        cfg.query.initial_time = Some("2024-04-02T00:00:00Z".parse().expect("time"));
        cfg.query.final_time = Some("2024-04-01T00:00:00Z".parse().expect("time"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_front_end_element_is_accepted() {
        // Resolution handles it by returning an empty topology.
        let mut cfg: Config = serde_yaml::from_str(base_yaml()).expect("parses");
        cfg.query.front_end_element = "abc".to_string();
        cfg.validate().expect("still valid");
    }
}
