use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::errors::ConfigError;
use crate::timestamps::TimestampSource;

const ENV_PREFIX: &str = "GHI_STATS_";

/// Settings shared by every pipeline operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Property holding the cell value. Inferred per file when unset.
    pub value_property: Option<String>,
    /// Property consulted when a feature has no top-level `id`.
    pub id_property: String,
    /// Duration of one raw sample.
    pub interval_hours: f64,
    /// Origin of hour-index file names (`<n>-...`).
    pub epoch: NaiveDateTime,
    pub timestamp_source: TimestampSource,
    pub timestamp_property: String,
    pub workers: Option<usize>,
    pub parallel_read: bool,
    pub progress: bool,
    /// Glob applied to file names during discovery.
    pub file_pattern: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            value_property: None,
            id_property: "cell_id".to_string(),
            interval_hours: 1.0,
            epoch: default_epoch(),
            timestamp_source: TimestampSource::Auto,
            timestamp_property: "time_stamp".to_string(),
            workers: None,
            parallel_read: false,
            progress: true,
            file_pattern: "*".to_string(),
        }
    }
}

fn default_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2007, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl PipelineConfig {
    /// Defaults overlaid with `GHI_STATS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values found by `lookup` (keyed by full variable name).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = get("VALUE_PROPERTY") {
            self.value_property = Some(value);
        }
        if let Some(value) = get("ID_PROPERTY") {
            self.id_property = value;
        }
        if let Some(value) = get("INTERVAL_HOURS") {
            self.interval_hours = value.parse().map_err(|e| invalid("interval_hours", e))?;
        }
        if let Some(value) = get("EPOCH") {
            self.epoch = value.parse().map_err(|e| invalid("epoch", e))?;
        }
        if let Some(value) = get("TIMESTAMP_SOURCE") {
            self.timestamp_source = value.parse().map_err(|e| invalid("timestamp_source", e))?;
        }
        if let Some(value) = get("WORKERS") {
            self.workers = Some(value.parse().map_err(|e| invalid("workers", e))?);
        }
        if let Some(value) = get("FILE_PATTERN") {
            self.file_pattern = value;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interval_hours.is_finite() && self.interval_hours > 0.0) {
            return Err(invalid("interval_hours", "must be a positive number"));
        }
        if self.workers == Some(0) {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.id_property.is_empty() {
            return Err(invalid("id_property", "must not be empty"));
        }
        glob::Pattern::new(&self.file_pattern).map_err(|e| invalid("file_pattern", e))?;
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Seconds represented by one raw sample.
    pub fn sample_seconds(&self) -> f64 {
        self.interval_hours * 3600.0
    }
}

fn invalid(field: &str, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Load the configuration from a JSON file. Missing fields take defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let config: PipelineConfig =
        serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParse {
            path: path.to_path_buf(),
            source: e,
        })?;
    config.validate()?;
    Ok(config)
}
