//! Resolution of document timestamps from file names and embedded metadata.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::utils::parse_timestamp;

/// Which strategy the resolver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Embedded metadata, then file name, then hour index.
    Auto,
    Embedded,
    FileName,
    HourIndex,
}

impl FromStr for TimestampSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(TimestampSource::Auto),
            "embedded" | "property" => Ok(TimestampSource::Embedded),
            "file_name" | "filename" | "name" => Ok(TimestampSource::FileName),
            "hour_index" | "index" => Ok(TimestampSource::HourIndex),
            other => Err(format!("unknown timestamp source '{}'", other)),
        }
    }
}

/// What a resolver can look at for one document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSource<'a> {
    pub path: &'a Path,
    /// Position of the document inside a multi-timestep file.
    pub index: usize,
    /// `timestamp` member of the enclosing FeatureCollection.
    pub embedded: Option<&'a str>,
    /// Properties of the first feature.
    pub properties: Option<&'a serde_json::Map<String, serde_json::Value>>,
}

impl<'a> DocumentSource<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self {
            path,
            index: 0,
            embedded: None,
            properties: None,
        }
    }

    fn artifact(&self) -> String {
        format!("{}[{}]", self.path.display(), self.index)
    }

    fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Deterministic mapping from a document's origin to its point in time.
pub trait TimestampResolver: Send + Sync {
    fn resolve(&self, source: &DocumentSource<'_>) -> Result<NaiveDateTime>;
}

fn not_resolved(source: &DocumentSource<'_>, value: &str, message: &str) -> PipelineError {
    PipelineError::Timestamp {
        artifact: source.artifact(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

/// `index` intervals after a start; `None` when the offset leaves the
/// representable range.
fn offset(start: NaiveDateTime, interval_hours: f64, index: usize) -> Option<NaiveDateTime> {
    let millis = (interval_hours * 3_600_000.0 * index as f64).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let step = Duration::try_milliseconds(millis as i64)?;
    start.checked_add_signed(step)
}

/// Reads the collection `timestamp` member, falling back to a feature property.
#[derive(Debug, Clone)]
pub struct EmbeddedResolver {
    pub property: String,
}

impl TimestampResolver for EmbeddedResolver {
    fn resolve(&self, source: &DocumentSource<'_>) -> Result<NaiveDateTime> {
        let raw = source.embedded.map(str::to_string).or_else(|| {
            source
                .properties
                .and_then(|p| p.get(&self.property))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        match raw {
            Some(raw) => parse_timestamp(&raw)
                .ok_or_else(|| not_resolved(source, &raw, "unrecognised timestamp format")),
            None => Err(not_resolved(source, "", "no embedded timestamp")),
        }
    }
}

/// File names of the form `2007-01-01T000000.000Z`, offset by the
/// time index for multi-timestep files.
#[derive(Debug, Clone)]
pub struct FileNameResolver {
    pub interval_hours: f64,
}

impl FileNameResolver {
    pub fn start_of(name: &str) -> Option<NaiveDateTime> {
        let stem = [".geojson", ".json", ".csv"]
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
            .unwrap_or(name);
        parse_timestamp(stem)
    }
}

impl TimestampResolver for FileNameResolver {
    fn resolve(&self, source: &DocumentSource<'_>) -> Result<NaiveDateTime> {
        let name = source.file_name();
        let start = FileNameResolver::start_of(name)
            .ok_or_else(|| not_resolved(source, name, "file name is not an ISO timestamp"))?;
        offset(start, self.interval_hours, source.index)
            .ok_or_else(|| not_resolved(source, name, "time index out of range"))
    }
}

/// File names prefixed with an hour index, `<n>-...`, counted from `epoch`.
#[derive(Debug, Clone)]
pub struct HourIndexResolver {
    pub epoch: NaiveDateTime,
    pub interval_hours: f64,
}

impl HourIndexResolver {
    pub fn start_index(name: &str) -> Option<u64> {
        let (prefix, _) = name.split_once('-')?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        prefix.parse().ok()
    }
}

impl TimestampResolver for HourIndexResolver {
    fn resolve(&self, source: &DocumentSource<'_>) -> Result<NaiveDateTime> {
        let name = source.file_name();
        let start = HourIndexResolver::start_index(name)
            .ok_or_else(|| not_resolved(source, name, "file name has no '<index>-' prefix"))?;
        usize::try_from(start)
            .ok()
            .and_then(|index| index.checked_add(source.index))
            .and_then(|index| offset(self.epoch, self.interval_hours, index))
            .ok_or_else(|| not_resolved(source, name, "hour index out of range"))
    }
}

/// Tries each resolver in order and returns the first success.
pub struct ChainResolver {
    resolvers: Vec<Box<dyn TimestampResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Box<dyn TimestampResolver>>) -> Self {
        Self { resolvers }
    }
}

impl TimestampResolver for ChainResolver {
    fn resolve(&self, source: &DocumentSource<'_>) -> Result<NaiveDateTime> {
        let mut reasons = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(source) {
                Ok(ts) => return Ok(ts),
                Err(PipelineError::Timestamp { message, .. }) => reasons.push(message),
                Err(other) => return Err(other),
            }
        }
        Err(not_resolved(
            source,
            source.file_name(),
            &format!("no strategy matched ({})", reasons.join("; ")),
        ))
    }
}

/// Always answers the same instant. Used where only geometry matters.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub NaiveDateTime);

impl TimestampResolver for FixedResolver {
    fn resolve(&self, _source: &DocumentSource<'_>) -> Result<NaiveDateTime> {
        Ok(self.0)
    }
}

/// Resolver matching the configured `timestamp_source`.
pub fn resolver_for(config: &PipelineConfig) -> Box<dyn TimestampResolver> {
    let embedded = || EmbeddedResolver {
        property: config.timestamp_property.clone(),
    };
    let file_name = || FileNameResolver {
        interval_hours: config.interval_hours,
    };
    let hour_index = || HourIndexResolver {
        epoch: config.epoch,
        interval_hours: config.interval_hours,
    };
    match config.timestamp_source {
        TimestampSource::Embedded => Box::new(embedded()),
        TimestampSource::FileName => Box::new(file_name()),
        TimestampSource::HourIndex => Box::new(hour_index()),
        TimestampSource::Auto => Box::new(ChainResolver::new(vec![
            Box::new(embedded()),
            Box::new(file_name()),
            Box::new(hour_index()),
        ])),
    }
}

/// Start instant derivable from a file name alone; used to order discovery.
pub fn start_from_file_name(name: &str, config: &PipelineConfig) -> Option<NaiveDateTime> {
    FileNameResolver::start_of(name).or_else(|| {
        HourIndexResolver::start_index(name)
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|n| offset(config.epoch, config.interval_hours, n))
    })
}
