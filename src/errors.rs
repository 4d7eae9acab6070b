use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::data_models::CellId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Pipeline stage names, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Integrate,
    ToRows,
    FromRows,
    Rollup,
    Enrich,
    Split,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Integrate => "integrate",
            Stage::ToRows => "tocsv",
            Stage::FromRows => "fix",
            Stage::Rollup => "rollup",
            Stage::Enrich => "addlatlon",
            Stage::Split => "split",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration parsing failed: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Timestamp parsing error in {artifact} for value '{value}': {message}")]
    Timestamp {
        artifact: String,
        value: String,
        message: String,
    },

    #[error("Malformed document {artifact}: {message}")]
    MalformedDocument { artifact: String, message: String },
    #[error("Out-of-order input {artifact}: {period} precedes {open}")]
    OutOfOrder {
        artifact: String,
        period: String,
        open: String,
    },
    #[error("Geometry conflict for cell {cell} in {artifact}: geometry differs from the registered one")]
    GeometryConflict { cell: CellId, artifact: String },
    #[error("Unknown cell {cell} referenced by {artifact}")]
    UnknownCell { cell: CellId, artifact: String },
    #[error("Duplicate row for cell {cell} at {timestamp} in {artifact}")]
    DuplicateRow {
        cell: CellId,
        timestamp: String,
        artifact: String,
    },
    #[error("Invalid granularity for {artifact}: {message}")]
    InvalidGranularity { artifact: String, message: String },
    #[error("Degenerate geometry for cell {cell} in {artifact}: {message}")]
    DegenerateGeometry {
        cell: CellId,
        artifact: String,
        message: String,
    },

    #[error("Output directory {path} {message}")]
    OutputDirectory { path: PathBuf, message: String },
    #[error("Run cancelled")]
    Cancelled,

    #[error("Stage '{stage}' failed on {artifact}: {source}")]
    Stage {
        stage: Stage,
        artifact: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Short stable name of the error kind. Looks through `Stage` wrappers.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "ConfigError",
            PipelineError::Io { .. } => "IoError",
            PipelineError::Json { .. } => "MalformedDocumentError",
            PipelineError::Csv { .. } => "MalformedDocumentError",
            PipelineError::Timestamp { .. } => "TimestampError",
            PipelineError::MalformedDocument { .. } => "MalformedDocumentError",
            PipelineError::OutOfOrder { .. } => "OutOfOrderError",
            PipelineError::GeometryConflict { .. } => "GeometryConflictError",
            PipelineError::UnknownCell { .. } => "UnknownCellError",
            PipelineError::DuplicateRow { .. } => "DuplicateRowError",
            PipelineError::InvalidGranularity { .. } => "InvalidGranularityError",
            PipelineError::DegenerateGeometry { .. } => "DegenerateGeometryError",
            PipelineError::OutputDirectory { .. } => "OutputDirectoryError",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::Stage { source, .. } => source.kind(),
        }
    }

    /// Wrap the error with the stage and the artifact it was raised for.
    /// Already wrapped errors are returned unchanged.
    pub fn in_stage(self, stage: Stage, artifact: impl Into<String>) -> PipelineError {
        match self {
            PipelineError::Stage { .. } => self,
            other => PipelineError::Stage {
                stage,
                artifact: artifact.into(),
                source: Box::new(other),
            },
        }
    }

    /// The input file, row or document the error was raised for.
    pub fn artifact(&self) -> String {
        match self {
            PipelineError::Io { path, .. }
            | PipelineError::Json { path, .. }
            | PipelineError::Csv { path, .. }
            | PipelineError::OutputDirectory { path, .. } => path.display().to_string(),
            PipelineError::Timestamp { artifact, .. }
            | PipelineError::MalformedDocument { artifact, .. }
            | PipelineError::OutOfOrder { artifact, .. }
            | PipelineError::GeometryConflict { artifact, .. }
            | PipelineError::UnknownCell { artifact, .. }
            | PipelineError::DuplicateRow { artifact, .. }
            | PipelineError::InvalidGranularity { artifact, .. }
            | PipelineError::DegenerateGeometry { artifact, .. }
            | PipelineError::Stage { artifact, .. } => artifact.clone(),
            PipelineError::Config(_) => "configuration".to_string(),
            PipelineError::Cancelled => "-".to_string(),
        }
    }

    /// The innermost error, skipping the `Stage` wrapper.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
