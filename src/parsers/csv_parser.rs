use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::data_models::{CellId, Row};
use crate::errors::{PipelineError, Result};
use crate::utils::{format_timestamp, parse_timestamp};

pub const ROW_HEADER: [&str; 3] = ["cell_id", "timestamp", "value"];

// Accepted header spellings, lower-cased. The forecasting tool is not
// consistent about them.
const ID_HEADERS: [&str; 3] = ["cell_id", "id", "location"];
const TIME_HEADERS: [&str; 4] = ["timestamp", "time", "time_stamp", "date"];
const VALUE_HEADERS: [&str; 5] = ["value", "ghi", "energy", "prediction", "forecast"];

fn csv_error(path: &Path, source: csv::Error) -> PipelineError {
    PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Streams rows into a single CSV file.
pub struct RowWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl RowWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;
        writer
            .write_record(ROW_HEADER)
            .map_err(|e| csv_error(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn write(&mut self, row: &Row) -> Result<()> {
        let id = row.cell_id.to_string();
        let timestamp = format_timestamp(&row.timestamp);
        let value = row.value.to_string();
        self.writer
            .write_record([id.as_str(), timestamp.as_str(), value.as_str()])
            .map_err(|e| csv_error(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes and returns the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().map_err(|e| PipelineError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(self.rows)
    }
}

/// Column positions resolved from the header line.
#[derive(Debug, Clone, Copy)]
struct RowColumns {
    id: usize,
    timestamp: usize,
    value: usize,
}

impl RowColumns {
    fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self> {
        let header_map: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(index, header)| (header.trim().to_lowercase(), index))
            .collect();
        let find = |names: &[&str], what: &str| {
            names
                .iter()
                .find_map(|n| header_map.get(*n).copied())
                .ok_or_else(|| PipelineError::MalformedDocument {
                    artifact: path.display().to_string(),
                    message: format!("no {} column in header {:?}", what, headers),
                })
        };
        Ok(Self {
            id: find(&ID_HEADERS, "cell id")?,
            timestamp: find(&TIME_HEADERS, "timestamp")?,
            value: find(&VALUE_HEADERS, "value")?,
        })
    }
}

/// Lazily reads rows from one CSV file.
pub struct RowReader {
    path: PathBuf,
    records: csv::StringRecordsIntoIter<File>,
    columns: RowColumns,
    line: usize,
}

impl RowReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;
        let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
        let columns = RowColumns::from_headers(&headers, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            records: reader.into_records(),
            columns,
            line: 1,
        })
    }

    fn parse_record(&self, record: &StringRecord) -> Result<Row> {
        let artifact = || format!("{}:{}", self.path.display(), self.line);
        let field = |index: usize| record.get(index).unwrap_or_default();

        let raw_id = field(self.columns.id);
        if raw_id.is_empty() {
            return Err(PipelineError::MalformedDocument {
                artifact: artifact(),
                message: "empty cell id".to_string(),
            });
        }
        let raw_ts = field(self.columns.timestamp);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| PipelineError::Timestamp {
            artifact: artifact(),
            value: raw_ts.to_string(),
            message: "unrecognised timestamp format".to_string(),
        })?;
        let raw_value = field(self.columns.value);
        let value = raw_value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PipelineError::MalformedDocument {
                artifact: artifact(),
                message: format!("invalid value '{}'", raw_value),
            })?;

        Ok(Row {
            cell_id: CellId::parse(raw_id),
            timestamp,
            value,
        })
    }
}

impl Iterator for RowReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.line += 1;
        Some(
            record
                .map_err(|e| csv_error(&self.path, e))
                .and_then(|r| self.parse_record(&r)),
        )
    }
}
