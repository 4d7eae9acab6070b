use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::data_models::Document;
use crate::errors::{ConfigError, PipelineError, Result};
use crate::metrics::METRICS;
use crate::parsers::json_parser::{self, CodecOptions};
use crate::timestamps::{start_from_file_name, TimestampResolver};

/// How discovered files are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOrder {
    /// By start instant derived from the file name, unresolvable names last.
    Timestamp,
    /// Lexicographically by file name.
    Name,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List the input files of `input`: the file itself, or the regular,
/// non-hidden files directly inside the directory that match
/// `config.file_pattern` (and `extension`, when given).
pub fn discover_files(
    input: &Path,
    config: &PipelineConfig,
    extension: Option<&str>,
    order: FileOrder,
) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(PipelineError::Io {
            path: input.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "input is neither a file nor a directory",
            ),
        });
    }

    let pattern = Pattern::new(&config.file_pattern).map_err(|e| {
        PipelineError::Config(ConfigError::InvalidValue {
            field: "file_pattern".to_string(),
            message: e.to_string(),
        })
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(input).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| PipelineError::Io {
            path: input.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !pattern.matches(&name) {
            continue;
        }
        if let Some(ext) = extension {
            if entry.path().extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
        }
        files.push(entry.into_path());
    }

    match order {
        FileOrder::Name => files.sort_by_key(|p| file_name(p)),
        FileOrder::Timestamp => files.sort_by_cached_key(|p| {
            let name = file_name(p);
            let start = start_from_file_name(&name, config);
            (start.is_none(), start, name)
        }),
    }
    info!("Discovered {} input files in {}", files.len(), input.display());
    Ok(files)
}

/// The output directory must already exist and be empty.
pub fn prepare_output_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(PipelineError::OutputDirectory {
            path: path.to_path_buf(),
            message: "must already exist".to_string(),
        });
    }
    let mut entries = fs::read_dir(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if entries.next().is_some() {
        return Err(PipelineError::OutputDirectory {
            path: path.to_path_buf(),
            message: "must be empty".to_string(),
        });
    }
    Ok(())
}

/// Parse one input file into its documents, recording metrics.
pub fn process_file(
    path: &Path,
    options: &CodecOptions,
    resolver: &dyn TimestampResolver,
) -> Result<Vec<Document>> {
    METRICS.lock().record_file_attempt();
    match json_parser::read_documents(path, options, resolver) {
        Ok(documents) => {
            debug!("Processed {} ({} documents)", path.display(), documents.len());
            METRICS
                .lock()
                .record_file_success(documents.len() as u64, json_parser::file_size(path));
            Ok(documents)
        }
        Err(e) => {
            error!("Failed to process {}: {}", path.display(), e);
            METRICS.lock().record_file_failure();
            Err(e)
        }
    }
}

/// Progress bar over input files; hidden when progress output is off.
pub fn file_progress(len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress
}

/// Lazy, file-at-a-time stream of documents. Stops after the first error.
pub struct DocumentStream<'a> {
    files: VecDeque<PathBuf>,
    buffer: VecDeque<Document>,
    options: &'a CodecOptions,
    resolver: &'a dyn TimestampResolver,
    progress: ProgressBar,
    failed: bool,
}

impl<'a> DocumentStream<'a> {
    pub fn new(
        files: Vec<PathBuf>,
        options: &'a CodecOptions,
        resolver: &'a dyn TimestampResolver,
        show_progress: bool,
    ) -> Self {
        let progress = file_progress(files.len(), show_progress);
        Self {
            files: files.into(),
            buffer: VecDeque::new(),
            options,
            resolver,
            progress,
            failed: false,
        }
    }
}

impl Iterator for DocumentStream<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Some(Ok(document));
            }
            if self.failed {
                return None;
            }
            let Some(path) = self.files.pop_front() else {
                self.progress.finish_and_clear();
                return None;
            };
            match process_file(&path, self.options, self.resolver) {
                Ok(documents) => {
                    self.buffer.extend(documents);
                    self.progress.inc(1);
                }
                Err(e) => {
                    self.failed = true;
                    self.progress.abandon();
                    return Some(Err(e));
                }
            }
        }
    }
}
