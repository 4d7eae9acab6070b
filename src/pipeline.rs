//! Directory-in/directory-out operations.
//!
//! Every operation checks that the output directory exists and is empty,
//! discovers its inputs, streams them through the matching stage and writes
//! results as they are produced. `from_rows` is the exception: it rebuilds
//! every document in memory first so that a failing run writes nothing.

use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::bridge::{self, FromRowsOptions, RowAssembler};
use crate::config::PipelineConfig;
use crate::data_models::{Document, Granularity};
use crate::enrich::{Enricher, GridProjection};
use crate::errors::{PipelineError, Result, Stage};
use crate::file_processor::{discover_files, prepare_output_dir, DocumentStream, FileOrder};
use crate::integration::{AggregationMode, CancellationToken, IntegrationEngine};
use crate::metrics::METRICS;
use crate::parallel::ParallelReader;
use crate::parsers::csv_parser::{RowReader, RowWriter};
use crate::parsers::json_parser::{self, CodecOptions};
use crate::registry::CellRegistry;
use crate::rollup::PeriodRollup;
use crate::timestamps::{resolver_for, ChainResolver, FixedResolver, TimestampResolver};
use crate::utils::output_file_name;
use crate::validation::validate_document;

/// Registry snapshot written next to the row files by `to_rows`.
pub const REGISTRY_SNAPSHOT: &str = "cells.geojson";

/// What one operation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub documents_in: u64,
    pub documents_out: u64,
    pub rows: u64,
    /// Distinct cells known to the registry at the end of the run.
    pub cells: usize,
}

fn staged(stage: Stage) -> impl Fn(PipelineError) -> PipelineError {
    move |error| {
        let artifact = error.artifact();
        error.in_stage(stage, artifact)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    options: CodecOptions,
    resolver: Box<dyn TimestampResolver>,
    cancellation: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let options = CodecOptions {
            value_property: config.value_property.clone(),
            id_property: config.id_property.clone(),
        };
        let resolver = resolver_for(&config);
        Ok(Self {
            config,
            options,
            resolver,
            cancellation: CancellationToken::new(),
        })
    }

    /// Token that stops the running operation at the next document boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn documents<'a>(&'a self, files: Vec<PathBuf>) -> Box<dyn Iterator<Item = Result<Document>> + 'a> {
        if self.config.parallel_read {
            Box::new(ParallelReader::new(
                files,
                self.config.worker_count(),
                &self.options,
                self.resolver.as_ref(),
                self.config.progress,
            ))
        } else {
            Box::new(DocumentStream::new(
                files,
                &self.options,
                self.resolver.as_ref(),
                self.config.progress,
            ))
        }
    }

    fn start(&self, stage: Stage, input: &Path, output: &Path) -> Result<Vec<PathBuf>> {
        info!("Running {} from {} into {}", stage, input.display(), output.display());
        prepare_output_dir(output)?;
        discover_files(input, &self.config, None, FileOrder::Timestamp)
    }

    fn write_document(&self, document: &Document, output: &Path) -> Result<PathBuf> {
        let path = json_parser::write_document(document, output)?;
        METRICS
            .lock()
            .record_document_written(document.len() as u64, json_parser::file_size(&path));
        Ok(path)
    }

    /// Bucket raw documents by `granularity`. `Sum` mode integrates each
    /// sample over the configured interval.
    pub fn integrate(
        &self,
        granularity: Granularity,
        mode: AggregationMode,
        input: &Path,
        output: &Path,
    ) -> Result<RunSummary> {
        self.run_integrate(granularity, mode, input, output)
            .map_err(staged(Stage::Integrate))
    }

    fn run_integrate(
        &self,
        granularity: Granularity,
        mode: AggregationMode,
        input: &Path,
        output: &Path,
    ) -> Result<RunSummary> {
        let files = self.start(Stage::Integrate, input, output)?;
        let mut engine = IntegrationEngine::new(granularity, mode)
            .with_sample_seconds(self.config.sample_seconds())
            .with_cancellation(self.cancellation_token());

        let mut summary = RunSummary::default();
        let mut read = 0u64;
        let documents = self.documents(files).inspect(|d| {
            if d.is_ok() {
                read += 1;
            }
        });
        for aggregated in engine.integrate(documents) {
            self.write_document(&aggregated?, output)?;
            summary.documents_out += 1;
        }
        summary.documents_in = read;
        summary.cells = engine.registry().len();
        info!(
            "Integrated {} documents into {} {} buckets ({})",
            summary.documents_in, summary.documents_out, granularity, mode
        );
        Ok(summary)
    }

    /// One row file per document plus a registry snapshot.
    pub fn to_rows(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        self.run_to_rows(input, output).map_err(staged(Stage::ToRows))
    }

    fn run_to_rows(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        let files = self.start(Stage::ToRows, input, output)?;
        let mut registry = CellRegistry::new();
        let mut summary = RunSummary::default();

        for document in self.documents(files) {
            self.check_cancelled()?;
            let document = document?;
            summary.documents_in += 1;
            registry.observe(&document)?;

            let path = output.join(format!("{}.csv", output_file_name(&document.timestamp)));
            if path.exists() {
                return Err(PipelineError::OutputDirectory {
                    path: output.to_path_buf(),
                    message: format!("already contains {}", path.display()),
                });
            }
            let mut writer = RowWriter::create(&path)?;
            for row in bridge::to_rows(&document) {
                writer.write(&row)?;
            }
            let rows = writer.finish()?;
            METRICS.lock().record_rows_written(rows);
            summary.rows += rows;
            summary.documents_out += 1;
        }

        registry.save(&output.join(REGISTRY_SNAPSHOT))?;
        summary.cells = registry.len();
        info!(
            "Wrote {} rows from {} documents; registry holds {} cells",
            summary.rows, summary.documents_in, summary.cells
        );
        Ok(summary)
    }

    /// Registry from a snapshot file, a directory holding a snapshot, or a
    /// directory of geometry-bearing documents.
    pub fn load_registry(&self, source: &Path) -> Result<CellRegistry> {
        if source.is_file() {
            return CellRegistry::load(source);
        }
        let snapshot = source.join(REGISTRY_SNAPSHOT);
        if snapshot.is_file() {
            return CellRegistry::load(&snapshot);
        }

        // Only geometry is needed; documents whose time cannot be resolved
        // still contribute their cells.
        let resolver = ChainResolver::new(vec![
            resolver_for(&self.config),
            Box::new(FixedResolver(self.config.epoch)),
        ]);
        let files: Vec<PathBuf> = discover_files(source, &self.config, None, FileOrder::Timestamp)?
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) != Some("csv"))
            .collect();
        let mut registry = CellRegistry::new();
        for document in DocumentStream::new(files, &self.options, &resolver, false) {
            registry.observe(&document?)?;
        }
        Ok(registry)
    }

    /// Rebuild documents from the row files in `input`, taking geometry
    /// from `registry_source`. Nothing is written unless every row resolves.
    pub fn from_rows(
        &self,
        input: &Path,
        registry_source: &Path,
        output: &Path,
        options: FromRowsOptions,
    ) -> Result<RunSummary> {
        self.run_from_rows(input, registry_source, output, options)
            .map_err(staged(Stage::FromRows))
    }

    fn run_from_rows(
        &self,
        input: &Path,
        registry_source: &Path,
        output: &Path,
        options: FromRowsOptions,
    ) -> Result<RunSummary> {
        info!("Running {} from {} into {}", Stage::FromRows, input.display(), output.display());
        prepare_output_dir(output)?;
        let registry = self.load_registry(registry_source)?;
        info!("Registry holds {} cells", registry.len());

        let files = discover_files(input, &self.config, Some("csv"), FileOrder::Name)?;
        let mut assembler = RowAssembler::new(&registry, options);
        for path in &files {
            self.check_cancelled()?;
            let artifact = path.display().to_string();
            let reader = RowReader::open(path)?;
            let before = assembler.rows();
            for row in reader {
                assembler.push(row?, &artifact)?;
            }
            METRICS.lock().record_rows_read(assembler.rows() - before);
        }

        let rows = assembler.rows();
        let documents = assembler.finish();
        for document in &documents {
            validate_document(document)?;
        }
        if documents.is_empty() {
            warn!("No rows found in {}", input.display());
        }
        for document in &documents {
            self.write_document(document, output)?;
        }

        let summary = RunSummary {
            documents_in: files.len() as u64,
            documents_out: documents.len() as u64,
            rows,
            cells: registry.len(),
        };
        info!(
            "Rebuilt {} documents from {} rows",
            summary.documents_out, summary.rows
        );
        Ok(summary)
    }

    /// Sum already aggregated documents into `target` periods.
    pub fn rollup(&self, target: Granularity, input: &Path, output: &Path) -> Result<RunSummary> {
        self.run_rollup(target, input, output)
            .map_err(staged(Stage::Rollup))
    }

    fn run_rollup(&self, target: Granularity, input: &Path, output: &Path) -> Result<RunSummary> {
        let mut rollup = PeriodRollup::new(target)?.with_cancellation(self.cancellation_token());
        let files = self.start(Stage::Rollup, input, output)?;

        let mut summary = RunSummary::default();
        let mut read = 0u64;
        let documents = self.documents(files).inspect(|d| {
            if d.is_ok() {
                read += 1;
            }
        });
        for rolled in rollup.rollup(documents) {
            self.write_document(&rolled?, output)?;
            summary.documents_out += 1;
        }
        summary.documents_in = read;
        summary.cells = rollup.into_registry().len();
        info!(
            "Rolled {} documents up into {} {} documents",
            summary.documents_in, summary.documents_out, target
        );
        Ok(summary)
    }

    /// Attach `lon`/`lat` to every cell, optionally projecting grid-index
    /// points through a coordinate table first.
    pub fn enrich(
        &self,
        input: &Path,
        output: &Path,
        projection: Option<GridProjection>,
    ) -> Result<RunSummary> {
        self.run_enrich(input, output, projection)
            .map_err(staged(Stage::Enrich))
    }

    fn run_enrich(
        &self,
        input: &Path,
        output: &Path,
        projection: Option<GridProjection>,
    ) -> Result<RunSummary> {
        let files = self.start(Stage::Enrich, input, output)?;
        let enricher = match projection {
            Some(projection) => Enricher::new().with_projection(projection),
            None => Enricher::new(),
        };
        let mut registry = CellRegistry::new();
        let mut summary = RunSummary::default();

        for document in self.documents(files) {
            self.check_cancelled()?;
            let document = document?;
            summary.documents_in += 1;
            let enriched = enricher.enrich(&document)?;
            registry.observe(&enriched)?;
            self.write_document(&enriched, output)?;
            summary.documents_out += 1;
        }
        summary.cells = registry.len();
        info!("Enriched {} documents", summary.documents_out);
        Ok(summary)
    }

    /// Write every timestep of the input files as its own document.
    pub fn split(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        self.run_split(input, output).map_err(staged(Stage::Split))
    }

    fn run_split(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        let files = self.start(Stage::Split, input, output)?;
        let mut summary = RunSummary::default();
        for document in self.documents(files) {
            self.check_cancelled()?;
            let document = document?;
            summary.documents_in += 1;
            self.write_document(&document, output)?;
            summary.documents_out += 1;
        }
        info!("Split into {} documents", summary.documents_out);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn quiet_config() -> PipelineConfig {
        PipelineConfig {
            progress: false,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_output_directory_must_be_empty() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(output.path().join("old.json"), "{}").unwrap();

        let pipeline = Pipeline::new(quiet_config()).unwrap();
        let err = pipeline
            .integrate(Granularity::Day, AggregationMode::Sum, input.path(), output.path())
            .unwrap_err();
        assert_eq!(err.kind(), "OutputDirectoryError");
        assert!(err.to_string().contains("integrate"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            interval_hours: 0.0,
            ..quiet_config()
        };
        assert_eq!(Pipeline::new(config).err().map(|e| e.kind()), Some("ConfigError"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(
            input.path().join("0-0.json"),
            r#"[{"type": "Feature", "id": 1, "geometry": {"type": "Point", "coordinates": [0, 0]},
                 "properties": {"ghi": 1.0}}]"#,
        )
        .unwrap();

        let pipeline = Pipeline::new(quiet_config()).unwrap();
        pipeline.cancellation_token().cancel();
        let err = pipeline.split(input.path(), output.path()).unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }
}
