//! Streaming period aggregation of timestepped grid documents.
//!
//! Documents must arrive in non-decreasing timestamp order. At most one
//! bucket is open at a time; it is closed and emitted as soon as a document
//! of a later period shows up, or when the input ends. An open bucket is
//! never emitted after an error or a cancellation.

use chrono::NaiveDateTime;
use log::{debug, info};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::data_models::{Cell, CellId, Document, Granularity};
use crate::errors::{PipelineError, Result};
use crate::geometry::Geometry;
use crate::parsers::json_parser::SAMPLES_PROPERTY;
use crate::registry::CellRegistry;

/// How a bucket's sums and counts are combined on emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// `sum / count`, for instantaneous rates.
    Average,
    /// `sum`, for energy-like quantities.
    Sum,
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMode::Average => f.write_str("average"),
            AggregationMode::Sum => f.write_str("sum"),
        }
    }
}

impl FromStr for AggregationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(AggregationMode::Average),
            "sum" | "integrate" => Ok(AggregationMode::Sum),
            other => Err(format!("unknown aggregation mode '{}'", other)),
        }
    }
}

/// Shared flag checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Accumulation state for one period.
#[derive(Debug)]
struct Bucket {
    period: NaiveDateTime,
    value_property: String,
    sums: HashMap<CellId, f64>,
    counts: HashMap<CellId, u64>,
    geometry: HashMap<CellId, Geometry>,
    /// First-seen cell order.
    order: Vec<CellId>,
    documents: usize,
}

impl Bucket {
    fn open(period: NaiveDateTime, value_property: &str) -> Self {
        Self {
            period,
            value_property: value_property.to_string(),
            sums: HashMap::new(),
            counts: HashMap::new(),
            geometry: HashMap::new(),
            order: Vec::new(),
            documents: 0,
        }
    }

    fn fold(&mut self, document: &Document, weight: f64) {
        for cell in &document.cells {
            if !self.geometry.contains_key(&cell.id) {
                self.geometry.insert(cell.id.clone(), cell.geometry.clone());
                self.order.push(cell.id.clone());
            }
            *self.sums.entry(cell.id.clone()).or_insert(0.0) += cell.value * weight;
            *self.counts.entry(cell.id.clone()).or_insert(0) += 1;
        }
        self.documents += 1;
    }

    fn close(mut self, granularity: Granularity, mode: AggregationMode, property: &str) -> Document {
        let cells = self
            .order
            .iter()
            .filter_map(|id| {
                let geometry = self.geometry.remove(id)?;
                let sum = self.sums.get(id).copied().unwrap_or(0.0);
                let count = self.counts.get(id).copied().unwrap_or(0);
                let value = match mode {
                    AggregationMode::Average if count > 0 => sum / count as f64,
                    AggregationMode::Average => 0.0,
                    AggregationMode::Sum => sum,
                };
                let mut cell = Cell::new(id.clone(), geometry, value);
                cell.properties
                    .insert(SAMPLES_PROPERTY.to_string(), json!(count));
                Some(cell)
            })
            .collect();

        info!(
            "Closed {} bucket {} ({} cells from {} documents)",
            granularity,
            self.period,
            self.order.len(),
            self.documents
        );
        Document::new(self.period, property, cells).with_granularity(granularity)
    }
}

/// Buckets an ordered document stream by period.
///
/// The engine owns the [`CellRegistry`] while it runs; every incoming
/// document is observed, so geometry conflicts anywhere in the run are
/// reported. Take the registry with [`IntegrationEngine::into_registry`]
/// once iteration has finished.
#[derive(Debug)]
pub struct IntegrationEngine {
    granularity: Granularity,
    mode: AggregationMode,
    sample_weight: f64,
    registry: CellRegistry,
    cancellation: Option<CancellationToken>,
}

impl IntegrationEngine {
    pub fn new(granularity: Granularity, mode: AggregationMode) -> Self {
        Self {
            granularity,
            mode,
            sample_weight: 1.0,
            registry: CellRegistry::new(),
            cancellation: None,
        }
    }

    /// Duration of one sample in seconds; `Sum` mode multiplies by it.
    pub fn with_sample_seconds(mut self, seconds: f64) -> Self {
        self.sample_weight = seconds;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> CellRegistry {
        self.registry
    }

    /// Lazily aggregate `documents`, yielding one document per period in
    /// increasing period order. Iteration stops after the first error.
    pub fn integrate<I>(&mut self, documents: I) -> Integrate<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        Integrate {
            engine: self,
            input: documents.into_iter(),
            open: None,
            last: None,
            finished: false,
        }
    }

    fn weight(&self) -> f64 {
        match self.mode {
            AggregationMode::Sum => self.sample_weight,
            AggregationMode::Average => 1.0,
        }
    }

    fn output_property(&self, bucket: &Bucket) -> String {
        match self.mode {
            AggregationMode::Sum => self.granularity.energy_property().to_string(),
            AggregationMode::Average => bucket.value_property.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Iterator returned by [`IntegrationEngine::integrate`].
pub struct Integrate<'a, I> {
    engine: &'a mut IntegrationEngine,
    input: I,
    open: Option<Bucket>,
    /// Timestamp of the latest folded document.
    last: Option<NaiveDateTime>,
    finished: bool,
}

impl<'a, I> Integrate<'a, I> {
    fn fail(&mut self, error: PipelineError) -> Option<Result<Document>> {
        self.finished = true;
        if let Some(bucket) = self.open.take() {
            debug!(
                "Discarding open bucket {} ({} documents)",
                bucket.period, bucket.documents
            );
        }
        Some(Err(error))
    }

    fn emit(&self, bucket: Bucket) -> Document {
        let property = self.engine.output_property(&bucket);
        bucket.close(self.engine.granularity, self.engine.mode, &property)
    }
}

impl<'a, I> Iterator for Integrate<'a, I>
where
    I: Iterator<Item = Result<Document>>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if self.engine.is_cancelled() {
                return self.fail(PipelineError::Cancelled);
            }

            let document = match self.input.next() {
                Some(Ok(document)) => document,
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.finished = true;
                    return self.open.take().map(|bucket| Ok(self.emit(bucket)));
                }
            };

            let period = self.engine.granularity.period_start(document.timestamp);
            if let Some(open) = &self.open {
                if period < open.period {
                    let error = PipelineError::OutOfOrder {
                        artifact: document.artifact(),
                        period: format!("period {}", period),
                        open: format!("open period {}", open.period),
                    };
                    return self.fail(error);
                }
            }
            if let Some(last) = self.last.filter(|last| document.timestamp < *last) {
                let error = PipelineError::OutOfOrder {
                    artifact: document.artifact(),
                    period: document.timestamp.to_string(),
                    open: format!("the previous document at {}", last),
                };
                return self.fail(error);
            }
            if let Err(e) = self.engine.registry.observe(&document) {
                return self.fail(e);
            }

            self.last = Some(document.timestamp);
            let weight = self.engine.weight();
            if let Some(open) = self.open.as_mut().filter(|b| b.period == period) {
                open.fold(&document, weight);
                continue;
            }

            let mut bucket = Bucket::open(period, &document.value_property);
            bucket.fold(&document, weight);
            if let Some(closed) = self.open.replace(bucket) {
                return Some(Ok(self.emit(closed)));
            }
        }
    }
}
