//! Second-level aggregation over documents that are already period totals.

use crate::data_models::{Document, Granularity};
use crate::errors::{PipelineError, Result};
use crate::integration::{AggregationMode, CancellationToken, IntegrationEngine};
use crate::registry::CellRegistry;

/// Granularity an aggregated document was produced at: the `granularity`
/// member when present, otherwise guessed from the energy property name.
pub fn input_granularity(document: &Document) -> Result<Granularity> {
    document
        .granularity
        .or_else(|| Granularity::from_energy_property(&document.value_property))
        .ok_or_else(|| PipelineError::InvalidGranularity {
            artifact: document.artifact(),
            message: format!(
                "cannot tell the granularity of a '{}' document",
                document.value_property
            ),
        })
}

/// Sums aggregated documents into a strictly coarser period.
pub struct PeriodRollup {
    target: Granularity,
    engine: IntegrationEngine,
}

impl PeriodRollup {
    pub fn new(target: Granularity) -> Result<Self> {
        if target == Granularity::Hour {
            return Err(PipelineError::InvalidGranularity {
                artifact: "rollup".to_string(),
                message: "hour is the finest granularity and cannot be a roll-up target"
                    .to_string(),
            });
        }
        Ok(Self {
            target,
            engine: IntegrationEngine::new(target, AggregationMode::Sum),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.engine = self.engine.with_cancellation(token);
        self
    }

    /// Lazily roll `documents` up to the target granularity. Every input
    /// document must be finer than the target.
    pub fn rollup<'a, I>(&'a mut self, documents: I) -> impl Iterator<Item = Result<Document>> + 'a
    where
        I: IntoIterator<Item = Result<Document>>,
        I::IntoIter: 'a,
    {
        let target = self.target;
        let checked = documents.into_iter().map(move |document| {
            let document = document?;
            let granularity = input_granularity(&document)?;
            if granularity >= target {
                return Err(PipelineError::InvalidGranularity {
                    artifact: document.artifact(),
                    message: format!(
                        "{} input does not coarsen to {}",
                        granularity, target
                    ),
                });
            }
            Ok(document)
        });
        self.engine.integrate(checked)
    }

    pub fn into_registry(self) -> CellRegistry {
        self.engine.into_registry()
    }
}
