//! Conversion between grid documents and flat `(cell_id, timestamp, value)`
//! rows, the format exchanged with the external forecasting step.
//!
//! Rows carry no geometry. Going back to documents needs a fully built
//! [`CellRegistry`]; a row naming a cell the registry has never seen is an
//! error, geometry is never made up.

use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

use crate::data_models::{Cell, CellId, Document, Granularity, Row};
use crate::errors::{PipelineError, Result};
use crate::registry::CellRegistry;
use crate::utils::format_timestamp;

/// Default value property of reconstructed documents.
pub const DEFAULT_ROW_PROPERTY: &str = "energy";

/// One row per cell, in the document's cell order.
pub fn to_rows(document: &Document) -> impl Iterator<Item = Row> + '_ {
    document.cells.iter().map(move |cell| Row {
        cell_id: cell.id.clone(),
        timestamp: document.timestamp,
        value: cell.value,
    })
}

#[derive(Debug, Clone)]
pub struct FromRowsOptions {
    pub value_property: String,
    pub granularity: Option<Granularity>,
}

impl Default for FromRowsOptions {
    fn default() -> Self {
        Self {
            value_property: DEFAULT_ROW_PROPERTY.to_string(),
            granularity: None,
        }
    }
}

/// Rows collected for one timestamp.
#[derive(Debug)]
struct PendingDocument {
    timestamp: NaiveDateTime,
    cells: Vec<Cell>,
    seen: HashSet<CellId>,
}

/// Groups rows by timestamp and attaches registry geometry.
///
/// Documents come out in the order their timestamps were first seen.
pub struct RowAssembler<'r> {
    registry: &'r CellRegistry,
    options: FromRowsOptions,
    pending: Vec<PendingDocument>,
    index: HashMap<NaiveDateTime, usize>,
    rows: u64,
}

impl<'r> RowAssembler<'r> {
    pub fn new(registry: &'r CellRegistry, options: FromRowsOptions) -> Self {
        Self {
            registry,
            options,
            pending: Vec::new(),
            index: HashMap::new(),
            rows: 0,
        }
    }

    /// Add one row. `artifact` names where the row came from, for errors.
    pub fn push(&mut self, row: Row, artifact: &str) -> Result<()> {
        let geometry = self
            .registry
            .lookup(&row.cell_id)
            .map_err(|_| PipelineError::UnknownCell {
                cell: row.cell_id.clone(),
                artifact: artifact.to_string(),
            })?
            .clone();

        let slot = match self.index.get(&row.timestamp) {
            Some(&slot) => slot,
            None => {
                self.pending.push(PendingDocument {
                    timestamp: row.timestamp,
                    cells: Vec::new(),
                    seen: HashSet::new(),
                });
                self.index.insert(row.timestamp, self.pending.len() - 1);
                self.pending.len() - 1
            }
        };
        let pending = &mut self.pending[slot];
        if !pending.seen.insert(row.cell_id.clone()) {
            return Err(PipelineError::DuplicateRow {
                cell: row.cell_id,
                timestamp: format_timestamp(&row.timestamp),
                artifact: artifact.to_string(),
            });
        }
        pending.cells.push(Cell::new(row.cell_id, geometry, row.value));
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(self) -> Vec<Document> {
        let options = self.options;
        self.pending
            .into_iter()
            .map(|pending| {
                let document =
                    Document::new(pending.timestamp, options.value_property.clone(), pending.cells);
                match options.granularity {
                    Some(granularity) => document.with_granularity(granularity),
                    None => document,
                }
            })
            .collect()
    }
}

/// Rebuild documents from `rows`. Fails on the first unknown cell or
/// duplicate row; nothing is returned in that case.
pub fn from_rows<I>(rows: I, registry: &CellRegistry, options: FromRowsOptions) -> Result<Vec<Document>>
where
    I: IntoIterator<Item = Result<Row>>,
{
    let mut assembler = RowAssembler::new(registry, options);
    for (line, row) in rows.into_iter().enumerate() {
        assembler.push(row?, &format!("row {}", line + 1))?;
    }
    Ok(assembler.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use chrono::NaiveDate;

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2007, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn registry_of(document: &Document) -> CellRegistry {
        let mut registry = CellRegistry::new();
        registry.observe(document).unwrap();
        registry
    }

    fn grid() -> Document {
        Document::new(
            ts(1),
            "energy",
            vec![
                Cell::new(1, Geometry::rectangle(0.0, 0.0, 1.0, 1.0), 10.5),
                Cell::new("b", Geometry::point(2.0, 3.0), -1.0),
            ],
        )
    }

    #[test]
    fn test_round_trip_reproduces_cells() {
        let document = grid();
        let registry = registry_of(&document);
        let rows: Vec<Result<Row>> = to_rows(&document).map(Ok).collect();

        let rebuilt = from_rows(rows, &registry, FromRowsOptions::default()).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].timestamp, document.timestamp);
        assert_eq!(rebuilt[0].cells, document.cells);
    }

    #[test]
    fn test_documents_in_first_seen_timestamp_order() {
        let registry = registry_of(&grid());
        let row = |d: u32, id: CellId| -> Result<Row> {
            Ok(Row { cell_id: id, timestamp: ts(d), value: 1.0 })
        };
        let options = FromRowsOptions {
            value_property: "prediction".to_string(),
            granularity: Some(Granularity::Day),
        };

        let rows = vec![row(3, CellId::Int(1)), row(2, CellId::Int(1)), row(3, "b".into())];
        let docs = from_rows(rows, &registry, options).unwrap();
        let order: Vec<_> = docs.iter().map(|d| d.timestamp).collect();
        assert_eq!(order, vec![ts(3), ts(2)]);
        assert_eq!(docs[0].len(), 2);
        assert_eq!(docs[0].value_property, "prediction");
        assert_eq!(docs[0].granularity, Some(Granularity::Day));
    }

    #[test]
    fn test_unknown_cell_fails() {
        let registry = registry_of(&grid());
        let rows = vec![Ok(Row { cell_id: CellId::Int(99), timestamp: ts(1), value: 0.0 })];
        let err = from_rows(rows, &registry, FromRowsOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "UnknownCellError");
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_duplicate_row_fails() {
        let registry = registry_of(&grid());
        let row = Row { cell_id: CellId::Int(1), timestamp: ts(1), value: 0.0 };
        let err = from_rows(vec![Ok(row.clone()), Ok(row)], &registry, FromRowsOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateRowError");
    }
}
