//! Module for document validation logic.

use std::collections::HashSet;

use crate::data_models::{Cell, Document};
use crate::errors::{PipelineError, Result};

/// Validates a parsed document.
///
/// Checks:
/// - every cell value is finite,
/// - every geometry has usable coordinates,
/// - no cell id appears twice.
pub fn validate_document(document: &Document) -> Result<()> {
    let mut seen = HashSet::with_capacity(document.cells.len());
    for cell in &document.cells {
        validate_cell(cell).map_err(|message| PipelineError::MalformedDocument {
            artifact: document.artifact(),
            message,
        })?;
        if !seen.insert(&cell.id) {
            return Err(PipelineError::MalformedDocument {
                artifact: document.artifact(),
                message: format!("cell {} appears more than once", cell.id),
            });
        }
    }
    Ok(())
}

/// Checks a single cell; returns the reason it is invalid.
pub fn validate_cell(cell: &Cell) -> std::result::Result<(), String> {
    if !cell.value.is_finite() {
        return Err(format!("cell {} has non-finite value {}", cell.id, cell.value));
    }
    cell.geometry
        .validate()
        .map_err(|e| format!("cell {} has invalid geometry: {}", cell.id, e))
}
