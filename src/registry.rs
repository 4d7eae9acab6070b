//! Cell id → geometry mapping, built while documents are read and queried
//! afterwards to put geometry back on geometry-less rows.
//!
//! Lifecycle: stages that read geometry-bearing documents own the registry
//! mutably and call [`CellRegistry::observe`]; once they are done the
//! registry is handed (by value or shared reference) to consumers that only
//! call [`CellRegistry::lookup`]. There is no global instance.

use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::data_models::{CellId, Document};
use crate::errors::{PipelineError, Result};
use crate::geometry::Geometry;

#[derive(Debug, Default, Clone)]
pub struct CellRegistry {
    cells: HashMap<CellId, Geometry>,
    /// Insertion order, for deterministic snapshots.
    order: Vec<CellId>,
}

impl CellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every cell of `document`. Returns the number of new cells.
    ///
    /// Fails with `GeometryConflict` when a known id shows up with a
    /// materially different geometry; the registry is left unchanged in
    /// that case.
    pub fn observe(&mut self, document: &Document) -> Result<usize> {
        for cell in &document.cells {
            if let Some(known) = self.cells.get(&cell.id) {
                if !known.same_as(&cell.geometry) {
                    return Err(PipelineError::GeometryConflict {
                        cell: cell.id.clone(),
                        artifact: document.artifact(),
                    });
                }
            }
        }

        let mut added = 0;
        for cell in &document.cells {
            if !self.cells.contains_key(&cell.id) {
                self.cells.insert(cell.id.clone(), cell.geometry.clone());
                self.order.push(cell.id.clone());
                added += 1;
            }
        }
        if added > 0 {
            debug!(
                "Registry: {} new cells from {} ({} total)",
                added,
                document.artifact(),
                self.cells.len()
            );
        }
        Ok(added)
    }

    /// Register a single geometry, with the same conflict rule as `observe`.
    pub fn insert(&mut self, id: CellId, geometry: Geometry, artifact: &str) -> Result<bool> {
        match self.cells.get(&id) {
            Some(known) if known.same_as(&geometry) => Ok(false),
            Some(_) => Err(PipelineError::GeometryConflict {
                cell: id,
                artifact: artifact.to_string(),
            }),
            None => {
                self.order.push(id.clone());
                self.cells.insert(id, geometry);
                Ok(true)
            }
        }
    }

    pub fn lookup(&self, id: &CellId) -> Result<&Geometry> {
        self.cells.get(id).ok_or_else(|| PipelineError::UnknownCell {
            cell: id.clone(),
            artifact: "cell registry".to_string(),
        })
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in first-observed order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellId, &Geometry)> {
        self.order
            .iter()
            .filter_map(move |id| self.cells.get(id).map(|g| (id, g)))
    }

    /// Write a snapshot as a FeatureCollection of geometry-only features.
    pub fn save(&self, path: &Path) -> Result<()> {
        let features: Vec<Value> = self
            .iter()
            .map(|(id, geometry)| {
                json!({
                    "type": "Feature",
                    "id": id,
                    "geometry": geometry,
                    "properties": {},
                })
            })
            .collect();
        let collection = json!({"type": "FeatureCollection", "features": features});

        let file = File::create(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::to_writer(BufWriter::new(file), &collection).map_err(|e| {
            PipelineError::Json {
                path: path.to_path_buf(),
                source: e,
            }
        })
    }

    /// Read a snapshot written by [`CellRegistry::save`].
    pub fn load(path: &Path) -> Result<CellRegistry> {
        #[derive(serde::Deserialize)]
        struct Snapshot {
            features: Vec<SnapshotFeature>,
        }
        #[derive(serde::Deserialize)]
        struct SnapshotFeature {
            id: CellId,
            geometry: Geometry,
        }

        let file = File::open(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot: Snapshot =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;

        let artifact = path.display().to_string();
        let mut registry = CellRegistry::new();
        for feature in snapshot.features {
            registry.insert(feature.id, feature.geometry, &artifact)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::Cell;
    use chrono::NaiveDate;

    fn doc(cells: Vec<Cell>) -> Document {
        let ts = NaiveDate::from_ymd_opt(2007, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Document::new(ts, "ghi", cells)
    }

    #[test]
    fn test_observe_and_lookup() {
        let mut registry = CellRegistry::new();
        let d = doc(vec![
            Cell::new(1, Geometry::rectangle(0.0, 0.0, 1.0, 1.0), 1.0),
            Cell::new("a", Geometry::point(3.0, 4.0), 2.0),
        ]);
        assert_eq!(registry.observe(&d).unwrap(), 2);
        assert_eq!(registry.observe(&d).unwrap(), 0);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup(&CellId::Text("a".into())).unwrap(),
            &Geometry::point(3.0, 4.0)
        );
    }

    #[test]
    fn test_unknown_cell() {
        let registry = CellRegistry::new();
        let err = registry.lookup(&CellId::Int(9)).unwrap_err();
        assert_eq!(err.kind(), "UnknownCellError");
    }

    #[test]
    fn test_conflicting_geometry_rejected_without_partial_update() {
        let mut registry = CellRegistry::new();
        registry
            .observe(&doc(vec![Cell::new(1, Geometry::point(0.0, 0.0), 1.0)]))
            .unwrap();

        let conflicting = doc(vec![
            Cell::new(2, Geometry::point(5.0, 5.0), 1.0),
            Cell::new(1, Geometry::point(0.5, 0.0), 1.0),
        ]);
        let err = registry.observe(&conflicting).unwrap_err();
        assert_eq!(err.kind(), "GeometryConflictError");
        assert!(!registry.contains(&CellId::Int(2)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");
        let mut registry = CellRegistry::new();
        registry
            .observe(&doc(vec![
                Cell::new(2, Geometry::rectangle(0.0, 0.0, 1.0, 1.0), 1.0),
                Cell::new(1, Geometry::point(1.0, 1.0), 1.0),
            ]))
            .unwrap();
        registry.save(&path).unwrap();

        let loaded = CellRegistry::load(&path).unwrap();
        let ids: Vec<_> = loaded.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec![CellId::Int(2), CellId::Int(1)]);
        assert_eq!(loaded.lookup(&CellId::Int(1)).unwrap(), &Geometry::point(1.0, 1.0));
    }
}
