//! Representative coordinates for grid cells, with optional projection of
//! grid-index points onto a lat/lon coordinate table.

use log::debug;
use serde_json::{json, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::data_models::{Cell, Document};
use crate::errors::{PipelineError, Result};
use crate::geometry::{Geometry, Position};

pub const LON_PROPERTY: &str = "lon";
pub const LAT_PROPERTY: &str = "lat";

/// Coordinate table indexed `[xi][yi]`, each entry `[lat, lon]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GridProjection {
    coords: Vec<Vec<Position>>,
}

impl GridProjection {
    /// Read a table file: either the bare 2-D array or an object holding
    /// it under `value`.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let value: Value =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::from_value(value, &path.display().to_string())
    }

    pub fn from_value(value: Value, artifact: &str) -> Result<Self> {
        let table = match value {
            Value::Object(mut object) => object.remove("value").unwrap_or(Value::Null),
            other => other,
        };
        let coords: Vec<Vec<Position>> =
            serde_json::from_value(table).map_err(|e| PipelineError::MalformedDocument {
                artifact: artifact.to_string(),
                message: format!("coordinate table is not a 2-D array of [lat, lon]: {}", e),
            })?;

        let width = coords.first().map(Vec::len).unwrap_or(0);
        if width == 0 || coords.iter().any(|row| row.len() != width) {
            return Err(PipelineError::MalformedDocument {
                artifact: artifact.to_string(),
                message: "coordinate table must be a non-empty rectangle".to_string(),
            });
        }
        if coords.iter().flatten().any(|p| p.len() < 2) {
            return Err(PipelineError::MalformedDocument {
                artifact: artifact.to_string(),
                message: "coordinate table entries need both lat and lon".to_string(),
            });
        }
        Ok(Self { coords })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.coords.len(), self.coords.first().map(Vec::len).unwrap_or(0))
    }

    fn lon_lat(&self, xi: usize, yi: usize) -> Position {
        let entry = &self.coords[xi][yi];
        vec![entry[1], entry[0]]
    }

    /// Quad polygon for a grid-index point. `Ok(None)` for cells on the last
    /// row or column, which have no far corner. Non-point geometry is
    /// returned unchanged.
    pub fn project(&self, cell: &Cell, artifact: &str) -> Result<Option<Geometry>> {
        let Geometry::Point(position) = &cell.geometry else {
            return Ok(Some(cell.geometry.clone()));
        };
        let index = |v: Option<&f64>| {
            v.copied()
                .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as usize)
        };
        let (Some(xi), Some(yi)) = (index(position.first()), index(position.get(1))) else {
            return Err(PipelineError::DegenerateGeometry {
                cell: cell.id.clone(),
                artifact: artifact.to_string(),
                message: format!("point {:?} is not a grid index", position),
            });
        };

        let (rows, cols) = self.shape();
        if xi + 1 >= rows || yi + 1 >= cols {
            return Ok(None);
        }
        let first = self.lon_lat(xi, yi);
        Ok(Some(Geometry::Polygon(vec![vec![
            first.clone(),
            self.lon_lat(xi + 1, yi),
            self.lon_lat(xi + 1, yi + 1),
            self.lon_lat(xi, yi + 1),
            first,
        ]])))
    }
}

/// Adds `lon`/`lat` properties to every cell of a document.
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    projection: Option<GridProjection>,
}

impl Enricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: GridProjection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn enrich(&self, document: &Document) -> Result<Document> {
        let artifact = document.artifact();
        let mut cells = Vec::with_capacity(document.cells.len());
        let mut dropped = 0usize;

        for cell in &document.cells {
            let geometry = match &self.projection {
                Some(projection) => match projection.project(cell, &artifact)? {
                    Some(geometry) => geometry,
                    None => {
                        dropped += 1;
                        continue;
                    }
                },
                None => cell.geometry.clone(),
            };
            let (lon, lat) = geometry
                .centroid()
                .map_err(|message| PipelineError::DegenerateGeometry {
                    cell: cell.id.clone(),
                    artifact: artifact.clone(),
                    message,
                })?;

            let mut enriched = cell.clone();
            enriched.geometry = geometry;
            enriched.properties.insert(LON_PROPERTY.to_string(), json!(lon));
            enriched.properties.insert(LAT_PROPERTY.to_string(), json!(lat));
            cells.push(enriched);
        }

        if dropped > 0 {
            debug!("Dropped {} edge cells from {}", dropped, artifact);
        }
        Ok(Document {
            cells,
            ..document.clone()
        })
    }
}
