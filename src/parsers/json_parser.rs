//! GeoJSON grid documents: reading (one or many timesteps per file) and
//! writing (one FeatureCollection per document).

use log::debug;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::data_models::{Cell, CellId, Document, Granularity};
use crate::errors::{PipelineError, Result};
use crate::geometry::Geometry;
use crate::timestamps::{DocumentSource, TimestampResolver};
use crate::utils::{format_timestamp, output_file_name};
use crate::validation::validate_document;

/// Value properties recognised when none is configured, in priority order.
pub const KNOWN_VALUE_PROPERTIES: [&str; 6] = [
    "ghi",
    "energy",
    "hourlyenergy",
    "monthlyenergy",
    "yearlyenergy",
    "value",
];

/// Property carrying the bucket sample count on aggregated cells.
pub const SAMPLES_PROPERTY: &str = "samples";

#[derive(Debug, Clone)]
pub struct CodecOptions {
    pub value_property: Option<String>,
    pub id_property: String,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            value_property: None,
            id_property: "cell_id".to_string(),
        }
    }
}

// Temporary struct for deserializing a single GeoJSON feature
#[derive(Deserialize, Debug)]
struct RawFeature {
    #[serde(default)]
    id: Option<CellId>,
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// One timestep as found in the file, before cells are resolved.
struct RawGroup {
    features: Vec<Value>,
    timestamp: Option<String>,
    granularity: Option<String>,
}

fn malformed(artifact: impl Into<String>, message: impl Into<String>) -> PipelineError {
    PipelineError::MalformedDocument {
        artifact: artifact.into(),
        message: message.into(),
    }
}

/// Read every document contained in `path`.
pub fn read_documents(
    path: &Path,
    options: &CodecOptions,
    resolver: &dyn TimestampResolver,
) -> Result<Vec<Document>> {
    let file = File::open(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: Value =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
    let documents = parse_documents(value, path, options, resolver)?;
    debug!("Read {} documents from {}", documents.len(), path.display());
    Ok(documents)
}

/// Split a parsed file into its timesteps and build one document each.
pub fn parse_documents(
    value: Value,
    path: &Path,
    options: &CodecOptions,
    resolver: &dyn TimestampResolver,
) -> Result<Vec<Document>> {
    let artifact = path.display().to_string();
    let groups = split_groups(value, &artifact)?;

    groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let first_properties = group
                .features
                .first()
                .and_then(|f| f.get("properties"))
                .and_then(|p| p.as_object())
                .cloned();
            let source = DocumentSource {
                path,
                index,
                embedded: group.timestamp.as_deref(),
                properties: first_properties.as_ref(),
            };
            let timestamp = resolver.resolve(&source)?;
            let group_artifact = format!("{}[{}]", artifact, index);

            let granularity = match group.granularity.as_deref() {
                Some(g) => Some(g.parse::<Granularity>().map_err(|e| {
                    PipelineError::InvalidGranularity {
                        artifact: group_artifact.clone(),
                        message: e,
                    }
                })?),
                None => None,
            };

            let value_property = match &options.value_property {
                Some(p) => p.clone(),
                // Nothing to infer from; an empty timestep is still a document
                None if group.features.is_empty() => KNOWN_VALUE_PROPERTIES[0].to_string(),
                None => infer_value_property(first_properties.as_ref())
                    .ok_or_else(|| malformed(&group_artifact, "no known value property"))?,
            };

            let cells = group
                .features
                .into_iter()
                .map(|feature| parse_cell(feature, &value_property, options, &group_artifact))
                .collect::<Result<Vec<Cell>>>()?;

            let document = Document {
                timestamp,
                granularity,
                value_property,
                source: Some(path.to_path_buf()),
                cells,
            };
            validate_document(&document)?;
            Ok(document)
        })
        .collect()
}

fn is_feature(value: &Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("Feature")
        || value.get("geometry").is_some()
}

fn collection_group(mut object: Map<String, Value>, artifact: &str) -> Result<RawGroup> {
    let features = match object.remove("features") {
        Some(Value::Array(features)) => features,
        _ => return Err(malformed(artifact, "FeatureCollection without a features array")),
    };
    let member = |object: &Map<String, Value>, key: &str| {
        object.get(key).and_then(|v| v.as_str()).map(str::to_string)
    };
    Ok(RawGroup {
        timestamp: member(&object, "timestamp"),
        granularity: member(&object, "granularity"),
        features,
    })
}

fn bare_group(features: Vec<Value>) -> RawGroup {
    RawGroup {
        features,
        timestamp: None,
        granularity: None,
    }
}

fn split_groups(value: Value, artifact: &str) -> Result<Vec<RawGroup>> {
    match value {
        Value::Object(object) => Ok(vec![collection_group(object, artifact)?]),
        Value::Array(items) => {
            if items.is_empty() || items.first().is_some_and(is_feature) {
                return Ok(vec![bare_group(items)]);
            }
            // Multi-timestep file: each element is a feature list or a collection
            items
                .into_iter()
                .map(|item| match item {
                    Value::Array(features) => Ok(bare_group(features)),
                    Value::Object(object) => collection_group(object, artifact),
                    other => Err(malformed(
                        artifact,
                        format!("unexpected timestep element {}", other),
                    )),
                })
                .collect()
        }
        other => Err(malformed(
            artifact,
            format!("expected a FeatureCollection or an array, found {}", other),
        )),
    }
}

fn infer_value_property(properties: Option<&Map<String, Value>>) -> Option<String> {
    let properties = properties?;
    KNOWN_VALUE_PROPERTIES
        .iter()
        .find(|name| properties.get(**name).is_some_and(Value::is_number))
        .map(|name| name.to_string())
}

/// Grid index of a point cell, e.g. `[3, 4]` → `"3_4"`.
fn point_index_id(geometry: &Geometry) -> Option<CellId> {
    let Geometry::Point(p) = geometry else {
        return None;
    };
    let part = |v: f64| {
        if v.fract() == 0.0 && v.abs() < 1e15 {
            format!("{}", v as i64)
        } else {
            format!("{}", v)
        }
    };
    Some(CellId::Text(format!("{}_{}", part(*p.first()?), part(*p.get(1)?))))
}

fn parse_cell(
    feature: Value,
    value_property: &str,
    options: &CodecOptions,
    artifact: &str,
) -> Result<Cell> {
    let raw: RawFeature = serde_json::from_value(feature)
        .map_err(|e| malformed(artifact, format!("invalid feature: {}", e)))?;
    let geometry = raw
        .geometry
        .ok_or_else(|| malformed(artifact, "feature without geometry"))?;
    let mut properties = raw.properties.unwrap_or_default();

    let property_id = properties
        .remove(&options.id_property)
        .map(|v| serde_json::from_value::<CellId>(v))
        .transpose()
        .map_err(|e| malformed(artifact, format!("invalid {}: {}", options.id_property, e)))?;
    let id = raw
        .id
        .or(property_id)
        .or_else(|| point_index_id(&geometry))
        .ok_or_else(|| malformed(artifact, "feature has no cell identifier"))?;

    let value = properties
        .remove(value_property)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            malformed(
                artifact,
                format!("cell {} has no numeric '{}' property", id, value_property),
            )
        })?;

    Ok(Cell {
        id,
        geometry,
        value,
        properties,
    })
}

/// GeoJSON rendering of a document.
pub fn document_to_json(document: &Document) -> Value {
    let features: Vec<Value> = document
        .cells
        .iter()
        .map(|cell| {
            let mut properties = cell.properties.clone();
            properties.insert(document.value_property.clone(), json!(cell.value));
            json!({
                "type": "Feature",
                "id": cell.id,
                "geometry": cell.geometry,
                "properties": properties,
            })
        })
        .collect();

    let mut collection = Map::new();
    collection.insert("type".to_string(), json!("FeatureCollection"));
    collection.insert(
        "timestamp".to_string(),
        json!(format_timestamp(&document.timestamp)),
    );
    if let Some(granularity) = document.granularity {
        collection.insert("granularity".to_string(), json!(granularity.as_str()));
    }
    collection.insert("features".to_string(), Value::Array(features));
    Value::Object(collection)
}

/// Write `document` into `dir`, named after its timestamp. Returns the path.
/// An existing file of that name is an `OutputDirectory` error, never
/// overwritten.
pub fn write_document(document: &Document, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(output_file_name(&document.timestamp));
    if path.exists() {
        return Err(PipelineError::OutputDirectory {
            path: dir.to_path_buf(),
            message: format!(
                "already contains {} (two documents share the timestamp {})",
                path.display(),
                document.timestamp
            ),
        });
    }
    write_document_to(document, &path)?;
    Ok(path)
}

fn write_document_to(document: &Document, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &document_to_json(document)).map_err(|e| {
        PipelineError::Json {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    std::io::Write::flush(&mut writer).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Size of a written file, for the metrics.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
