use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::data_models::Document;
use crate::file_processor::{discover_files, FileOrder};
use crate::parsers::json_parser::{read_documents, CodecOptions};
use crate::timestamps::resolver_for;

pub fn at(month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2007, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn quiet_config() -> PipelineConfig {
    PipelineConfig {
        progress: false,
        ..PipelineConfig::default()
    }
}

/// Point feature on grid index `(x, y)` carrying `ghi`.
pub fn grid_feature(x: i64, y: i64, ghi: f64) -> Value {
    json!({
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [x, y]},
        "properties": {"ghi": ghi},
    })
}

/// Polygon feature with an explicit id and value property.
pub fn cell_feature(id: &str, x: f64, property: &str, value: f64) -> Value {
    let mut properties = Map::new();
    properties.insert(property.to_string(), json!(value));
    json!({
        "type": "Feature",
        "id": id,
        "geometry": {"type": "Polygon", "coordinates": [[
            [x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0], [x, 0.0]
        ]]},
        "properties": properties,
    })
}

pub fn write_collection(dir: &Path, name: &str, timestamp: NaiveDateTime, features: Vec<Value>) {
    let body = json!({
        "type": "FeatureCollection",
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "features": features,
    });
    fs::write(dir.join(name), body.to_string()).unwrap();
}

/// Multi-timestep file: one feature list per hour.
pub fn write_hours(dir: &Path, name: &str, hours: Vec<Vec<Value>>) {
    fs::write(dir.join(name), json!(hours).to_string()).unwrap();
}

/// Every document written to `dir`, in timestamp order.
pub fn read_output(dir: &Path) -> Vec<Document> {
    let config = quiet_config();
    let resolver = resolver_for(&config);
    discover_files(dir, &config, None, FileOrder::Timestamp)
        .unwrap()
        .iter()
        .filter(|p| !matches!(p.extension().and_then(|e| e.to_str()), Some("csv" | "geojson")))
        .flat_map(|p| read_documents(p, &CodecOptions::default(), resolver.as_ref()).unwrap())
        .collect()
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
