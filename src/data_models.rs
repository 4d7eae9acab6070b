use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::geometry::Geometry;

/// Stable identifier of a grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellId {
    Int(i64),
    Text(String),
}

impl CellId {
    /// Canonical parse: text whose integer rendering is itself becomes `Int`,
    /// so "12" from a CSV file and 12 from a JSON file name the same cell.
    pub fn parse(s: &str) -> CellId {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(n) if n.to_string() == trimmed => CellId::Int(n),
            _ => CellId::Text(trimmed.to_string()),
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellId::Int(n) => write!(f, "{}", n),
            CellId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for CellId {
    fn from(n: i64) -> Self {
        CellId::Int(n)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId::parse(s)
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellId::Int(n) => serializer.serialize_i64(*n),
            CellId::Text(s) => serializer.serialize_str(s),
        }
    }
}

struct CellIdVisitor;

impl<'de> Visitor<'de> for CellIdVisitor {
    type Value = CellId;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an integer or string cell identifier")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CellId, E> {
        Ok(CellId::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CellId, E> {
        i64::try_from(v)
            .map(CellId::Int)
            .map_err(|_| E::custom(format!("cell id {} out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<CellId, E> {
        // GeoJSON writers sometimes emit integral ids as floats (e.g. 3.0)
        if v.fract() == 0.0 && v.is_finite() && v.abs() < i64::MAX as f64 {
            Ok(CellId::Int(v as i64))
        } else {
            Err(E::custom(format!("cell id {} is not integral", v)))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CellId, E> {
        if v.trim().is_empty() {
            return Err(E::custom("empty cell id"));
        }
        Ok(CellId::parse(v))
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<CellId, D::Error> {
        deserializer.deserialize_any(CellIdVisitor)
    }
}

/// Temporal resolution of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Start of the period containing `instant`.
    pub fn period_start(&self, instant: NaiveDateTime) -> NaiveDateTime {
        let date = instant.date();
        match self {
            Granularity::Hour => {
                date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(instant.hour()))
            }
            Granularity::Day => date.and_time(NaiveTime::MIN),
            Granularity::Month => {
                (date - Duration::days(i64::from(date.day0()))).and_time(NaiveTime::MIN)
            }
            Granularity::Year => {
                (date - Duration::days(i64::from(date.ordinal0()))).and_time(NaiveTime::MIN)
            }
        }
    }

    /// Property name for energy totals at this granularity.
    pub fn energy_property(&self) -> &'static str {
        match self {
            Granularity::Hour => "hourlyenergy",
            Granularity::Day => "energy",
            Granularity::Month => "monthlyenergy",
            Granularity::Year => "yearlyenergy",
        }
    }

    pub fn from_energy_property(name: &str) -> Option<Granularity> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.energy_property() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            "month" | "monthly" => Ok(Granularity::Month),
            "year" | "yearly" => Ok(Granularity::Year),
            other => Err(format!(
                "unknown granularity '{}' (expected hour, day, month or year)",
                other
            )),
        }
    }
}

/// A single grid cell of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub geometry: Geometry,
    pub value: f64,
    /// Extra named properties, excluding the value and id properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Cell {
    pub fn new(id: impl Into<CellId>, geometry: Geometry, value: f64) -> Self {
        Self {
            id: id.into(),
            geometry,
            value,
            properties: serde_json::Map::new(),
        }
    }
}

/// One timestep (or one aggregated period) of grid values.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub timestamp: NaiveDateTime,
    /// Set on aggregated documents; raw samples carry `None`.
    pub granularity: Option<Granularity>,
    /// Name of the property the cell value is read from / written to.
    pub value_property: String,
    /// File the document was read from, if any.
    pub source: Option<PathBuf>,
    pub cells: Vec<Cell>,
}

impl Document {
    pub fn new(timestamp: NaiveDateTime, value_property: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            timestamp,
            granularity: None,
            value_property: value_property.into(),
            source: None,
            cells,
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Human readable reference used in error messages.
    pub fn artifact(&self) -> String {
        match &self.source {
            Some(path) => format!("{} @ {}", path.display(), self.timestamp),
            None => self.timestamp.to_string(),
        }
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| &c.id == id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Flattened (cell, timestamp, value) triple exchanged with the forecasting tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cell_id: CellId,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}
