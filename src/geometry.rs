//! GeoJSON geometries attached to grid cells.

use geo::{Area, Centroid, Coord, LineString, MultiPoint, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

/// A GeoJSON position: `[x, y]` or `[x, y, z]`, x being longitude.
pub type Position = Vec<f64>;

/// Ordinates closer than this are the same ordinate.
pub const GEOMETRY_TOLERANCE: f64 = 1e-9;

const MIN_AREA: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Geometry {
        Geometry::Point(vec![x, y])
    }

    /// Closed rectangle ring, mostly handy for tests and grid projection.
    pub fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            vec![x0, y0],
            vec![x1, y0],
            vec![x1, y1],
            vec![x0, y1],
            vec![x0, y0],
        ]])
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// True when both geometries have the same type and shape and every
    /// ordinate agrees within [`GEOMETRY_TOLERANCE`].
    pub fn same_as(&self, other: &Geometry) -> bool {
        match (self, other) {
            (Geometry::Point(a), Geometry::Point(b)) => same_position(a, b),
            (Geometry::MultiPoint(a), Geometry::MultiPoint(b))
            | (Geometry::LineString(a), Geometry::LineString(b)) => same_positions(a, b),
            (Geometry::Polygon(a), Geometry::Polygon(b)) => same_rings(a, b),
            (Geometry::MultiPolygon(a), Geometry::MultiPolygon(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(pa, pb)| same_rings(pa, pb))
            }
            _ => false,
        }
    }

    /// Every position has at least two finite ordinates and nothing is empty.
    pub fn validate(&self) -> Result<(), String> {
        let check = |p: &Position| -> Result<(), String> {
            if p.len() < 2 {
                return Err(format!("position {:?} has fewer than 2 ordinates", p));
            }
            if p.iter().any(|v| !v.is_finite()) {
                return Err(format!("position {:?} has a non-finite ordinate", p));
            }
            Ok(())
        };
        let check_all = |ps: &[Position]| -> Result<(), String> {
            if ps.is_empty() {
                return Err("empty coordinate list".to_string());
            }
            ps.iter().try_for_each(check)
        };
        match self {
            Geometry::Point(p) => check(p),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => check_all(ps),
            Geometry::Polygon(rings) => {
                if rings.is_empty() {
                    return Err("polygon without rings".to_string());
                }
                rings.iter().try_for_each(|r| check_all(r))
            }
            Geometry::MultiPolygon(polys) => {
                if polys.is_empty() {
                    return Err("multipolygon without polygons".to_string());
                }
                polys
                    .iter()
                    .flatten()
                    .try_for_each(|r| check_all(r))
            }
        }
    }

    /// Representative coordinate `(x, y)`: area-weighted centroid for
    /// polygons, the vertex mean for points and lines.
    pub fn centroid(&self) -> Result<(f64, f64), String> {
        self.validate()?;
        let centroid = match self {
            Geometry::Point(p) => Some(geo::Point::new(p[0], p[1])),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => vertices(ps).centroid(),
            Geometry::Polygon(rings) => {
                let polygon = to_polygon(rings);
                if polygon.unsigned_area() < MIN_AREA {
                    return Err("polygon has zero area".to_string());
                }
                polygon.centroid()
            }
            Geometry::MultiPolygon(polys) => {
                let multi = MultiPolygon::new(polys.iter().map(|rings| to_polygon(rings)).collect());
                if multi.unsigned_area() < MIN_AREA {
                    return Err("multipolygon has zero area".to_string());
                }
                multi.centroid()
            }
        };
        centroid
            .map(|p| (p.x(), p.y()))
            .ok_or_else(|| format!("{} has no centroid", self.type_name()))
    }
}

fn coord(p: &Position) -> Coord<f64> {
    Coord { x: p[0], y: p[1] }
}

fn vertices(ps: &[Position]) -> MultiPoint<f64> {
    MultiPoint::new(ps.iter().map(|p| geo::Point::from(coord(p))).collect())
}

fn ring(ps: &[Position]) -> LineString<f64> {
    LineString::new(ps.iter().map(coord).collect())
}

/// First ring is the exterior, the rest are holes.
fn to_polygon(rings: &[Vec<Position>]) -> Polygon<f64> {
    let mut rings = rings.iter().map(|r| ring(r));
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.collect())
}

fn same_position(a: &Position, b: &Position) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= GEOMETRY_TOLERANCE)
}

fn same_positions(a: &[Position], b: &[Position]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(pa, pb)| same_position(pa, pb))
}

fn same_rings(a: &[Vec<Position>], b: &[Vec<Position>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(ra, rb)| same_positions(ra, rb))
}
