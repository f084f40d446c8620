//! Zone features: polygon geometry plus passthrough attributes

use geo::BoundingRect;
use geo_types::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::crs::CRS;
use crate::error::{Error, Result};

/// Attribute value types
///
/// Also used as the cell type of the engine's output table, where `Null`
/// means "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// `Float(v)` for finite values, `Null` otherwise
    pub fn from_opt(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => AttributeValue::Float(v),
            _ => AttributeValue::Null,
        }
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::from_opt(n.as_f64()),
            },
            serde_json::Value::String(s) => AttributeValue::String(s),
            other => AttributeValue::String(other.to_string()),
        }
    }
}

/// One polygonal zone statistics are computed for.
///
/// Geometry is normalised to a `MultiPolygon` on construction; the
/// attributes keep their input order.
#[derive(Debug, Clone)]
pub struct Zone {
    /// Stable identifier, unique within a job
    pub id: String,
    /// Zone geometry
    pub geometry: MultiPolygon<f64>,
    /// Ordered (name, value) attribute pairs
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Zone {
    /// Create a zone from any polygonal geometry.
    ///
    /// Fails for points and lines; an empty `MultiPolygon` is accepted and
    /// later reported as degenerate.
    pub fn new(id: impl Into<String>, geometry: Geometry<f64>) -> Result<Self> {
        let id = id.into();
        let geometry = match geometry {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
            Geometry::Triangle(t) => MultiPolygon::new(vec![t.to_polygon()]),
            other => {
                return Err(Error::InvalidGeometry(format!(
                    "zone '{}' is not polygonal ({})",
                    id,
                    geometry_kind(&other)
                )));
            }
        };
        Ok(Self {
            id,
            geometry,
            attributes: Vec::new(),
        })
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Set an attribute, replacing an existing one with the same name
    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        let key = key.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Envelope (min_x, min_y, max_x, max_y), or `None` for empty geometry
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.geometry
            .bounding_rect()
            .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        _ => "Polygon",
    }
}

/// Ordered zone sequence with its CRS
#[derive(Debug, Clone, Default)]
pub struct ZoneCollection {
    pub zones: Vec<Zone>,
    pub crs: Option<CRS>,
}

impl ZoneCollection {
    pub fn new(zones: Vec<Zone>, crs: Option<CRS>) -> Self {
        Self { zones, crs }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    /// Names of all attributes in first-seen order
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for zone in &self.zones {
            for (k, _) in &zone.attributes {
                if !names.contains(k) {
                    names.push(k.clone());
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Point, Polygon, Rect, coord};

    #[test]
    fn test_zone_from_polygon_and_rect() {
        let poly = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 0.0), (2.0, 3.0), (0.0, 0.0)]),
            vec![],
        );
        let z = Zone::new("a", Geometry::Polygon(poly)).unwrap();
        assert_eq!(z.geometry.0.len(), 1);
        assert_eq!(z.bounds(), Some((0.0, 0.0, 2.0, 3.0)));

        let r = Rect::new(coord! { x: 1.0, y: 1.0 }, coord! { x: 4.0, y: 2.0 });
        let z = Zone::new("b", Geometry::Rect(r)).unwrap();
        assert_eq!(z.bounds(), Some((1.0, 1.0, 4.0, 2.0)));
    }

    #[test]
    fn test_zone_rejects_points() {
        let err = Zone::new("p", Geometry::Point(Point::new(1.0, 1.0))).unwrap_err();
        assert!(err.to_string().contains("Point"));
    }

    #[test]
    fn test_attributes_keep_order() {
        let z = Zone::new("a", Geometry::MultiPolygon(MultiPolygon::new(vec![])))
            .unwrap()
            .with_attribute("name", AttributeValue::String("x".into()))
            .with_attribute("pop", AttributeValue::Int(10))
            .with_attribute("name", AttributeValue::String("y".into()));
        assert_eq!(z.attributes.len(), 2);
        assert_eq!(z.attributes[0].0, "name");
        assert_eq!(z.attribute("name"), Some(&AttributeValue::String("y".into())));
        assert_eq!(z.bounds(), None);
    }

    #[test]
    fn test_attribute_value_from_json() {
        assert_eq!(AttributeValue::from(serde_json::json!(3)), AttributeValue::Int(3));
        assert_eq!(AttributeValue::from(serde_json::json!(2.5)), AttributeValue::Float(2.5));
        assert_eq!(AttributeValue::from(serde_json::json!(null)), AttributeValue::Null);
        assert_eq!(AttributeValue::Float(2.0).as_f64(), Some(2.0));
        assert_eq!(AttributeValue::from_opt(Some(f64::NAN)), AttributeValue::Null);
    }
}
