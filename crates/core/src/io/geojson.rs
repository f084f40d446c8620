//! GeoJSON zone input
//!
//! Reads a `FeatureCollection` of (multi)polygons into a [`ZoneCollection`].
//! The zone id comes from the feature `id`, then from an id property when
//! one is named, then from the feature's position.

use std::path::Path;

use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::Value;

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Zone, ZoneCollection};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    crs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<Value>,
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

/// Read zones from a GeoJSON file
pub fn read_zones<P: AsRef<Path>>(path: P, id_field: Option<&str>) -> Result<ZoneCollection> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_zones(&text, id_field)
}

/// Parse zones from GeoJSON text
pub fn parse_zones(text: &str, id_field: Option<&str>) -> Result<ZoneCollection> {
    let collection: FeatureCollection = serde_json::from_str(text)?;
    if collection.kind != "FeatureCollection" {
        return Err(Error::Vector(format!(
            "expected a FeatureCollection, found '{}'",
            collection.kind
        )));
    }

    let crs = collection
        .crs
        .as_ref()
        .and_then(|c| c.pointer("/properties/name"))
        .and_then(Value::as_str)
        .map(CRS::from_user_input);

    let mut zones = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let properties = feature.properties.unwrap_or_default();
        let id = feature
            .id
            .as_ref()
            .or_else(|| id_field.and_then(|f| properties.get(f)))
            .map(value_to_id)
            .unwrap_or_else(|| index.to_string());

        let geometry = match feature.geometry {
            Some(g) => parse_geometry(&g).map_err(|e| {
                Error::InvalidGeometry(format!("feature {} ('{}'): {}", index, id, e))
            })?,
            None => Geometry::MultiPolygon(MultiPolygon::new(vec![])),
        };

        let mut zone = Zone::new(id, geometry)?;
        for (key, value) in properties {
            zone.set_attribute(key, AttributeValue::from(value));
        }
        zones.push(zone);
    }

    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = zones.iter().find(|z| !seen.insert(z.id.as_str())) {
        return Err(Error::Vector(format!("duplicate zone id '{}'", dup.id)));
    }

    tracing::debug!("Parsed {} zone(s)", zones.len());
    Ok(ZoneCollection::new(zones, crs))
}

fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_geometry(value: &Value) -> std::result::Result<Geometry<f64>, String> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry has no type")?;
    let coords = value.get("coordinates").ok_or("geometry has no coordinates");
    match kind {
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coords?)?)),
        "MultiPolygon" => {
            let polygons = coords?
                .as_array()
                .ok_or("MultiPolygon coordinates must be an array")?
                .iter()
                .map(parse_polygon)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        other => Err(format!("unsupported geometry type '{}'", other)),
    }
}

fn parse_polygon(value: &Value) -> std::result::Result<Polygon<f64>, String> {
    let rings = value.as_array().ok_or("polygon must be an array of rings")?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = match rings.next() {
        Some(ring) => ring?,
        None => LineString::new(vec![]),
    };
    let interiors = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> std::result::Result<LineString<f64>, String> {
    let points = value.as_array().ok_or("ring must be an array of positions")?;
    points
        .iter()
        .map(|p| {
            let xy = p.as_array().ok_or("position must be an array")?;
            match (xy.first().and_then(Value::as_f64), xy.get(1).and_then(Value::as_f64)) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err("position needs numeric x and y".to_string()),
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(LineString::new)
}
