//! Coordinate Reference System identity
//!
//! polystat does not reproject. A CRS is only carried around so that a job
//! can refuse to overlay zones and rasters that are known to disagree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// Parse user input such as `EPSG:32633`, a bare code, a GeoJSON
    /// `urn:ogc:def:crs:EPSG::4326` name, or WKT text.
    pub fn from_user_input(input: &str) -> Self {
        let trimmed = input.trim();
        let tail = trimmed.rsplit(':').next().unwrap_or(trimmed);
        let is_epsg = trimmed.to_ascii_uppercase().contains("EPSG") || trimmed == tail;
        match tail.parse::<u32>() {
            Ok(code) if is_epsg => Self::from_epsg(code),
            _ if trimmed.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84") => Self::wgs84(),
            _ => Self::from_wkt(trimmed),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether two CRS definitions are known to be the same.
    ///
    /// Definitions that cannot be compared (EPSG vs WKT) count as equivalent;
    /// only a provable disagreement returns false.
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return normalize_wkt(a) == normalize_wkt(b);
        }
        true
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let end = wkt.char_indices().nth(50).map(|(i, _)| i).unwrap_or(wkt.len());
            return format!("WKT:{}", &wkt[..end]);
        }
        "Unknown".to_string()
    }
}

fn normalize_wkt(wkt: &str) -> String {
    wkt.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_uppercase()
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}
