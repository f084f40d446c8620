//! Zone geometry checks run before rasterization

use geo::{Coord, LineString, MultiPolygon};
use thiserror::Error;

use super::measurements::zone_area;

/// Why a zone geometry cannot be rasterized
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("geometry is empty")]
    Empty,

    #[error("ring {ring} of polygon {polygon} has fewer than 3 distinct vertices")]
    TooFewVertices { polygon: usize, ring: usize },

    #[error("geometry has zero area")]
    ZeroArea,

    #[error("ring {ring} of polygon {polygon} intersects itself near ({x}, {y})")]
    SelfIntersection {
        polygon: usize,
        ring: usize,
        x: f64,
        y: f64,
    },

    #[error("geometry has non-finite coordinates")]
    NonFinite,
}

/// Ring vertices without the closing duplicate
pub fn open_ring(ring: &LineString<f64>) -> &[Coord<f64>] {
    let coords = &ring.0[..];
    match (coords.first(), coords.last()) {
        (Some(a), Some(b)) if coords.len() > 1 && a == b => &coords[..coords.len() - 1],
        _ => coords,
    }
}

/// Check that a zone can be rasterized.
///
/// Rejects empty geometry, rings with fewer than three distinct vertices,
/// zero-area geometry and self-intersecting rings. Interactions between
/// different rings are not checked.
pub fn validate_zone(geometry: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if geometry.0.is_empty() || geometry.0.iter().all(|p| p.exterior().0.is_empty()) {
        return Err(GeometryError::Empty);
    }

    for (pi, polygon) in geometry.0.iter().enumerate() {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        for (ri, ring) in rings.enumerate() {
            let vertices = open_ring(ring);
            if vertices.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(GeometryError::NonFinite);
            }
            if distinct_vertices(vertices) < 3 {
                return Err(GeometryError::TooFewVertices { polygon: pi, ring: ri });
            }
            if let Some(at) = find_self_intersection(vertices) {
                return Err(GeometryError::SelfIntersection {
                    polygon: pi,
                    ring: ri,
                    x: at.x,
                    y: at.y,
                });
            }
        }
    }

    let area = zone_area(geometry);
    if area.is_nan() || area <= 0.0 {
        return Err(GeometryError::ZeroArea);
    }
    Ok(())
}

fn distinct_vertices(vertices: &[Coord<f64>]) -> usize {
    let mut seen: Vec<Coord<f64>> = Vec::with_capacity(3);
    for v in vertices {
        if !seen.contains(v) {
            seen.push(*v);
            if seen.len() >= 3 {
                break;
            }
        }
    }
    seen.len()
}

fn orient(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(p1: Coord<f64>, p2: Coord<f64>, q1: Coord<f64>, q2: Coord<f64>) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// First point where two non-adjacent edges of an open ring meet
fn find_self_intersection(vertices: &[Coord<f64>]) -> Option<Coord<f64>> {
    // Consecutive duplicates would make adjacent edges look disjoint
    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(vertices.len());
    for v in vertices {
        if ring.last() != Some(v) {
            ring.push(*v);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }

    let n = ring.len();
    if n < 4 {
        return None;
    }
    for i in 0..n {
        let (a1, a2) = (ring[i], ring[(i + 1) % n]);
        for j in (i + 2)..n {
            // Edge n-1 shares vertex 0 with edge 0
            if i == 0 && j == n - 1 {
                continue;
            }
            let (b1, b2) = (ring[j], ring[(j + 1) % n]);
            if a1.x.max(a2.x) < b1.x.min(b2.x)
                || b1.x.max(b2.x) < a1.x.min(a2.x)
                || a1.y.max(a2.y) < b1.y.min(b2.y)
                || b1.y.max(b2.y) < a1.y.min(a2.y)
            {
                continue;
            }
            if segments_intersect(a1, a2, b1, b2) {
                return Some(b1);
            }
        }
    }
    None
}
