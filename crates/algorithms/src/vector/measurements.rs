//! Geometric measurements: ring and zone areas

use geo::{Area as GeoArea, Coord, MultiPolygon};

/// Shoelace signed area of a ring; positive when counter-clockwise in a
/// y-up frame. A repeated closing vertex is harmless.
pub fn ring_signed_area(ring: &[Coord<f64>]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

/// Unsigned area of a multi-polygon (holes subtracted).
///
/// Independent of ring orientation. For a geographic CRS the result is in
/// squared degrees.
pub fn zone_area(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.unsigned_area()
}
