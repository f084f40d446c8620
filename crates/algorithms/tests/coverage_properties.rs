//! Coverage mask properties over irregular zones and non-unit grids.
//!
//! - Geometric weights x pixel area sum to the zone area
//! - Reversing ring winding does not change any weight
//! - All-touched selects a superset of strict

use approx::assert_relative_eq;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use polystat_algorithms::rasterize::{CoverageMask, RasterizeMode, rasterize};
use polystat_algorithms::vector::zone_area;
use polystat_core::{GeoTransform, PixelWindow};

/// Small deterministic generator, enough to vary vertex radii
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Star-shaped ring around (cx, cy); simple because angles increase
fn star(rng: &mut Lcg, cx: f64, cy: f64, r_min: f64, r_max: f64, n: usize) -> LineString<f64> {
    let mut pts: Vec<Coord<f64>> = (0..n)
        .map(|i| {
            let angle = i as f64 / n as f64 * std::f64::consts::TAU;
            let r = r_min + (r_max - r_min) * rng.next_f64();
            Coord {
                x: cx + r * angle.cos(),
                y: cy + r * angle.sin(),
            }
        })
        .collect();
    pts.push(pts[0]);
    LineString::new(pts)
}

fn reversed(ring: &LineString<f64>) -> LineString<f64> {
    LineString::new(ring.0.iter().rev().copied().collect())
}

/// 30 m grid, 200 x 200 cells, origin at (500000, 4200000)
fn grid() -> (GeoTransform, PixelWindow) {
    (
        GeoTransform::new(500_000.0, 4_200_000.0, 30.0, -30.0),
        PixelWindow::full(200, 200),
    )
}

fn zones() -> Vec<MultiPolygon<f64>> {
    let mut rng = Lcg(42);
    let mut out = Vec::new();
    for k in 0..6 {
        let cx = 500_000.0 + 1_000.0 + 700.0 * k as f64 + 13.7;
        let cy = 4_200_000.0 - 2_000.0 - 300.0 * k as f64 - 4.1;
        let exterior = star(&mut rng, cx, cy, 150.0, 600.0, 12 + 5 * k);
        let holes = if k % 2 == 0 {
            vec![reversed(&star(&mut rng, cx, cy, 40.0, 90.0, 7))]
        } else {
            vec![]
        };
        out.push(MultiPolygon::new(vec![Polygon::new(exterior, holes)]));
    }
    // Two disjoint parts
    let a = star(&mut rng, 501_000.0, 4_195_000.0, 50.0, 120.0, 9);
    let b = star(&mut rng, 503_000.0, 4_196_000.0, 10.0, 25.0, 6);
    out.push(MultiPolygon::new(vec![
        Polygon::new(a, vec![]),
        Polygon::new(b, vec![]),
    ]));
    out
}

fn mask(zone: &MultiPolygon<f64>, mode: RasterizeMode) -> CoverageMask {
    let (transform, window) = grid();
    rasterize(zone, &transform, &window, mode).unwrap()
}

#[test]
fn geometric_weights_sum_to_zone_area() {
    let (transform, _) = grid();
    for zone in zones() {
        let covered = mask(&zone, RasterizeMode::Geometric).total_weight() * transform.pixel_area();
        assert_relative_eq!(covered, zone_area(&zone), max_relative = 1e-6);
    }
}

#[test]
fn geometric_weights_ignore_winding() {
    for zone in zones() {
        let flipped = MultiPolygon::new(
            zone.0
                .iter()
                .map(|p| {
                    Polygon::new(
                        reversed(p.exterior()),
                        p.interiors().iter().map(reversed).collect(),
                    )
                })
                .collect(),
        );
        let a = mask(&zone, RasterizeMode::Geometric);
        let b = mask(&flipped, RasterizeMode::Geometric);
        for ((_, wa), (_, wb)) in a.indexed_weights().zip(b.indexed_weights()) {
            assert_relative_eq!(wa, wb, epsilon = 1e-9);
        }
    }
}

#[test]
fn all_touched_contains_strict() {
    for zone in zones() {
        let strict = mask(&zone, RasterizeMode::Strict);
        let touched = mask(&zone, RasterizeMode::AllTouched);
        let geometric = mask(&zone, RasterizeMode::Geometric);
        assert!(touched.included_count() >= strict.included_count());
        for ((idx, s), (_, t)) in strict.indexed_weights().zip(touched.indexed_weights()) {
            if s > 0.0 {
                assert_eq!(t, 1.0, "strict cell {:?} missing from all-touched", idx);
            }
        }
        // All-touched is exactly the set of cells with positive coverage,
        // plus centre hits
        for ((idx, g), (_, t)) in geometric.indexed_weights().zip(touched.indexed_weights()) {
            if g > 0.0 {
                assert_eq!(t, 1.0, "covered cell {:?} missing from all-touched", idx);
            }
        }
    }
}

#[test]
fn weights_stay_in_unit_interval() {
    for zone in zones() {
        for (_, w) in mask(&zone, RasterizeMode::Geometric).indexed_weights() {
            assert!((0.0..=1.0).contains(&w));
        }
    }
}
