//! Ring clipping
//!
//! Sutherland-Hodgman clipping of a polygon ring against an axis-aligned
//! rectangle. The rectangle is convex, so clipping a concave ring can leave
//! zero-width bridges in the output; they do not change its signed area,
//! which is all the coverage computation needs.

use geo::Coord;

/// A clipping rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ClipRect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// The unit cell whose top-left corner is (col, row)
    pub fn cell(col: usize, row: usize) -> Self {
        let (x, y) = (col as f64, row as f64);
        Self::new(x, y, x + 1.0, y + 1.0)
    }
}

/// Edge of the clipping rectangle
#[derive(Debug, Clone, Copy)]
pub enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    /// Edges bounding the rectangle in y only
    pub const HORIZONTAL: [Edge; 2] = [Edge::Bottom, Edge::Top];
    /// Edges bounding the rectangle in x only
    pub const VERTICAL: [Edge; 2] = [Edge::Left, Edge::Right];
    pub const ALL: [Edge; 4] = [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top];

    fn is_inside(&self, p: &Coord<f64>, rect: &ClipRect) -> bool {
        match self {
            Edge::Left => p.x >= rect.min_x,
            Edge::Right => p.x <= rect.max_x,
            Edge::Bottom => p.y >= rect.min_y,
            Edge::Top => p.y <= rect.max_y,
        }
    }

    fn intersect(&self, p: &Coord<f64>, q: &Coord<f64>, rect: &ClipRect) -> Coord<f64> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;

        match self {
            Edge::Left => {
                let t = (rect.min_x - p.x) / dx;
                Coord { x: rect.min_x, y: p.y + t * dy }
            }
            Edge::Right => {
                let t = (rect.max_x - p.x) / dx;
                Coord { x: rect.max_x, y: p.y + t * dy }
            }
            Edge::Bottom => {
                let t = (rect.min_y - p.y) / dy;
                Coord { x: p.x + t * dx, y: rect.min_y }
            }
            Edge::Top => {
                let t = (rect.max_y - p.y) / dy;
                Coord { x: p.x + t * dx, y: rect.max_y }
            }
        }
    }
}

/// Clip an open ring (no repeated closing vertex) against one edge
fn clip_edge(vertices: &[Coord<f64>], edge: Edge, rect: &ClipRect) -> Vec<Coord<f64>> {
    let n = vertices.len();
    let mut output = Vec::with_capacity(n + 2);

    for i in 0..n {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % n];

        match (edge.is_inside(current, rect), edge.is_inside(next, rect)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(edge.intersect(current, next, rect)),
            (false, true) => {
                output.push(edge.intersect(current, next, rect));
                output.push(*next);
            }
            (false, false) => {}
        }
    }

    output
}

/// Clip an open ring against the given rectangle edges.
///
/// Returns an empty vector when nothing of the ring is left.
pub fn clip_ring(vertices: &[Coord<f64>], edges: &[Edge], rect: &ClipRect) -> Vec<Coord<f64>> {
    let mut out = vertices.to_vec();
    for &edge in edges {
        if out.len() < 3 {
            return Vec::new();
        }
        out = clip_edge(&out, edge, rect);
    }
    if out.len() < 3 {
        out.clear();
    }
    out
}
