//! Vector helpers for zone overlay
//!
//! - Clip: Sutherland-Hodgman ring clipping against pixel cells
//! - Measurements: ring and zone areas
//! - Validity: degenerate and self-intersecting zone detection

mod clip;
mod measurements;
mod validity;

pub use clip::{ClipRect, Edge, clip_ring};
pub use measurements::{ring_signed_area, zone_area};
pub use validity::{GeometryError, open_ring, validate_zone};
