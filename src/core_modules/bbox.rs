// THEORY:
// The `BBox` module is the lowest layer of the linker. A `BBox` is a "dumb" data
// container for one axis-aligned rectangle in the shared image coordinate frame,
// and `iou` is the single geometric measurement the rest of the system relies on.
//
// Key architectural principles:
// 1.  **Pure Geometry**: Nothing here knows about frames, clips or scores. IoU is a
//     commutative function of two boxes and nothing else.
// 2.  **Zero-Area Short Circuit**: An empty intersection returns 0 before any area
//     is computed. This is also what keeps two degenerate boxes from dividing by
//     zero, so degenerate input never needs special handling upstream.
// 3.  **Tolerant Areas**: Area is the absolute value of width times height, so a box
//     whose corners arrive in reversed order still reports a sensible size.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle given by its two corners `(x0, y0)` and `(x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Area of the box. Reversed corners still give a non-negative value.
    pub fn area(&self) -> f64 {
        (self.width() * self.height()).abs()
    }

    /// A box with zero area. Its IoU with anything is 0.
    pub fn is_degenerate(&self) -> bool {
        self.area() == 0.0
    }

    /// Corners given as `(x1, y1)`, `(x0, y0)` on at least one axis.
    pub fn is_reversed(&self) -> bool {
        self.x1 < self.x0 || self.y1 < self.y0
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    /// Multiplies both axes by independent factors.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            x1: self.x1 * sx,
            y1: self.y1 * sy,
        }
    }
}

/// Intersection-over-union of two boxes, in `[0, 1]`.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let x_a = a.x0.max(b.x0);
    let y_a = a.y0.max(b.y0);
    let x_b = a.x1.min(b.x1);
    let y_b = a.y1.min(b.y1);

    let intersection = (x_b - x_a).max(0.0) * (y_b - y_a).max(0.0);
    if intersection == 0.0 {
        return 0.0;
    }

    intersection / (a.area() + b.area() - intersection)
}
