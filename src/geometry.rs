//! Canvas geometry shared by the parser, layout solver and composer.

use serde::{Deserialize, Serialize};

/// Card canvas width in SVG user units.
pub const CANVAS_WIDTH: f64 = 1500.0;
/// Card canvas height in SVG user units.
pub const CANVAS_HEIGHT: f64 = 2100.0;

/// Axis-aligned rectangle in SVG user space (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// The full card canvas.
    pub const fn canvas() -> Self {
        Self::new(0.0, 0.0, CANVAS_WIDTH, CANVAS_HEIGHT)
    }

    /// Parse a view-box style value: four whitespace (or comma) separated numbers.
    pub fn parse_view_box(value: &str) -> Option<Self> {
        let parts: Vec<f64> = value
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [x, y, w, h] if parts.iter().all(|v| v.is_finite()) => Some(Self::new(*x, *y, *w, *h)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    /// True when `other` lies entirely inside `self` (edges may touch).
    pub fn contains(&self, other: &Rect) -> bool {
        const EPS: f64 = 1e-6;
        other.x + EPS >= self.x
            && other.y + EPS >= self.y
            && other.right() <= self.right() + EPS
            && other.bottom() <= self.bottom() + EPS
    }

    /// Shrink by a fraction of the size on every side.
    pub fn inset_fraction(&self, fraction: f64) -> Rect {
        let mx = self.width * fraction;
        let my = self.height * fraction;
        Rect::new(
            self.x + mx,
            self.y + my,
            (self.width - 2.0 * mx).max(0.0),
            (self.height - 2.0 * my).max(0.0),
        )
    }

    /// Split horizontally into `[left, right]` halves.
    pub fn split_halves(&self) -> (Rect, Rect) {
        let half = self.width / 2.0;
        (
            Rect::new(self.x, self.y, half, self.height),
            Rect::new(self.x + half, self.y, half, self.height),
        )
    }
}
