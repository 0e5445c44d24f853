//! Text Layout Solver - largest font size that fits a boundary
//!
//! The solver is pure: for the same boundary, text and [`FontMetrics`] it
//! produces identical placements. Overflow at the minimum size is reported
//! on the placement, never as an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{Alignment, Boundary};
use crate::geometry::Rect;

/// Private-use code point standing in for an inline symbol during measurement.
pub const SYMBOL_GLYPH: char = '\u{E000}';

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub width: f64,
    pub height: f64,
}

/// Font metrics capability keyed by (family, size).
pub trait FontMetrics: Send + Sync {
    fn measure(&self, family: &str, size: f64, text: &str) -> TextExtent;

    /// Distance from the top of a line box to its baseline.
    fn ascent(&self, _family: &str, size: f64) -> f64 {
        size * 0.8
    }

    /// Greedy whitespace wrap. A `\n` always starts a new line; a single word
    /// wider than `max_width` gets a line of its own.
    fn wrap(&self, family: &str, size: f64, text: &str, max_width: f64) -> Vec<String> {
        let mut lines = Vec::new();
        for paragraph in text.split('\n') {
            let mut current = String::new();
            for word in paragraph.split_whitespace() {
                if current.is_empty() {
                    current.push_str(word);
                    continue;
                }
                let candidate = format!("{current} {word}");
                if self.measure(family, size, &candidate).width <= max_width {
                    current = candidate;
                } else {
                    lines.push(std::mem::take(&mut current));
                    current.push_str(word);
                }
            }
            lines.push(current);
        }
        lines
    }
}

/// Deterministic per-character advance widths in em units.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceTable;

impl AdvanceTable {
    fn advance_em(family: FamilyClass, c: char) -> f64 {
        if c == SYMBOL_GLYPH {
            return 1.0;
        }
        if family == FamilyClass::Monospace {
            return 0.6;
        }
        match c {
            ' ' | 'i' | 'l' | 'j' | 't' | 'f' | 'I' | '.' | ',' | ':' | ';' | '!' | '\'' | '|' => 0.28,
            'm' | 'w' | 'M' | 'W' => 0.8,
            'A'..='Z' => 0.65,
            '0'..='9' => 0.55,
            _ => match family {
                FamilyClass::Serif => 0.5,
                _ => 0.52,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyClass {
    Serif,
    SansSerif,
    Monospace,
}

impl FamilyClass {
    fn of(family: &str) -> Self {
        let lower = family.to_ascii_lowercase();
        if lower.contains("mono") {
            FamilyClass::Monospace
        } else if lower.contains("sans") {
            FamilyClass::SansSerif
        } else {
            FamilyClass::Serif
        }
    }
}

impl FontMetrics for AdvanceTable {
    fn measure(&self, family: &str, size: f64, text: &str) -> TextExtent {
        let class = FamilyClass::of(family);
        let em: f64 = text.chars().map(|c| Self::advance_em(class, c)).sum();
        TextExtent { width: em * size, height: size }
    }
}

/// One region to fill.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub element_id: String,
    pub text: String,
    pub single_line: bool,
    pub fill: String,
    pub classes: Vec<String>,
}

/// Solver output for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub element_id: String,
    /// Origin x, interpreted through `anchor`.
    pub x: f64,
    /// Baseline of the first line.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub anchor: Alignment,
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: String,
    pub fill: String,
    pub classes: Vec<String>,
    pub lines: Vec<String>,
    /// Baseline-to-baseline distance.
    pub line_advance: f64,
    pub overflow: bool,
}

impl Placement {
    /// Box the rendered text occupies.
    pub fn bounds(&self, ascent: f64) -> Rect {
        let left = match self.anchor {
            Alignment::Left => self.x,
            Alignment::Center => self.x - self.width / 2.0,
            Alignment::Right => self.x - self.width,
        };
        Rect::new(left, self.y - ascent, self.width, self.height)
    }
}

#[derive(Clone)]
pub struct LayoutSolver {
    metrics: Arc<dyn FontMetrics>,
}

impl Default for LayoutSolver {
    fn default() -> Self {
        Self::new(Arc::new(AdvanceTable))
    }
}

impl std::fmt::Debug for LayoutSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutSolver").finish_non_exhaustive()
    }
}

struct Attempt {
    lines: Vec<String>,
    width: f64,
    height: f64,
    fits: bool,
}

impl LayoutSolver {
    pub fn new(metrics: Arc<dyn FontMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &dyn FontMetrics {
        self.metrics.as_ref()
    }

    /// First candidate size: the preferred size, scaled down by the factor the
    /// content exceeds the character budget, clamped to [min, max].
    pub fn starting_size(boundary: &Boundary, text: &str) -> f64 {
        let font = &boundary.font;
        let (lo, hi) = size_range(boundary);
        let len = text.chars().count();
        let mut size = font.preferred_size;
        if boundary.char_budget > 0 && len > boundary.char_budget {
            let r = len as f64 / boundary.char_budget as f64;
            size = font.preferred_size / r;
        }
        size.clamp(lo, hi)
    }

    pub fn solve(&self, boundary: &Boundary, request: &TextRequest) -> Placement {
        let (lo, _) = size_range(boundary);
        let family = boundary.font.family.as_str();

        let mut size = Self::starting_size(boundary, &request.text);
        let mut attempt = self.attempt(boundary, request, size);
        while !attempt.fits && size > lo {
            size = (size - 1.0).max(lo);
            attempt = self.attempt(boundary, request, size);
        }

        let overflow = !attempt.fits;
        if overflow {
            debug!(
                boundary = %boundary.kind,
                element = %request.element_id,
                size,
                "text overflows at minimum size"
            );
        }

        let preferred = boundary.preferred;
        let x = match boundary.alignment {
            Alignment::Left => preferred.x,
            Alignment::Center => preferred.center_x(),
            Alignment::Right => preferred.right(),
        };
        let y = preferred.y + self.metrics.ascent(family, size);

        Placement {
            element_id: request.element_id.clone(),
            x,
            y,
            width: attempt.width,
            height: attempt.height,
            anchor: boundary.alignment,
            font_family: boundary.font.family.clone(),
            font_size: size,
            font_weight: boundary.font.weight.clone(),
            fill: request.fill.clone(),
            classes: request.classes.clone(),
            lines: attempt.lines,
            line_advance: size * boundary.line_height,
            overflow,
        }
    }

    fn attempt(&self, boundary: &Boundary, request: &TextRequest, size: f64) -> Attempt {
        let family = boundary.font.family.as_str();
        let preferred = boundary.preferred;

        if request.single_line {
            let line = request.text.split_whitespace().collect::<Vec<_>>().join(" ");
            let extent = self.metrics.measure(family, size, &line);
            return Attempt {
                fits: extent.width <= preferred.width && extent.height <= preferred.height,
                width: extent.width,
                height: extent.height,
                lines: vec![line],
            };
        }

        let lines = self.metrics.wrap(family, size, &request.text, preferred.width);
        let width = lines
            .iter()
            .map(|l| self.metrics.measure(family, size, l).width)
            .fold(0.0_f64, f64::max);
        let height = lines.len() as f64 * size * boundary.line_height;
        Attempt {
            fits: width <= preferred.width && height <= preferred.height,
            width,
            height,
            lines,
        }
    }
}

/// `(min, max)` with the bounds put in order if a template declares them reversed.
fn size_range(boundary: &Boundary) -> (f64, f64) {
    let font = &boundary.font;
    (font.min_size.min(font.max_size), font.max_size.max(font.min_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BoundaryKind;

    fn request(id: &str, text: &str, single_line: bool) -> TextRequest {
        TextRequest {
            element_id: id.to_string(),
            text: text.to_string(),
            single_line,
            fill: "#000000".to_string(),
            classes: vec![],
        }
    }

    #[test]
    fn short_name_uses_preferred_size_and_centers() {
        let b = Boundary::with_defaults(BoundaryKind::NameText, "n", Rect::new(125.0, 90.0, 1250.0, 80.0));
        let p = LayoutSolver::default().solve(&b, &request("card-name", "Mountain Bear", true));
        assert_eq!(p.font_size, 36.0);
        assert!(!p.overflow);
        assert_eq!(p.x, b.preferred.center_x());
        assert_eq!(p.y, b.preferred.y + 36.0 * 0.8);
        assert!(b.safe.contains(&p.bounds(36.0 * 0.8)));
    }

    #[test]
    fn long_name_shrinks_from_budget_ratio() {
        let b = Boundary::with_defaults(BoundaryKind::NameText, "n", Rect::new(0.0, 0.0, 400.0, 80.0));
        let name = "The Unbelievably Long Name Of The Ancient One";
        assert!(LayoutSolver::starting_size(&b, name) < 36.0);
        let p = LayoutSolver::default().solve(&b, &request("card-name", name, true));
        assert!(p.font_size >= 24.0);
        assert!(p.font_size <= LayoutSolver::starting_size(&b, name));
    }

    #[test]
    fn effect_wraps_within_preferred_width() {
        let b = Boundary::with_defaults(BoundaryKind::EffectText, "e", Rect::new(160.0, 1250.0, 600.0, 500.0));
        let text = "When this attacks, it gets +2/+0 until end of turn. Draw a card, then discard a card.";
        let p = LayoutSolver::default().solve(&b, &request("effect-text", text, false));
        assert!(!p.overflow);
        assert!(p.lines.len() > 1);
        assert!(p.width <= b.preferred.width);
        assert_eq!(p.line_advance, p.font_size * 1.4);
        let ascent = p.font_size * 0.8;
        assert!(b.safe.contains(&p.bounds(ascent)));
    }

    #[test]
    fn hard_breaks_force_lines() {
        let lines = AdvanceTable.wrap("sans-serif", 16.0, "First\nSecond line", 10_000.0);
        assert_eq!(lines, vec!["First", "Second line"]);
    }

    #[test]
    fn overflow_lands_on_min_size() {
        let b = Boundary::with_defaults(BoundaryKind::EffectText, "e", Rect::new(0.0, 0.0, 200.0, 60.0));
        let text = "word ".repeat(100);
        let p = LayoutSolver::default().solve(&b, &request("effect-text", &text, false));
        assert!(p.overflow);
        assert_eq!(p.font_size, 12.0);
    }

    #[test]
    fn solver_is_deterministic() {
        let b = Boundary::with_defaults(BoundaryKind::EffectText, "e", Rect::new(0.0, 0.0, 500.0, 300.0));
        let r = request("effect-text", "Deal 3 damage to any target.", false);
        let solver = LayoutSolver::default();
        assert_eq!(solver.solve(&b, &r), solver.solve(&b, &r));
    }

    #[test]
    fn symbols_measure_one_em() {
        let e = AdvanceTable.measure("sans-serif", 20.0, &SYMBOL_GLYPH.to_string());
        assert_eq!(e.width, 20.0);
        let m = AdvanceTable.measure("monospace", 10.0, "X3");
        assert_eq!(m.width, 12.0);
    }
}
