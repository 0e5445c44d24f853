//! Classifier - layers to Objects and Boundaries by naming convention
//!
//! Objects render into the composed card; boundaries are layout regions that
//! never render themselves. Both are views over the same layer map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::card::CardType;
use crate::geometry::Rect;
use crate::svg_source::{BlendMode, FadeZone, Layer, LayerStyle, SourceDocument};

/// Layers with this prefix are only ever boundaries.
const BOUNDARY_PREFIX: &str = "boundary-";

/// Margin of the preferred rectangle inside the safe rectangle, per side.
pub const PREFERRED_INSET: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameVariant {
    Creature,
    Anthem,
    Artifact,
    Spell,
}

impl FrameVariant {
    pub const ALL: [FrameVariant; 4] = [
        FrameVariant::Creature,
        FrameVariant::Anthem,
        FrameVariant::Artifact,
        FrameVariant::Spell,
    ];

    /// Incantations share the spell frame.
    pub fn for_card(card_type: CardType) -> Self {
        match card_type {
            CardType::Creature => FrameVariant::Creature,
            CardType::Anthem => FrameVariant::Anthem,
            CardType::Artifact => FrameVariant::Artifact,
            CardType::Spell | CardType::Incantation => FrameVariant::Spell,
        }
    }

    pub fn card_types(&self) -> &'static [CardType] {
        match self {
            FrameVariant::Creature => &[CardType::Creature],
            FrameVariant::Anthem => &[CardType::Anthem],
            FrameVariant::Artifact => &[CardType::Artifact],
            FrameVariant::Spell => &[CardType::Spell, CardType::Incantation],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    FrameBase,
    FrameBorder,
    Frame(FrameVariant),
    NameStyle,
    EffectStyle,
    StatsStyle,
    ArtFrame,
    AnthemGlow,
    SetIconSlot,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::FrameBase => "frame-base",
            ObjectKind::FrameBorder => "frame-border",
            ObjectKind::Frame(FrameVariant::Creature) => "frame-creature",
            ObjectKind::Frame(FrameVariant::Anthem) => "frame-anthem",
            ObjectKind::Frame(FrameVariant::Artifact) => "frame-artifact",
            ObjectKind::Frame(FrameVariant::Spell) => "frame-spell",
            ObjectKind::NameStyle => "name-style",
            ObjectKind::EffectStyle => "effect-style",
            ObjectKind::StatsStyle => "stats-style",
            ObjectKind::ArtFrame => "art-frame",
            ObjectKind::AnthemGlow => "anthem-glow",
            ObjectKind::SetIconSlot => "set-icon-slot",
        }
    }

    /// Parents that must be present whenever this object is.
    pub fn dependencies(&self) -> &'static [ObjectKind] {
        match self {
            ObjectKind::FrameBorder | ObjectKind::Frame(_) | ObjectKind::ArtFrame => &[ObjectKind::FrameBase],
            ObjectKind::AnthemGlow => &[ObjectKind::Frame(FrameVariant::Anthem)],
            _ => &[],
        }
    }

    /// Objects that belong under the `card-frame` group of a composed card.
    pub fn is_frame_part(&self) -> bool {
        matches!(
            self,
            ObjectKind::FrameBase | ObjectKind::FrameBorder | ObjectKind::Frame(_) | ObjectKind::AnthemGlow
        )
    }
}

impl Serialize for ObjectKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer name table for objects, matched in this order.
pub const OBJECT_NAMES: &[(&str, ObjectKind)] = &[
    ("frame-base", ObjectKind::FrameBase),
    ("frame-border", ObjectKind::FrameBorder),
    ("frame-creature", ObjectKind::Frame(FrameVariant::Creature)),
    ("frame-anthem", ObjectKind::Frame(FrameVariant::Anthem)),
    ("frame-artifact", ObjectKind::Frame(FrameVariant::Artifact)),
    ("frame-spell", ObjectKind::Frame(FrameVariant::Spell)),
    ("text-style-name", ObjectKind::NameStyle),
    ("text-style-effect", ObjectKind::EffectStyle),
    ("text-style-stats", ObjectKind::StatsStyle),
    ("art-frame", ObjectKind::ArtFrame),
    ("anthem-glow", ObjectKind::AnthemGlow),
    ("set-icon", ObjectKind::SetIconSlot),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    NameText,
    EffectText,
    CostSymbols,
    KeywordSymbols,
    StatsText,
    SetIcon,
}

impl BoundaryKind {
    pub const ALL: [BoundaryKind; 6] = [
        BoundaryKind::NameText,
        BoundaryKind::EffectText,
        BoundaryKind::CostSymbols,
        BoundaryKind::KeywordSymbols,
        BoundaryKind::StatsText,
        BoundaryKind::SetIcon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryKind::NameText => "name-text",
            BoundaryKind::EffectText => "effect-text",
            BoundaryKind::CostSymbols => "cost-symbols",
            BoundaryKind::KeywordSymbols => "keyword-symbols",
            BoundaryKind::StatsText => "stats-text",
            BoundaryKind::SetIcon => "set-icon",
        }
    }

    /// Only the effect text wraps.
    pub fn is_single_line(&self) -> bool {
        !matches!(self, BoundaryKind::EffectText)
    }

    pub fn default_font(&self) -> FontConstraints {
        let (min_size, max_size, preferred_size, family, weight, allow_bold, allow_italic) = match self {
            BoundaryKind::NameText => (24.0, 48.0, 36.0, "serif", "bold", true, false),
            BoundaryKind::EffectText => (12.0, 24.0, 16.0, "sans-serif", "normal", true, true),
            BoundaryKind::CostSymbols => (20.0, 40.0, 32.0, "monospace", "normal", false, false),
            BoundaryKind::KeywordSymbols => (14.0, 24.0, 18.0, "sans-serif", "bold", true, false),
            BoundaryKind::StatsText => (18.0, 36.0, 24.0, "serif", "bold", true, false),
            BoundaryKind::SetIcon => (16.0, 32.0, 24.0, "sans-serif", "normal", false, false),
        };
        FontConstraints {
            min_size,
            preferred_size,
            max_size,
            family: family.to_string(),
            weight: weight.to_string(),
            allow_bold,
            allow_italic,
        }
    }

    pub fn default_content(&self) -> ContentKind {
        match self {
            BoundaryKind::NameText | BoundaryKind::EffectText | BoundaryKind::StatsText => ContentKind::Text,
            BoundaryKind::CostSymbols | BoundaryKind::KeywordSymbols | BoundaryKind::SetIcon => ContentKind::Symbol,
        }
    }

    pub fn char_budget(&self) -> usize {
        match self {
            BoundaryKind::NameText => 25,
            BoundaryKind::EffectText => 300,
            BoundaryKind::CostSymbols => 5,
            BoundaryKind::KeywordSymbols => 10,
            BoundaryKind::StatsText => 10,
            BoundaryKind::SetIcon => 1,
        }
    }

    pub fn line_height(&self) -> f64 {
        match self {
            BoundaryKind::NameText => 1.2,
            BoundaryKind::EffectText => 1.4,
            BoundaryKind::CostSymbols | BoundaryKind::KeywordSymbols | BoundaryKind::SetIcon => 1.0,
            BoundaryKind::StatsText => 1.1,
        }
    }

    pub fn alignment(&self) -> Alignment {
        match self {
            BoundaryKind::EffectText | BoundaryKind::KeywordSymbols => Alignment::Left,
            _ => Alignment::Center,
        }
    }

    /// The style object whose presentation applies to this boundary's text.
    pub fn style_object(&self) -> Option<ObjectKind> {
        match self {
            BoundaryKind::NameText => Some(ObjectKind::NameStyle),
            BoundaryKind::EffectText | BoundaryKind::KeywordSymbols => Some(ObjectKind::EffectStyle),
            BoundaryKind::StatsText => Some(ObjectKind::StatsStyle),
            BoundaryKind::CostSymbols | BoundaryKind::SetIcon => None,
        }
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const BOUNDARY_NAMES: &[(&str, BoundaryKind)] = &[
    ("boundary-name-text", BoundaryKind::NameText),
    ("boundary-effect-text", BoundaryKind::EffectText),
    ("boundary-cost-symbols", BoundaryKind::CostSymbols),
    ("boundary-keyword-symbols", BoundaryKind::KeywordSymbols),
    ("boundary-stats-text", BoundaryKind::StatsText),
    ("boundary-set-icon", BoundaryKind::SetIcon),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontConstraints {
    pub min_size: f64,
    pub preferred_size: f64,
    pub max_size: f64,
    pub family: String,
    pub weight: String,
    pub allow_bold: bool,
    pub allow_italic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Symbol,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    /// SVG `text-anchor` value.
    pub fn anchor(&self) -> &'static str {
        match self {
            Alignment::Left => "start",
            Alignment::Center => "middle",
            Alignment::Right => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateObject {
    pub kind: ObjectKind,
    pub source_id: String,
    pub fragment: String,
    pub style: LayerStyle,
    pub order: usize,
    pub blend_mode: BlendMode,
    pub dependencies: Vec<ObjectKind>,
    pub visible: Rect,
    pub fade_zones: Vec<FadeZone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub source_id: String,
    /// Hard bound.
    pub safe: Rect,
    /// Inner bound, always inside `safe`.
    pub preferred: Rect,
    pub font: FontConstraints,
    pub content: ContentKind,
    pub char_budget: usize,
    pub line_height: f64,
    pub alignment: Alignment,
}

impl Boundary {
    /// A boundary over `safe` with the per-kind defaults.
    pub fn with_defaults(kind: BoundaryKind, source_id: impl Into<String>, safe: Rect) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            safe,
            preferred: safe.inset_fraction(PREFERRED_INSET),
            font: kind.default_font(),
            content: kind.default_content(),
            char_budget: kind.char_budget(),
            line_height: kind.line_height(),
            alignment: kind.alignment(),
        }
    }
}

/// Result of one classification pass.
#[derive(Debug, Clone)]
pub struct Classified<K: Ord, V> {
    pub entries: BTreeMap<K, V>,
    pub warnings: Vec<String>,
}

/// Exact, then prefix, then substring; the table order breaks ties within a tier.
fn match_name<K: Copy>(name: &str, table: &[(&str, K)]) -> Option<K> {
    let tiers: [fn(&str, &str) -> bool; 3] = [
        |name, pat| name == pat,
        |name, pat| name.starts_with(pat),
        |name, pat| name.contains(pat),
    ];
    tiers
        .iter()
        .find_map(|tier| table.iter().find(|(pat, _)| tier(name, pat)).map(|(_, k)| *k))
}

/// Match on the id first, then on the label.
fn match_layer<K: Copy>(layer: &Layer, table: &[(&str, K)]) -> Option<K> {
    match_name(&layer.id, table).or_else(|| match_name(&layer.label, table))
}

fn is_boundary_layer(layer: &Layer) -> bool {
    layer.id.starts_with(BOUNDARY_PREFIX) || layer.label.starts_with(BOUNDARY_PREFIX)
}

/// Object map from the layer map. The first layer in stacking order wins a kind.
pub fn classify_objects(doc: &SourceDocument) -> Classified<ObjectKind, TemplateObject> {
    let mut entries: BTreeMap<ObjectKind, TemplateObject> = BTreeMap::new();
    let mut warnings = Vec::new();

    for layer in doc.layers_in_order() {
        if is_boundary_layer(layer) {
            continue;
        }
        let Some(kind) = match_layer(layer, OBJECT_NAMES) else {
            continue;
        };
        if let Some(existing) = entries.get(&kind) {
            warnings.push(format!(
                "layer {:?} also matches {kind}; keeping {:?}",
                layer.id, existing.source_id
            ));
            continue;
        }
        entries.insert(
            kind,
            TemplateObject {
                kind,
                source_id: layer.id.clone(),
                fragment: layer.fragment.clone(),
                style: layer.style.clone(),
                order: layer.order,
                blend_mode: layer.blend_mode,
                dependencies: kind.dependencies().to_vec(),
                visible: layer.visible,
                fade_zones: layer.fade_zones.clone(),
            },
        );
    }

    Classified { entries, warnings }
}

/// Boundary map from the layer map. The layer's visible rectangle is the safe rectangle.
pub fn classify_boundaries(doc: &SourceDocument) -> Classified<BoundaryKind, Boundary> {
    let mut entries: BTreeMap<BoundaryKind, Boundary> = BTreeMap::new();
    let mut warnings = Vec::new();

    for layer in doc.layers_in_order() {
        let Some(kind) = match_layer(layer, BOUNDARY_NAMES) else {
            continue;
        };
        if let Some(existing) = entries.get(&kind) {
            warnings.push(format!(
                "layer {:?} also matches boundary {kind}; keeping {:?}",
                layer.id, existing.source_id
            ));
            continue;
        }
        entries.insert(kind, Boundary::with_defaults(kind, layer.id.clone(), layer.visible));
    }

    Classified { entries, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svg_source::parse_source;

    const DOC: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
        xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape">
      <g id="frame-base"/>
      <g id="layer7" inkscape:label="frame-creature-main"/>
      <g id="boundary-set-icon" data-viewbox="1300 1700 100 100"/>
      <g id="set-icon"/>
      <g id="boundary-name-text-main" data-viewbox="100 100 1000 100"/>
      <g id="decoration"/>
      <g id="frame-base-copy"/>
    </svg>"#;

    #[test]
    fn objects_by_id_then_label() {
        let doc = parse_source(DOC).unwrap();
        let objects = classify_objects(&doc);
        let kinds: Vec<ObjectKind> = objects.entries.keys().copied().collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::FrameBase, ObjectKind::Frame(FrameVariant::Creature), ObjectKind::SetIconSlot]
        );
        assert_eq!(objects.entries[&ObjectKind::SetIconSlot].source_id, "set-icon");
        assert_eq!(objects.entries[&ObjectKind::FrameBase].source_id, "frame-base");
        assert_eq!(objects.warnings.len(), 1);
        assert_eq!(
            objects.entries[&ObjectKind::Frame(FrameVariant::Creature)].dependencies,
            vec![ObjectKind::FrameBase]
        );
    }

    #[test]
    fn boundaries_get_kind_defaults() {
        let doc = parse_source(DOC).unwrap();
        let boundaries = classify_boundaries(&doc);
        assert_eq!(boundaries.entries.len(), 2);

        let name = &boundaries.entries[&BoundaryKind::NameText];
        assert_eq!(name.safe, Rect::new(100.0, 100.0, 1000.0, 100.0));
        assert_eq!(name.preferred, Rect::new(150.0, 105.0, 900.0, 90.0));
        assert_eq!(name.char_budget, 25);
        assert_eq!(name.alignment, Alignment::Center);
        assert_eq!(name.font.family, "serif");

        let icon = &boundaries.entries[&BoundaryKind::SetIcon];
        assert_eq!(icon.content, ContentKind::Symbol);
        assert_eq!(icon.char_budget, 1);
    }

    #[test]
    fn match_tiers_prefer_exact() {
        assert_eq!(match_name("frame-anthem-glow", OBJECT_NAMES), Some(ObjectKind::Frame(FrameVariant::Anthem)));
        assert_eq!(match_name("anthem-glow", OBJECT_NAMES), Some(ObjectKind::AnthemGlow));
        assert_eq!(match_name("my-art-frame", OBJECT_NAMES), Some(ObjectKind::ArtFrame));
        assert_eq!(match_name("background", OBJECT_NAMES), None);
    }

    #[test]
    fn dependency_table() {
        assert_eq!(ObjectKind::AnthemGlow.dependencies(), &[ObjectKind::Frame(FrameVariant::Anthem)]);
        assert!(ObjectKind::NameStyle.dependencies().is_empty());
        assert_eq!(FrameVariant::for_card(CardType::Incantation), FrameVariant::Spell);
    }
}
