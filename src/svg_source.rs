//! Template Source Parser - layered SVG to flat layer map
//!
//! Every direct `<g>` child of the root is a layer, and so is any nested
//! group marked `inkscape:groupmode="layer"`. Layers are keyed by id and
//! carry their document-order ordinal, so callers that need stacking order
//! use [`SourceDocument::layers_in_order`].

use std::collections::BTreeMap;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

pub const INKSCAPE_NS: &str = "http://www.inkscape.org/namespaces/inkscape";
pub const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// Prefix of `<symbol>` ids that form the keyword-symbol dictionary.
pub const KEYWORD_SYMBOL_PREFIX: &str = "keyword-";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("root element is <{0}>, expected <svg>")]
    NotSvg(String),

    #[error("document contains no layers")]
    NoLayers,

    #[error("layer {layer}: invalid {attribute} value {value:?}")]
    InvalidAttribute {
        layer: String,
        attribute: &'static str,
        value: String,
    },

    #[error("invalid {attribute} {value:?}: {source}")]
    InvalidVersion {
        attribute: &'static str,
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
}

impl BlendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
        }
    }

    /// Read `mix-blend-mode` from an inline style; anything unrecognised is normal.
    pub fn from_style(style: &str) -> Self {
        match style_property(style, "mix-blend-mode").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("multiply") => BlendMode::Multiply,
            Some("screen") => BlendMode::Screen,
            Some("overlay") => BlendMode::Overlay,
            _ => BlendMode::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FadeDirection {
    LeftToRight,
    TopToBottom,
    Radial,
}

impl FadeDirection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "left-to-right" => Some(FadeDirection::LeftToRight),
            "top-to-bottom" => Some(FadeDirection::TopToBottom),
            "radial" => Some(FadeDirection::Radial),
            _ => None,
        }
    }
}

/// Gradient transition area declared on a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeZone {
    pub area: Rect,
    pub start_opacity: f64,
    pub end_opacity: f64,
    pub direction: FadeDirection,
}

/// Presentation attributes read off a layer group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerStyle {
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
    pub opacity: f64,
    pub transform: Option<String>,
    pub classes: Vec<String>,
    /// Raw inline style, re-applied when the layer is stacked into a document.
    pub inline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub label: String,
    pub visible: Rect,
    pub fade_zones: Vec<FadeZone>,
    /// Document-order ordinal across the flattened layer tree.
    pub order: usize,
    pub blend_mode: BlendMode,
    pub style: LayerStyle,
    /// Serialized children, excluding nested layers.
    pub fragment: String,
}

/// A `<symbol id="keyword-...">` definition, copied verbatim into output defs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSymbol {
    pub symbol_id: String,
    pub markup: String,
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub layers: BTreeMap<String, Layer>,
    /// Keyword name (lowercase) to symbol definition.
    pub keyword_symbols: BTreeMap<String, KeywordSymbol>,
    /// Root `<defs>` content other than keyword symbols.
    pub defs: String,
    /// Prefixed namespace declarations of the root, re-declared on output.
    pub namespaces: BTreeMap<String, String>,
    pub template_version: Version,
    pub engine_min_version: Option<Version>,
    pub warnings: Vec<String>,
}

impl SourceDocument {
    pub fn layers_in_order(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by_key(|l| l.order);
        layers
    }
}

pub fn parse_file(path: &Path) -> Result<SourceDocument, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_source(&text)
}

pub fn parse_source(text: &str) -> Result<SourceDocument, ParseError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(ParseError::NotSvg(root.tag_name().name().to_string()));
    }

    let template_version = parse_version(root, "data-template-version")?
        .unwrap_or_else(|| Version::new(1, 0, 0));
    let engine_min_version = parse_version(root, "data-engine-min-version")?;

    let namespaces = root
        .namespaces()
        .filter_map(|ns| ns.name().map(|prefix| (prefix.to_string(), ns.uri().to_string())))
        .collect();

    let mut collector = LayerCollector {
        text,
        layers: BTreeMap::new(),
        warnings: Vec::new(),
        next_ordinal: 0,
    };
    collector.visit(root, true)?;

    if collector.layers.is_empty() {
        return Err(ParseError::NoLayers);
    }

    let (keyword_symbols, defs) = collect_defs(root, text);

    Ok(SourceDocument {
        layers: collector.layers,
        keyword_symbols,
        defs,
        namespaces,
        template_version,
        engine_min_version,
        warnings: collector.warnings,
    })
}

fn parse_version(node: roxmltree::Node, attribute: &'static str) -> Result<Option<Version>, ParseError> {
    match node.attribute(attribute) {
        None => Ok(None),
        Some(raw) => Version::parse(raw.trim())
            .map(Some)
            .map_err(|source| ParseError::InvalidVersion {
                attribute,
                value: raw.to_string(),
                source,
            }),
    }
}

struct LayerCollector<'a> {
    text: &'a str,
    layers: BTreeMap<String, Layer>,
    warnings: Vec<String>,
    next_ordinal: usize,
}

impl<'a> LayerCollector<'a> {
    fn visit(&mut self, parent: roxmltree::Node, top_level: bool) -> Result<(), ParseError> {
        for child in parent.children().filter(|n| is_group(n)) {
            if !(top_level || is_layer_group(&child)) {
                continue;
            }
            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;
            let layer = self.extract(child, ordinal)?;
            if self.layers.contains_key(&layer.id) {
                self.warnings
                    .push(format!("duplicate layer id {:?} at position {ordinal}; keeping the first", layer.id));
            } else {
                self.layers.insert(layer.id.clone(), layer);
            }
            self.visit(child, false)?;
        }
        Ok(())
    }

    fn extract(&self, group: roxmltree::Node, ordinal: usize) -> Result<Layer, ParseError> {
        let id = match group.attribute("id") {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("layer-{ordinal}"),
        };
        let label = group
            .attribute((INKSCAPE_NS, "label"))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        let visible = match group.attribute("data-viewbox") {
            None => Rect::canvas(),
            Some(raw) => Rect::parse_view_box(raw).ok_or_else(|| ParseError::InvalidAttribute {
                layer: id.clone(),
                attribute: "data-viewbox",
                value: raw.to_string(),
            })?,
        };

        let fade_zones = match group.attribute("data-fade-zones") {
            None => Vec::new(),
            Some(raw) => parse_fade_zones(raw).ok_or_else(|| ParseError::InvalidAttribute {
                layer: id.clone(),
                attribute: "data-fade-zones",
                value: raw.to_string(),
            })?,
        };

        let inline = group.attribute("style").map(str::to_string);
        let blend_mode = inline.as_deref().map(BlendMode::from_style).unwrap_or_default();
        let style = read_style(group, inline);

        Ok(Layer {
            id,
            label,
            visible,
            fade_zones,
            order: ordinal,
            blend_mode,
            style,
            fragment: self.fragment(group),
        })
    }

    fn fragment(&self, group: roxmltree::Node) -> String {
        group
            .children()
            .filter(|c| !(is_group(c) && is_layer_group(c)))
            .map(|c| &self.text[c.range()])
            .collect::<String>()
            .trim()
            .to_string()
    }
}

fn is_group(node: &roxmltree::Node) -> bool {
    node.is_element() && node.tag_name().name() == "g"
}

fn is_layer_group(node: &roxmltree::Node) -> bool {
    node.attribute((INKSCAPE_NS, "groupmode")) == Some("layer")
}

fn read_style(group: roxmltree::Node, inline: Option<String>) -> LayerStyle {
    let from = |name: &str| -> Option<String> {
        inline
            .as_deref()
            .and_then(|s| style_property(s, name))
            .map(str::to_string)
            .or_else(|| group.attribute(name).map(str::to_string))
    };
    LayerStyle {
        fill: from("fill"),
        stroke: from("stroke"),
        stroke_width: from("stroke-width").and_then(|v| v.trim_end_matches("px").parse().ok()),
        opacity: from("opacity")
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(1.0),
        transform: group.attribute("transform").map(str::to_string),
        classes: group
            .attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        inline,
    }
}

/// Value of one `name:value` declaration in an inline style string.
pub fn style_property<'s>(style: &'s str, name: &str) -> Option<&'s str> {
    style.split(';').find_map(|decl| {
        let (key, value) = decl.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// `x y w h start end direction` entries separated by `;`.
fn parse_fade_zones(raw: &str) -> Option<Vec<FadeZone>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split_whitespace().collect();
            let [x, y, w, h, start, end, direction] = parts.as_slice() else {
                return None;
            };
            let area = Rect::parse_view_box(&format!("{x} {y} {w} {h}"))?;
            let start_opacity: f64 = start.parse().ok()?;
            let end_opacity: f64 = end.parse().ok()?;
            if !(0.0..=1.0).contains(&start_opacity) || !(0.0..=1.0).contains(&end_opacity) {
                return None;
            }
            Some(FadeZone {
                area,
                start_opacity,
                end_opacity,
                direction: FadeDirection::parse(direction)?,
            })
        })
        .collect()
}

fn collect_defs(root: roxmltree::Node, text: &str) -> (BTreeMap<String, KeywordSymbol>, String) {
    let mut symbols = BTreeMap::new();
    for node in root.descendants().filter(|n| n.is_element() && n.tag_name().name() == "symbol") {
        let Some(symbol_id) = node.attribute("id") else { continue };
        if let Some(keyword) = symbol_id.strip_prefix(KEYWORD_SYMBOL_PREFIX) {
            if keyword.is_empty() {
                continue;
            }
            symbols.entry(keyword.to_lowercase()).or_insert_with(|| KeywordSymbol {
                symbol_id: symbol_id.to_string(),
                markup: text[node.range()].to_string(),
            });
        }
    }

    let defs = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "defs")
        .flat_map(|d| d.children())
        .filter(|c| {
            !(c.is_element()
                && c.tag_name().name() == "symbol"
                && c.attribute("id").is_some_and(|id| id.starts_with(KEYWORD_SYMBOL_PREFIX)))
        })
        .map(|c| &text[c.range()])
        .collect::<String>()
        .trim()
        .to_string();

    (symbols, defs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r##"<svg xmlns="http://www.w3.org/2000/svg"
        xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
        viewBox="0 0 1500 2100" data-template-version="1.2.0">
      <defs>
        <linearGradient id="gold"><stop offset="0" stop-color="#fc0"/></linearGradient>
        <symbol id="keyword-haste" viewBox="0 0 10 10"><path d="M0 0L10 10"/></symbol>
      </defs>
      <g id="frame-base" inkscape:label="Base" style="mix-blend-mode:multiply;opacity:0.5">
        <rect width="1500" height="2100" fill="url(#gold)"/>
        <g id="frame-border" inkscape:groupmode="layer" data-viewbox="10 10 1480 2080">
          <rect x="10" y="10" width="1480" height="2080"/>
        </g>
      </g>
      <g inkscape:label="boundary-name-text" data-viewbox="125 90 1250 80"
         data-fade-zones="0 0 100 100 1 0 left-to-right; 0 0 50 50 0.2 0.8 radial"/>
      <g id="frame-base"><circle r="1"/></g>
    </svg>"##;

    #[test]
    fn flattens_layers_in_document_order() {
        let doc = parse_source(DOC).unwrap();
        let ids: Vec<&str> = doc.layers_in_order().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["frame-base", "frame-border", "layer-2"]);
        assert_eq!(doc.template_version, Version::new(1, 2, 0));
        assert_eq!(doc.warnings.len(), 1);
    }

    #[test]
    fn reads_layer_attributes() {
        let doc = parse_source(DOC).unwrap();
        let base = &doc.layers["frame-base"];
        assert_eq!(base.label, "Base");
        assert_eq!(base.blend_mode, BlendMode::Multiply);
        assert_eq!(base.style.opacity, 0.5);
        assert_eq!(base.visible, Rect::canvas());
        assert!(base.fragment.starts_with("<rect"));
        assert!(!base.fragment.contains("frame-border"));

        let border = &doc.layers["frame-border"];
        assert_eq!(border.visible, Rect::new(10.0, 10.0, 1480.0, 2080.0));

        let name = &doc.layers["layer-2"];
        assert_eq!(name.label, "boundary-name-text");
        assert_eq!(name.fade_zones.len(), 2);
        assert_eq!(name.fade_zones[1].direction, FadeDirection::Radial);
    }

    #[test]
    fn collects_keyword_symbols_and_defs() {
        let doc = parse_source(DOC).unwrap();
        assert_eq!(doc.keyword_symbols["haste"].symbol_id, "keyword-haste");
        assert!(doc.defs.contains("linearGradient"));
        assert!(!doc.defs.contains("keyword-haste"));
        assert_eq!(doc.namespaces["inkscape"], INKSCAPE_NS);
    }

    #[test]
    fn unknown_blend_mode_is_normal() {
        assert_eq!(BlendMode::from_style("mix-blend-mode: Screen"), BlendMode::Screen);
        assert_eq!(BlendMode::from_style("mix-blend-mode:color-dodge"), BlendMode::Normal);
        assert_eq!(BlendMode::from_style("fill:red"), BlendMode::Normal);
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(parse_source("<svg><g>"), Err(ParseError::Xml(_))));
        assert!(matches!(parse_source("<html/>"), Err(ParseError::NotSvg(_))));
        assert!(matches!(parse_source("<svg/>"), Err(ParseError::NoLayers)));
        assert!(matches!(
            parse_source(r#"<svg><g data-viewbox="1 2 3"/></svg>"#),
            Err(ParseError::InvalidAttribute { attribute: "data-viewbox", .. })
        ));
        assert!(matches!(
            parse_source(r#"<svg data-template-version="one"><g/></svg>"#),
            Err(ParseError::InvalidVersion { .. })
        ));
    }
}
