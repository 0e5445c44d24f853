//! Composition Pipeline - Single Entry Point
//!
//! CRITICAL: every composition validates the record and checks the template
//! against the card variant first. There is no bypass.
//!
//! The composer is re-entrant: all per-card state lives on the stack of one
//! call, and templates are shared read-only through `Arc`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::art::{resolve_with_deadline, ArtError, ArtFailure, ArtReference, ArtSource};
use crate::card::{CardRecord, CardType, CardVariant};
use crate::classify::{Alignment, Boundary, BoundaryKind, FontConstraints, ObjectKind, TemplateObject};
use crate::error::{Classify, ErrorKind};
use crate::geometry::{Rect, CANVAS_HEIGHT, CANVAS_WIDTH};
use crate::hashing::derive_card_id;
use crate::layout::{LayoutSolver, Placement, TextRequest, SYMBOL_GLYPH};
use crate::metadata::{
    default_animation_targets, CardSidecar, InteractiveZone, ZoneAction, ZoneTrigger, FRAME_ID, INSPECT_ZONE_ID,
    STATS_GROUP_ID, STATS_ZONE_ID, TAP_ZONE_ID,
};
use crate::svg_source::{BlendMode, KeywordSymbol, SVG_NS};
use crate::svg_writer::{num, Attrs, SvgWriter};
use crate::template_validation;
use crate::templates::{template_file_for, Template, TemplateCache, TemplateError};
use crate::validation;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Type line region; templates do not declare one.
pub const TYPE_LINE_RECT: Rect = Rect::new(125.0, 1885.0, 1250.0, 70.0);
/// Art rectangle used when the art frame layer has no declared area.
pub const DEFAULT_ART_RECT: Rect = Rect::new(170.0, 240.0, 1160.0, 760.0);
/// Stats region used for the hidden stats group of non-creature cards.
pub const DEFAULT_STATS_RECT: Rect = Rect::new(100.0, 1800.0, 1300.0, 150.0);

pub const TYPE_LINE_ID: &str = "type-line";
pub const ART_GROUP_ID: &str = "art-frame";
pub const TEXT_GROUP_ID: &str = "text-elements";
pub const ZONES_GROUP_ID: &str = "interactive-zones";

const CARD_STYLE: &str = "
      .card-frame { transition: filter 0.3s ease; }
      .card-frame:hover { filter: drop-shadow(0 0 12px #00ff00); }
      .stats-group { transform-box: fill-box; transform-origin: center; }
      .interactive-zone { cursor: pointer; }
      .card-text { pointer-events: none; }
    ";

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Upper bound on one art lookup.
    pub art_deadline: Duration,
    /// Render a placeholder instead of failing when art is missing or late.
    pub placeholder_on_art_failure: bool,
    /// Text fill when the matching style object declares none.
    pub text_fill: String,
    /// Fixed sidecar timestamp; `None` stamps the current time.
    pub generated_at: Option<DateTime<Utc>>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            art_deadline: Duration::from_secs(5),
            placeholder_on_art_failure: false,
            text_fill: "#000000".to_string(),
            generated_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("card record failed validation: {0}")]
    Validation(#[from] validation::ValidationError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("art unavailable for {card_id}: {source}")]
    ArtUnavailable {
        card_id: String,
        #[source]
        source: ArtError,
    },

    #[error("art for {card_id} did not arrive within {deadline:?}")]
    ArtTimeout { card_id: String, deadline: Duration },

    #[error("composition cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for ComposeError {
    fn kind(&self) -> ErrorKind {
        match self {
            ComposeError::Validation(_) => ErrorKind::Validation,
            ComposeError::Template(e) => e.kind(),
            ComposeError::ArtUnavailable { .. } => ErrorKind::ArtUnavailable,
            ComposeError::ArtTimeout { .. } => ErrorKind::ArtTimeout,
            ComposeError::Cancelled { .. } => ErrorKind::Cancelled,
            ComposeError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

/// Output of one successful composition.
#[derive(Debug, Clone)]
pub struct ComposedCard {
    pub card_id: String,
    pub card_type: CardType,
    pub template_version: String,
    /// Complete standalone SVG document.
    pub document: String,
    pub sidecar: CardSidecar,
    /// Every solved text region, in document order.
    pub placements: Vec<Placement>,
}

impl ComposedCard {
    pub fn placement(&self, element_id: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.element_id == element_id)
    }

    /// True when any text region overflowed at its minimum size.
    pub fn has_overflow(&self) -> bool {
        self.placements.iter().any(|p| p.overflow)
    }
}

/// One entry of the keyword row.
#[derive(Debug, Clone, PartialEq)]
enum KeywordToken {
    Symbol { keyword: String, symbol_id: String },
    Word(String),
}

struct KeywordRow {
    placement: Placement,
    tokens: Vec<KeywordToken>,
}

struct TextLayout {
    name: Placement,
    cost: Option<Placement>,
    type_line: Placement,
    effect: Option<Placement>,
    keywords: Option<KeywordRow>,
    /// Attack and defense, creatures only.
    stats: Option<(Placement, Placement)>,
}

impl TextLayout {
    fn placements(&self) -> Vec<Placement> {
        let mut out = vec![self.name.clone()];
        out.extend(self.cost.clone());
        out.push(self.type_line.clone());
        out.extend(self.effect.clone());
        if let Some(row) = &self.keywords {
            out.push(row.placement.clone());
        }
        if let Some((attack, defense)) = &self.stats {
            out.push(attack.clone());
            out.push(defense.clone());
        }
        out
    }
}

/// Composes one card from a record, a template and an art source.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    solver: LayoutSolver,
    options: ComposeOptions,
}

impl Composer {
    pub fn new(solver: LayoutSolver, options: ComposeOptions) -> Self {
        Self { solver, options }
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    /// Compose a card.
    ///
    /// CRITICAL: this ALWAYS validates the record and checks the template
    /// against the record's variant before any layout happens.
    pub fn compose(
        &self,
        record: &CardRecord,
        template: &Template,
        art: &Arc<dyn ArtSource>,
        cancel: &CancellationToken,
    ) -> Result<ComposedCard, ComposeError> {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        validation::validate(record)?;
        checkpoint(cancel, "template validation")?;
        template_validation::validate(template, record.card_type())?;

        let card_id = match &record.id {
            Some(id) => id.clone(),
            None => derive_card_id(record)?,
        };

        let span = info_span!(
            "compose",
            card_id = %card_id,
            variant = %record.card_type(),
            template = %template.source
        );
        let _guard = span.enter();

        checkpoint(cancel, "art resolution")?;
        let mut game_state = BTreeMap::new();
        let art_ref = self.resolve_art(&card_id, art, &mut game_state)?;

        let text = self.layout_text(record, template);
        let placements = text.placements();

        checkpoint(cancel, "serialization")?;
        let zones = interactive_zones(template);
        let document = self.write_document(&card_id, record, template, &art_ref, &text, &zones);

        game_state.insert("card_type".into(), record.card_type().to_string());
        game_state.insert("cost".into(), record.cost_glyph());
        game_state.insert("tapped".into(), "false".into());
        game_state.insert("art".into(), art_ref.kind().to_string());
        if let CardVariant::Creature(c) = &record.variant {
            game_state.insert("attack".into(), c.attack.to_string());
            game_state.insert("defense".into(), c.defense.to_string());
        }
        let overflowed: Vec<&str> = placements
            .iter()
            .filter(|p| p.overflow)
            .map(|p| p.element_id.as_str())
            .collect();
        if !overflowed.is_empty() {
            warn!(elements = ?overflowed, "text overflows its boundary at minimum size");
            game_state.insert("overflow".into(), overflowed.join(","));
        }

        let sidecar = CardSidecar {
            card_id: card_id.clone(),
            interactive_zones: zones,
            animation_targets: default_animation_targets(),
            game_state,
            version: template.version.to_string(),
            generated_at: self.options.generated_at.unwrap_or_else(Utc::now),
        };

        info!(bytes = document.len(), art = art_ref.kind(), "card composed");

        Ok(ComposedCard {
            card_id,
            card_type: record.card_type(),
            template_version: template.version.to_string(),
            document,
            sidecar,
            placements,
        })
    }

    fn resolve_art(
        &self,
        card_id: &str,
        art: &Arc<dyn ArtSource>,
        game_state: &mut BTreeMap<String, String>,
    ) -> Result<ArtReference, ComposeError> {
        let err = match resolve_with_deadline(art, card_id, self.options.art_deadline) {
            Ok(art_ref) => return Ok(art_ref),
            Err(ArtFailure::Timeout(deadline)) => ComposeError::ArtTimeout {
                card_id: card_id.to_string(),
                deadline,
            },
            Err(ArtFailure::Unavailable(source)) => ComposeError::ArtUnavailable {
                card_id: card_id.to_string(),
                source,
            },
        };
        if !self.options.placeholder_on_art_failure {
            return Err(err);
        }
        warn!(error = %err, "using placeholder art");
        game_state.insert("art_error".into(), err.kind().to_string());
        Ok(ArtReference::Placeholder)
    }

    fn request(&self, template: &Template, kind: BoundaryKind, element_id: &str, text: &str) -> TextRequest {
        let style = kind.style_object().and_then(|k| template.object(k));
        let fill = style
            .and_then(|o| o.style.fill.clone())
            .filter(|f| f != "none")
            .unwrap_or_else(|| self.options.text_fill.clone());
        let mut classes = vec!["card-text".to_string(), format!("{}-text", kind_class(kind))];
        if let Some(o) = style {
            classes.extend(o.style.classes.iter().cloned());
        }
        TextRequest {
            element_id: element_id.to_string(),
            text: text.to_string(),
            single_line: kind.is_single_line(),
            fill,
            classes,
        }
    }

    fn layout_text(&self, record: &CardRecord, template: &Template) -> TextLayout {
        let solve = |kind: BoundaryKind, element_id: &str, text: &str| {
            template
                .boundary(kind)
                .map(|b| self.solver.solve(b, &self.request(template, kind, element_id, text)))
        };

        // The name boundary is guaranteed by the template contract.
        let name = solve(BoundaryKind::NameText, "card-name", &record.name).unwrap_or_else(|| {
            let b = Boundary::with_defaults(BoundaryKind::NameText, "card-name", Rect::canvas());
            self.solver
                .solve(&b, &self.request(template, BoundaryKind::NameText, "card-name", &record.name))
        });
        let cost = solve(BoundaryKind::CostSymbols, "mana-cost", &record.cost_glyph());
        let effect = solve(BoundaryKind::EffectText, "effect-text", &record.effect);

        let type_boundary = type_line_boundary();
        let mut type_request = self.request(template, BoundaryKind::NameText, TYPE_LINE_ID, &record.type_line());
        type_request.classes = vec!["card-text".into(), "type-line-text".into()];
        let type_line = self.solver.solve(&type_boundary, &type_request);

        let keywords = template
            .boundary(BoundaryKind::KeywordSymbols)
            .filter(|_| !record.keywords.is_empty())
            .map(|b| {
                let tokens = keyword_tokens(&record.keywords, template);
                let measured = tokens
                    .iter()
                    .map(|t| match t {
                        KeywordToken::Symbol { .. } => SYMBOL_GLYPH.to_string(),
                        KeywordToken::Word(w) => w.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let request = self.request(template, BoundaryKind::KeywordSymbols, "keyword-symbols", &measured);
                KeywordRow {
                    placement: self.solver.solve(b, &request),
                    tokens,
                }
            });

        let stats = match (&record.variant, template.boundary(BoundaryKind::StatsText)) {
            (CardVariant::Creature(c), Some(b)) => {
                let (left, right) = b.safe.split_halves();
                let attack = self.solver.solve(
                    &half_boundary(b, left),
                    &self.request(template, BoundaryKind::StatsText, "attack-text", &c.attack.to_string()),
                );
                let defense = self.solver.solve(
                    &half_boundary(b, right),
                    &self.request(template, BoundaryKind::StatsText, "defense-text", &c.defense.to_string()),
                );
                Some((attack, defense))
            }
            _ => None,
        };

        TextLayout {
            name,
            cost,
            type_line,
            effect,
            keywords,
            stats,
        }
    }

    fn write_document(
        &self,
        card_id: &str,
        record: &CardRecord,
        template: &Template,
        art: &ArtReference,
        text: &TextLayout,
        zones: &[InteractiveZone],
    ) -> String {
        let art_rect = art_rect(template);

        let mut root = Attrs::new().with("xmlns", SVG_NS).with("xmlns:xlink", XLINK_NS);
        for (prefix, uri) in &template.namespaces {
            if prefix != "xlink" && prefix != "xml" {
                root = root.with(&format!("xmlns:{prefix}"), uri.as_str());
            }
        }
        let root = root
            .num("width", CANVAS_WIDTH)
            .num("height", CANVAS_HEIGHT)
            .with("viewBox", format!("0 0 {} {}", num(CANVAS_WIDTH), num(CANVAS_HEIGHT)))
            .with("data-card-id", card_id)
            .with("data-card-type", record.card_type().as_str())
            .with("data-template-version", template.version.to_string());

        let mut w = SvgWriter::new();
        w.raw(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        w.open("svg", root);

        w.open("defs", Attrs::new());
        w.raw(&template.defs);
        if let Some(row) = &text.keywords {
            for symbol in used_symbols(&row.tokens, template) {
                w.raw(&symbol.markup);
            }
        }
        w.open("clipPath", Attrs::new().with("id", "art-clip"));
        w.empty("rect", rect_attrs(Attrs::new(), art_rect));
        w.close("clipPath");
        w.raw(&format!("<style type=\"text/css\"><![CDATA[{CARD_STYLE}]]></style>"));
        w.close("defs");

        w.open("g", Attrs::new().with("id", FRAME_ID).with("class", "card-frame"));
        for object in template.objects_in_order() {
            if object.kind != ObjectKind::ArtFrame {
                write_object(&mut w, object);
            }
        }
        w.close("g");

        w.open(
            "g",
            Attrs::new().with("id", ART_GROUP_ID).with("clip-path", "url(#art-clip)"),
        );
        if let Some(frame) = template.object(ObjectKind::ArtFrame) {
            write_object(&mut w, frame);
        }
        write_art(&mut w, art, art_rect);
        w.close("g");

        w.open("g", Attrs::new().with("id", TEXT_GROUP_ID));
        write_text(&mut w, &text.name);
        if let Some(cost) = &text.cost {
            write_text(&mut w, cost);
        }
        write_text(&mut w, &text.type_line);
        if let Some(effect) = &text.effect {
            write_text(&mut w, effect);
        }
        if let Some(row) = &text.keywords {
            self.write_keywords(&mut w, row, template);
        }
        write_stats(&mut w, text.stats.as_ref());
        w.close("g");

        w.open("g", Attrs::new().with("id", ZONES_GROUP_ID));
        for zone in zones {
            let mut attrs = Attrs::new()
                .with("id", zone.id.as_str())
                .with("class", "interactive-zone");
            attrs = rect_attrs(attrs, zone.bounds)
                .with("fill", "transparent")
                .with("data-action", zone.action.as_str())
                .with("data-trigger", zone.trigger.as_str());
            if zone.id == STATS_ZONE_ID && record.card_type() != CardType::Creature {
                attrs = attrs.with("data-enabled", "false").with("pointer-events", "none");
            }
            w.empty("rect", attrs);
        }
        w.close("g");

        w.close("svg");
        w.finish()
    }

    /// Keyword row: symbols advance one em, words by their measured width.
    fn write_keywords(&self, w: &mut SvgWriter, row: &KeywordRow, template: &Template) {
        let p = &row.placement;
        let metrics = self.solver.metrics();
        let space = metrics.measure(&p.font_family, p.font_size, " ").width;
        let ascent = metrics.ascent(&p.font_family, p.font_size);
        let mut x = p.bounds(ascent).x;

        let mut attrs = Attrs::new().with("id", p.element_id.as_str()).with("class", p.classes.join(" "));
        if p.overflow {
            attrs = attrs.with("data-overflow", "true");
        }
        w.open("g", attrs);
        for token in &row.tokens {
            match token {
                KeywordToken::Symbol { keyword, symbol_id } => {
                    let href = format!("#{symbol_id}");
                    w.empty(
                        "use",
                        Attrs::new()
                            .with("href", href.as_str())
                            .with("xlink:href", href.as_str())
                            .num("x", x)
                            .num("y", p.y - ascent)
                            .num("width", p.font_size)
                            .num("height", p.font_size)
                            .with("data-keyword", keyword.as_str()),
                    );
                    x += p.font_size + space;
                }
                KeywordToken::Word(word) => {
                    w.text(
                        "text",
                        Attrs::new()
                            .num("x", x)
                            .num("y", p.y)
                            .with("font-family", p.font_family.as_str())
                            .num("font-size", p.font_size)
                            .with("font-weight", p.font_weight.as_str())
                            .with("fill", p.fill.as_str())
                            .with("text-anchor", "start"),
                        word,
                    );
                    x += metrics.measure(&p.font_family, p.font_size, word).width + space;
                }
            }
        }
        w.close("g");
        debug!(symbols = template.keyword_symbols.len(), "keyword row written");
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &'static str) -> Result<(), ComposeError> {
    if cancel.is_cancelled() {
        debug!(stage, "composition cancelled");
        return Err(ComposeError::Cancelled { stage });
    }
    Ok(())
}

fn kind_class(kind: BoundaryKind) -> &'static str {
    match kind {
        BoundaryKind::NameText => "name",
        BoundaryKind::EffectText => "effect",
        BoundaryKind::CostSymbols => "cost",
        BoundaryKind::KeywordSymbols => "keyword",
        BoundaryKind::StatsText => "stats",
        BoundaryKind::SetIcon => "set-icon",
    }
}

/// Centred serif line under the art.
fn type_line_boundary() -> Boundary {
    let mut b = Boundary::with_defaults(BoundaryKind::NameText, TYPE_LINE_ID, TYPE_LINE_RECT);
    b.font = FontConstraints {
        min_size: 18.0,
        preferred_size: 32.0,
        max_size: 40.0,
        family: "serif".to_string(),
        weight: "normal".to_string(),
        allow_bold: false,
        allow_italic: true,
    };
    b.char_budget = 40;
    b.line_height = 1.0;
    b.alignment = Alignment::Center;
    b
}

fn half_boundary(parent: &Boundary, half: Rect) -> Boundary {
    let mut b = Boundary::with_defaults(parent.kind, parent.source_id.clone(), half);
    b.font = parent.font.clone();
    b.char_budget = parent.char_budget;
    b.line_height = parent.line_height;
    b.alignment = Alignment::Center;
    b
}

/// Keywords with a matching symbol render as the symbol, the rest as words.
fn keyword_tokens(keywords: &[String], template: &Template) -> Vec<KeywordToken> {
    keywords
        .iter()
        .map(|k| match template.keyword_symbols.get(&k.to_lowercase()) {
            Some(symbol) => KeywordToken::Symbol {
                keyword: k.clone(),
                symbol_id: symbol.symbol_id.clone(),
            },
            None => KeywordToken::Word(k.clone()),
        })
        .collect()
}

fn used_symbols<'t>(tokens: &[KeywordToken], template: &'t Template) -> Vec<&'t KeywordSymbol> {
    let mut seen: Vec<&'t KeywordSymbol> = Vec::new();
    for token in tokens {
        if let KeywordToken::Symbol { keyword, .. } = token {
            if let Some(symbol) = template.keyword_symbols.get(&keyword.to_lowercase()) {
                if !seen.iter().any(|s| s.symbol_id == symbol.symbol_id) {
                    seen.push(symbol);
                }
            }
        }
    }
    seen
}

fn art_rect(template: &Template) -> Rect {
    match template.object(ObjectKind::ArtFrame) {
        Some(frame) if frame.visible != Rect::canvas() && !frame.visible.is_empty() => frame.visible,
        _ => DEFAULT_ART_RECT,
    }
}

fn rect_attrs(attrs: Attrs, r: Rect) -> Attrs {
    attrs.num("x", r.x).num("y", r.y).num("width", r.width).num("height", r.height)
}

/// Tap and inspect cover the card, then one zone per boundary. The stats zone
/// is always present.
fn interactive_zones(template: &Template) -> Vec<InteractiveZone> {
    let mut zones = vec![
        InteractiveZone::new(TAP_ZONE_ID, Rect::canvas(), ZoneAction::Tap, ZoneTrigger::Click),
        InteractiveZone::new(INSPECT_ZONE_ID, Rect::canvas(), ZoneAction::Inspect, ZoneTrigger::Hover),
    ];
    for (kind, boundary) in &template.boundaries {
        zones.push(InteractiveZone::for_boundary(*kind, boundary.safe));
    }
    if !zones.iter().any(|z| z.id == STATS_ZONE_ID) {
        zones.push(InteractiveZone::for_boundary(BoundaryKind::StatsText, DEFAULT_STATS_RECT));
    }
    zones
}

fn write_object(w: &mut SvgWriter, object: &TemplateObject) {
    let style = &object.style;
    let mut attrs = Attrs::new()
        .with("id", format!("tpl-{}", object.source_id))
        .with("data-object", object.kind.as_str())
        .opt("style", style.inline.as_deref())
        .opt("transform", style.transform.as_deref());
    if !style.classes.is_empty() {
        attrs = attrs.with("class", style.classes.join(" "));
    }
    // Presentation attributes lose to the same property in `style`.
    attrs = attrs.opt("fill", style.fill.as_deref()).opt("stroke", style.stroke.as_deref());
    if let Some(width) = style.stroke_width {
        attrs = attrs.num("stroke-width", width);
    }
    if style.opacity < 1.0 {
        attrs = attrs.num("opacity", style.opacity);
    }
    if object.blend_mode != BlendMode::Normal {
        attrs = attrs.with("data-blend-mode", object.blend_mode.as_str());
    }
    w.open("g", attrs);
    w.raw(&object.fragment);
    w.close("g");
}

fn write_art(w: &mut SvgWriter, art: &ArtReference, r: Rect) {
    match art {
        ArtReference::Vector {
            view_box,
            namespaces,
            content,
        } => {
            let mut attrs = rect_attrs(Attrs::new().with("id", "card-art"), r)
                .opt("viewBox", view_box.as_deref())
                .with("preserveAspectRatio", "xMidYMid slice");
            for (prefix, uri) in namespaces {
                attrs = attrs.with(&format!("xmlns:{prefix}"), uri.as_str());
            }
            w.open("svg", attrs);
            w.raw(content);
            w.close("svg");
        }
        ArtReference::Image { href } => {
            let attrs = rect_attrs(Attrs::new().with("id", "card-art"), r)
                .with("href", href.as_str())
                .with("preserveAspectRatio", "xMidYMid slice");
            w.empty("image", attrs);
        }
        ArtReference::Placeholder => {
            let attrs = rect_attrs(Attrs::new().with("id", "card-art"), r)
                .with("fill", "#3a3a3a")
                .with("stroke", "#6a6a6a")
                .with("data-placeholder", "true");
            w.empty("rect", attrs);
        }
    }
}

fn text_attrs(p: &Placement) -> Attrs {
    let mut attrs = Attrs::new()
        .with("id", p.element_id.as_str())
        .num("x", p.x)
        .num("y", p.y)
        .with("font-family", p.font_family.as_str())
        .num("font-size", p.font_size)
        .with("font-weight", p.font_weight.as_str())
        .with("fill", p.fill.as_str())
        .with("text-anchor", p.anchor.anchor());
    if !p.classes.is_empty() {
        attrs = attrs.with("class", p.classes.join(" "));
    }
    if p.overflow {
        attrs = attrs.with("data-overflow", "true");
    }
    attrs
}

fn write_text(w: &mut SvgWriter, p: &Placement) {
    if p.lines.len() > 1 {
        w.text_lines("text", text_attrs(p), p.x, p.line_advance, &p.lines);
    } else {
        let line = p.lines.first().map(String::as_str).unwrap_or("");
        w.text("text", text_attrs(p), line);
    }
}

/// The stats group is always present so runtimes can address it; it is
/// hidden with empty text for non-creatures.
fn write_stats(w: &mut SvgWriter, stats: Option<&(Placement, Placement)>) {
    match stats {
        Some((attack, defense)) => {
            w.open("g", Attrs::new().with("id", STATS_GROUP_ID).with("class", "stats-group"));
            let mut ring = String::new();
            for (id, p) in [("attack-bg", attack), ("defense-bg", defense)] {
                let r = p.font_size * 0.9;
                let cy = p.y - p.font_size * 0.35;
                ring.push_str(&format!(
                    "<circle id=\"{id}\" cx=\"{}\" cy=\"{}\" r=\"{}\" fill=\"none\" stroke=\"currentColor\"/>",
                    num(p.x),
                    num(cy),
                    num(r)
                ));
            }
            w.raw(&ring);
            write_text(w, attack);
            write_text(w, defense);
            w.close("g");
        }
        None => {
            w.open(
                "g",
                Attrs::new()
                    .with("id", STATS_GROUP_ID)
                    .with("class", "stats-group")
                    .with("visibility", "hidden"),
            );
            let (left, right) = DEFAULT_STATS_RECT.split_halves();
            for (id, half) in [("attack-text", left), ("defense-text", right)] {
                w.text(
                    "text",
                    Attrs::new()
                        .with("id", id)
                        .num("x", half.center_x())
                        .num("y", half.y + half.height / 2.0)
                        .with("text-anchor", "middle"),
                    "",
                );
            }
            w.close("g");
        }
    }
}

/// Template lookup plus composition for one templates directory.
pub struct CompositionPipeline {
    templates_dir: PathBuf,
    cache: Arc<TemplateCache>,
    composer: Composer,
    art: Arc<dyn ArtSource>,
}

impl CompositionPipeline {
    /// Pipeline over the process-wide template cache with default options.
    pub fn new(templates_dir: impl Into<PathBuf>, art: Arc<dyn ArtSource>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            cache: TemplateCache::global(),
            composer: Composer::default(),
            art,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_composer(mut self, composer: Composer) -> Self {
        self.composer = composer;
        self
    }

    pub fn templates_dir(&self) -> &std::path::Path {
        &self.templates_dir
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// The cached template that renders `card_type`.
    pub fn template_for(&self, card_type: CardType) -> Result<Arc<Template>, TemplateError> {
        self.cache
            .get_or_load(&self.templates_dir.join(template_file_for(card_type)))
    }

    pub fn compose_card(&self, record: &CardRecord, cancel: &CancellationToken) -> Result<ComposedCard, ComposeError> {
        checkpoint(cancel, "template parse")?;
        let template = self.template_for(record.card_type())?;
        self.composer.compose(record, &template, &self.art, cancel)
    }
}

impl std::fmt::Debug for CompositionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionPipeline")
            .field("templates_dir", &self.templates_dir)
            .field("cached_templates", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::{FileArtSource, MemoryArtSource, PlaceholderArtSource};
    use crate::card::{Creature, Spell, Trait};

    const CREATURE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" data-template-version="1.2.0">
      <defs><symbol id="keyword-haste" viewBox="0 0 10 10"><path d="M0 0L10 5L0 10z"/></symbol></defs>
      <g id="frame-base"><rect width="1500" height="2100" fill="#222"/></g>
      <g id="frame-creature" style="mix-blend-mode:multiply"><rect width="1500" height="2100"/></g>
      <g id="text-style-name" fill="#ffeecc"/>
      <g id="text-style-effect"/>
      <g id="text-style-stats"/>
      <g id="art-frame" data-viewbox="170 240 1160 760"/>
      <g id="boundary-name-text" data-viewbox="125 90 1250 80"/>
      <g id="boundary-effect-text" data-viewbox="160 1250 1180 500"/>
      <g id="boundary-cost-symbols" data-viewbox="1320 90 100 100"/>
      <g id="boundary-keyword-symbols" data-viewbox="160 1150 1180 80"/>
      <g id="boundary-stats-text" data-viewbox="100 1800 1300 150"/>
    </svg>"##;

    fn bear() -> CardRecord {
        CardRecord::new(
            "Mountain Bear",
            3,
            "A sturdy beast.",
            CardVariant::Creature(Creature {
                attack: 3,
                defense: 3,
                trait_: Some(Trait::Beast),
            }),
        )
        .with_id("bear-1")
        .with_keywords(["HASTE", "FLYING"])
    }

    fn placeholder() -> Arc<dyn ArtSource> {
        Arc::new(PlaceholderArtSource)
    }

    #[test]
    fn composes_creature_document_and_sidecar() {
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();
        let card = Composer::default()
            .compose(&bear(), &template, &placeholder(), &CancellationToken::new())
            .unwrap();

        assert_eq!(card.card_id, "bear-1");
        assert_eq!(card.template_version, "1.2.0");
        assert!(card.document.contains(r#"<text id="card-name""#));
        assert!(card.document.contains(">Mountain Bear</text>"));
        assert!(card.document.contains(">Creature - Beast</text>"));
        assert!(card.document.contains(r##"fill="#ffeecc""##));
        assert!(card.document.contains(r##"<use href="#keyword-haste""##));
        assert!(card.document.contains(r#"<symbol id="keyword-haste""#));
        assert!(card.document.contains(">FLYING</text>"));
        assert!(card.document.contains(r#"data-blend-mode="multiply""#));
        assert!(card.document.contains(r#"<circle id="attack-bg""#));
        assert!(card.document.contains(r#"<circle id="defense-bg""#));

        let name = card.placement("card-name").unwrap();
        assert_eq!(name.lines, vec!["Mountain Bear"]);
        assert!(card.placement("attack-text").is_some());
        assert!(!card.has_overflow());

        assert_eq!(card.sidecar.version, "1.2.0");
        assert_eq!(card.sidecar.game_state["attack"], "3");
        assert_eq!(card.sidecar.game_state["art"], "placeholder");
        assert!(card.sidecar.zone(STATS_ZONE_ID).is_some());
        assert!(card.sidecar.zone(TAP_ZONE_ID).is_some());

        let doc = roxmltree::Document::parse(&card.document).unwrap();
        let ids: Vec<&str> = doc.descendants().filter_map(|n| n.attribute("id")).collect();
        for zone in &card.sidecar.interactive_zones {
            assert!(ids.contains(&zone.id.as_str()), "zone {} not in document", zone.id);
        }
        for target in &card.sidecar.animation_targets {
            assert!(ids.contains(&target.element_id.as_str()));
        }
    }

    #[test]
    fn wrong_variant_template_is_rejected() {
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();
        let spell = CardRecord::new("Zap", 1, "Deal 1 damage.", CardVariant::Spell(Spell { target_type: None }));
        let err = Composer::default()
            .compose(&spell, &template, &placeholder(), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateInvalid);
    }

    #[test]
    fn missing_art_fails_unless_placeholder_allowed() {
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();
        let art: Arc<dyn ArtSource> = Arc::new(MemoryArtSource::new());

        let err = Composer::default()
            .compose(&bear(), &template, &art, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArtUnavailable);

        let lenient = Composer::new(
            LayoutSolver::default(),
            ComposeOptions {
                placeholder_on_art_failure: true,
                ..ComposeOptions::default()
            },
        );
        let card = lenient.compose(&bear(), &template, &art, &CancellationToken::new()).unwrap();
        assert_eq!(card.sidecar.game_state["art"], "placeholder");
        assert_eq!(card.sidecar.game_state["art_error"], "art-unavailable");
    }

    #[test]
    fn inkscape_art_yields_well_formed_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bear-1.svg"),
            r#"<svg xmlns="http://www.w3.org/2000/svg"
                xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd"
                xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape" viewBox="0 0 40 30">
              <sodipodi:namedview id="namedview1" inkscape:zoom="2"/>
              <g inkscape:label="Fur" inkscape:groupmode="layer"><rect width="40" height="30"/></g>
            </svg>"#,
        )
        .unwrap();
        let art: Arc<dyn ArtSource> = Arc::new(FileArtSource::new(dir.path()));
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();

        let card = Composer::default()
            .compose(&bear(), &template, &art, &CancellationToken::new())
            .unwrap();
        assert_eq!(card.sidecar.game_state["art"], "vector");

        let doc = roxmltree::Document::parse(&card.document).unwrap();
        let art_root = doc
            .descendants()
            .find(|n| n.attribute("id") == Some("card-art"))
            .unwrap();
        assert_eq!(art_root.tag_name().name(), "svg");
        assert!(art_root
            .descendants()
            .any(|n| n.tag_name().name() == "namedview"
                && n.tag_name().namespace() == Some("http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd")));
    }

    #[test]
    fn cancelled_token_stops_before_work() {
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Composer::default()
            .compose(&bear(), &template, &placeholder(), &cancel)
            .unwrap_err();
        assert!(matches!(err, ComposeError::Cancelled { .. }));
    }

    #[test]
    fn derived_id_when_record_has_none() {
        let template = Template::from_svg("creature.svg", CREATURE_SVG).unwrap();
        let mut record = bear();
        record.id = None;
        let card = Composer::default()
            .compose(&record, &template, &placeholder(), &CancellationToken::new())
            .unwrap();
        assert_eq!(card.card_id, derive_card_id(&record).unwrap());
    }
}
