//! Template System - Parsed Card Templates as Contracts
//!
//! A template is built once from its SVG source (parse, classify, check the
//! template-wide invariants) and is immutable afterwards. The process-wide
//! [`TemplateCache`] hands out `Arc<Template>` references keyed by path.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use semver::Version;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::card::CardType;
use crate::classify::{
    classify_boundaries, classify_objects, Boundary, BoundaryKind, FrameVariant, ObjectKind, TemplateObject,
};
use crate::geometry::Rect;
use crate::hashing::sha256_hex;
use crate::svg_source::{self, BlendMode, FadeZone, KeywordSymbol, ParseError, SourceDocument};
use crate::template_validation;
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static PARSE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_parse_call_count() -> u32 {
    PARSE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_parse_call_count() {
    PARSE_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template {path} could not be parsed: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("template {path} is invalid: {reason} (missing: [{}])", .missing.join(", "))]
    Invalid {
        path: String,
        missing: Vec<String>,
        reason: String,
    },
}

impl TemplateError {
    pub(crate) fn invalid(path: &str, missing: Vec<String>, reason: impl Into<String>) -> Self {
        TemplateError::Invalid {
            path: path.to_string(),
            missing,
            reason: reason.into(),
        }
    }
}

/// Opacity-based placement data for one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpacityMap {
    pub primary_zone: Rect,
    pub fade_zones: Vec<FadeZone>,
    pub fully_visible: Vec<Rect>,
    pub opacity: f64,
}

/// Per-layer opacity maps and blend modes, keyed by source layer id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Positioning {
    pub opacity_maps: BTreeMap<String, OpacityMap>,
    pub blend_modes: BTreeMap<String, BlendMode>,
}

impl Positioning {
    fn from_objects(objects: &BTreeMap<ObjectKind, TemplateObject>) -> Self {
        let mut positioning = Positioning::default();
        for object in objects.values() {
            let fully_visible = if object.fade_zones.is_empty() { vec![object.visible] } else { Vec::new() };
            positioning.opacity_maps.insert(
                object.source_id.clone(),
                OpacityMap {
                    primary_zone: object.visible,
                    fade_zones: object.fade_zones.clone(),
                    fully_visible,
                    opacity: object.style.opacity,
                },
            );
            positioning.blend_modes.insert(object.source_id.clone(), object.blend_mode);
        }
        positioning
    }
}

/// Variants this template can render, plus non-fatal findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateReport {
    pub supported_variants: Vec<CardType>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Template {
    /// Path (or label) the template was built from.
    pub source: String,
    pub objects: BTreeMap<ObjectKind, TemplateObject>,
    pub boundaries: BTreeMap<BoundaryKind, Boundary>,
    pub positioning: Positioning,
    /// Keyword name (lowercase) to symbol definition.
    pub keyword_symbols: BTreeMap<String, KeywordSymbol>,
    pub defs: String,
    pub namespaces: BTreeMap<String, String>,
    pub version: Version,
    pub engine_min_version: Option<Version>,
    pub source_hash: String,
    pub report: TemplateReport,
}

impl Template {
    /// Parse and build a template from SVG text.
    pub fn from_svg(source: &str, text: &str) -> Result<Self, TemplateError> {
        #[cfg(feature = "test-hooks")]
        PARSE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let doc = svg_source::parse_source(text).map_err(|e| TemplateError::Parse {
            path: source.to_string(),
            source: e,
        })?;
        Self::from_document(source, doc, sha256_hex(text.as_bytes()))
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let label = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| TemplateError::Parse {
            path: label.clone(),
            source: ParseError::Io {
                path: label.clone(),
                source: e,
            },
        })?;
        Self::from_svg(&label, &text)
    }

    fn from_document(source: &str, doc: SourceDocument, source_hash: String) -> Result<Self, TemplateError> {
        let objects = classify_objects(&doc);
        let boundaries = classify_boundaries(&doc);

        let mut warnings = doc.warnings;
        warnings.extend(objects.warnings);
        warnings.extend(boundaries.warnings);

        let mut template = Template {
            source: source.to_string(),
            positioning: Positioning::from_objects(&objects.entries),
            objects: objects.entries,
            boundaries: boundaries.entries,
            keyword_symbols: doc.keyword_symbols,
            defs: doc.defs,
            namespaces: doc.namespaces,
            version: doc.template_version,
            engine_min_version: doc.engine_min_version,
            source_hash,
            report: TemplateReport::default(),
        };

        template.check_engine_version()?;
        template.check_minimum_declarations()?;
        template_validation::check_dependencies(&template)?;
        template_validation::check_single_frame(&template)?;

        warnings.extend(template.style_warnings());
        template.report = TemplateReport {
            supported_variants: CardType::ALL
                .into_iter()
                .filter(|ct| template_validation::validate(&template, *ct).is_ok())
                .collect(),
            warnings,
        };

        for w in &template.report.warnings {
            warn!(template = %template.source, "{w}");
        }
        Ok(template)
    }

    fn check_engine_version(&self) -> Result<(), TemplateError> {
        let Some(min) = &self.engine_min_version else {
            return Ok(());
        };
        let engine = Version::parse(ENGINE_VERSION)
            .map_err(|_| TemplateError::invalid(&self.source, vec![], "invalid engine version"))?;
        if &engine < min {
            return Err(TemplateError::invalid(
                &self.source,
                vec![],
                format!("template {} requires engine >= {min}, current is {engine}", self.version),
            ));
        }
        Ok(())
    }

    fn check_minimum_declarations(&self) -> Result<(), TemplateError> {
        let mut missing = Vec::new();
        if !self.objects.contains_key(&ObjectKind::FrameBase) {
            missing.push(ObjectKind::FrameBase.to_string());
        }
        if !self.boundaries.contains_key(&BoundaryKind::NameText) {
            missing.push(BoundaryKind::NameText.to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TemplateError::invalid(&self.source, missing, "a template needs a base frame and a name boundary"))
        }
    }

    /// Non-fatal findings about text style objects and boundary font settings.
    fn style_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for kind in [ObjectKind::NameStyle, ObjectKind::EffectStyle] {
            if !self.objects.contains_key(&kind) {
                warnings.push(format!("recommended object {kind} is missing"));
            }
        }
        for (kind, boundary) in &self.boundaries {
            if let Some(style) = kind.style_object() {
                if !self.objects.contains_key(&style) {
                    warnings.push(format!("boundary {kind} has no matching {style} object"));
                }
            }
            let font = &boundary.font;
            if font.preferred_size < font.min_size || font.preferred_size > font.max_size {
                warnings.push(format!(
                    "boundary {kind}: preferred size {} outside [{}, {}]",
                    font.preferred_size, font.min_size, font.max_size
                ));
            }
            if boundary.preferred.is_empty() {
                warnings.push(format!("boundary {kind} has an empty preferred rectangle"));
            }
        }
        warnings
    }

    pub fn object(&self, kind: ObjectKind) -> Option<&TemplateObject> {
        self.objects.get(&kind)
    }

    pub fn boundary(&self, kind: BoundaryKind) -> Option<&Boundary> {
        self.boundaries.get(&kind)
    }

    /// The variant frame present in this template, if any.
    pub fn frame_variant(&self) -> Option<FrameVariant> {
        FrameVariant::ALL
            .into_iter()
            .find(|v| self.objects.contains_key(&ObjectKind::Frame(*v)))
    }

    /// Objects in stacking order.
    pub fn objects_in_order(&self) -> Vec<&TemplateObject> {
        let mut objects: Vec<&TemplateObject> = self.objects.values().collect();
        objects.sort_by_key(|o| o.order);
        objects
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            source: self.source.clone(),
            version: self.version.to_string(),
            engine_min_version: self.engine_min_version.as_ref().map(Version::to_string),
            source_hash: self.source_hash.clone(),
            objects: self
                .objects_in_order()
                .into_iter()
                .map(|o| ObjectSummary {
                    kind: o.kind.to_string(),
                    source_id: o.source_id.clone(),
                    order: o.order,
                    blend_mode: o.blend_mode,
                    dependencies: o.dependencies.iter().map(ToString::to_string).collect(),
                })
                .collect(),
            boundaries: self.boundaries.values().cloned().collect(),
            keyword_symbols: self.keyword_symbols.keys().cloned().collect(),
            positioning: self.positioning.clone(),
            report: self.report.clone(),
        }
    }
}

/// Serializable view of a template for inspection output.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub source: String,
    pub version: String,
    pub engine_min_version: Option<String>,
    pub source_hash: String,
    pub objects: Vec<ObjectSummary>,
    pub boundaries: Vec<Boundary>,
    pub keyword_symbols: Vec<String>,
    pub positioning: Positioning,
    pub report: TemplateReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectSummary {
    pub kind: String,
    pub source_id: String,
    pub order: usize,
    pub blend_mode: BlendMode,
    pub dependencies: Vec<String>,
}

/// File name of the template used for a card type. Incantations use the spell template.
pub fn template_file_for(card_type: CardType) -> &'static str {
    match FrameVariant::for_card(card_type) {
        FrameVariant::Creature => "creature.svg",
        FrameVariant::Anthem => "anthem.svg",
        FrameVariant::Artifact => "artifact.svg",
        FrameVariant::Spell => "spell.svg",
    }
}

/// Process-wide template cache - path to parsed template.
///
/// Entries are immutable once published. Loads happen outside the lock; when
/// two threads race on the same path the first insert wins.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<PathBuf, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<TemplateCache> {
        static GLOBAL: OnceLock<Arc<TemplateCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TemplateCache::new())))
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Template>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(path).cloned()
    }

    /// Cached template for `path`, parsing it on first use. Failures are not cached.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Template>, TemplateError> {
        if let Some(hit) = self.get(path) {
            return Ok(hit);
        }

        debug!(path = %path.display(), "template cache miss");
        let loaded = Arc::new(Template::load(path)?);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let published = entries.entry(path.to_path_buf()).or_insert(loaded).clone();
        Ok(published)
    }

    /// Re-parse `path` and replace the cached entry. Readers holding the old
    /// template keep it.
    pub fn rebuild(&self, path: &Path) -> Result<Arc<Template>, TemplateError> {
        let rebuilt = Arc::new(Template::load(path)?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(path.to_path_buf(), Arc::clone(&rebuilt));
        info!(path = %path.display(), version = %rebuilt.version, "template rebuilt");
        Ok(rebuilt)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"<svg xmlns="http://www.w3.org/2000/svg">
      <g id="frame-base"><rect width="1500" height="2100"/></g>
      <g id="boundary-name-text" data-viewbox="125 90 1250 80"/>
    </svg>"#;

    #[test]
    fn minimal_template_builds_with_warnings() {
        let t = Template::from_svg("minimal", MINIMAL).unwrap();
        assert_eq!(t.version, Version::new(1, 0, 0));
        assert!(t.report.supported_variants.is_empty());
        assert!(t.report.warnings.iter().any(|w| w.contains("name-style")));
        assert_eq!(t.positioning.blend_modes["frame-base"], BlendMode::Normal);
        assert_eq!(t.source_hash.len(), 64);
    }

    #[test]
    fn missing_name_boundary_is_invalid() {
        let err = Template::from_svg("t", r#"<svg><g id="frame-base"/></svg>"#).unwrap_err();
        match err {
            TemplateError::Invalid { missing, .. } => assert_eq!(missing, vec!["name-text"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn engine_min_version_is_enforced() {
        let text = MINIMAL.replace("<svg ", r#"<svg data-engine-min-version="99.0.0" "#);
        let err = Template::from_svg("future", &text).unwrap_err();
        assert!(err.to_string().contains("requires engine"));
    }

    #[test]
    fn template_files_by_variant() {
        assert_eq!(template_file_for(CardType::Incantation), "spell.svg");
        assert_eq!(template_file_for(CardType::Creature), "creature.svg");
    }

    #[test]
    fn cache_returns_same_instance_until_rebuild() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let cache = TemplateCache::new();
        let a = cache.get_or_load(file.path()).unwrap();
        let b = cache.get_or_load(file.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        let c = cache.rebuild(file.path()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(Arc::ptr_eq(&c, &cache.get_or_load(file.path()).unwrap()));
    }

    #[test]
    fn parse_failures_are_not_cached() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<svg><g>").unwrap();

        let cache = TemplateCache::new();
        assert!(matches!(cache.get_or_load(file.path()), Err(TemplateError::Parse { .. })));
        assert!(cache.is_empty());
    }
}
