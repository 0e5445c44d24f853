//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees against the shipped templates.

use std::path::PathBuf;
use std::sync::Arc;

use assert_matches::assert_matches;
use tokio_util::sync::CancellationToken;

use cardforge_core::card::{Anthem, Artifact, Creature, Spell, TargetKind, Trait};
use cardforge_core::classify::BoundaryKind;
use cardforge_core::hashing::canonical_json;
use cardforge_core::templates::TemplateError;
use cardforge_core::{
    validate, ArtSource, CardRecord, CardType, CardVariant, CardWire, Classify, ComposeError, ComposedCard,
    Composer, CompositionPipeline, ErrorKind, PlaceholderArtSource, Template, TemplateCache, ValidationKind,
};

const STABLE_IDS: [&str; 14] = [
    "card-frame",
    "art-frame",
    "text-elements",
    "card-name",
    "mana-cost",
    "type-line",
    "effect-text",
    "stats-group",
    "attack-text",
    "defense-text",
    "interactive-zones",
    "tap-zone",
    "inspect-zone",
    "stats-zone",
];

fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

fn shipped_template(file: &str) -> String {
    std::fs::read_to_string(templates_dir().join(file)).unwrap()
}

fn placeholder() -> Arc<dyn ArtSource> {
    Arc::new(PlaceholderArtSource)
}

fn create_pipeline() -> CompositionPipeline {
    CompositionPipeline::new(templates_dir(), placeholder()).with_cache(Arc::new(TemplateCache::new()))
}

fn compose(record: &CardRecord) -> ComposedCard {
    create_pipeline()
        .compose_card(record, &CancellationToken::new())
        .unwrap()
}

fn from_json(json: serde_json::Value) -> Result<CardRecord, cardforge_core::ValidationError> {
    let wire: CardWire = serde_json::from_value(json).unwrap();
    CardRecord::from_wire_strict(wire)
}

/// Concatenated text content of the element with `id`.
fn text_of(document: &str, id: &str) -> String {
    let doc = roxmltree::Document::parse(document).unwrap();
    let node = doc
        .descendants()
        .find(|n| n.attribute("id") == Some(id))
        .unwrap_or_else(|| panic!("no element {id}"));
    node.descendants().filter_map(|n| n.text()).collect()
}

fn element_ids(document: &str) -> Vec<String> {
    let doc = roxmltree::Document::parse(document).unwrap();
    doc.descendants()
        .filter_map(|n| n.attribute("id").map(str::to_string))
        .collect()
}

fn mountain_bear() -> CardRecord {
    from_json(serde_json::json!({
        "type": "Creature",
        "name": "Mountain Bear",
        "cost": 3,
        "effect": "When this attacks, it gets +2/+0 until end of turn.",
        "attack": 3,
        "defense": 3,
        "trait": "Beast"
    }))
    .unwrap()
}

fn sample_records() -> Vec<CardRecord> {
    vec![
        mountain_bear(),
        CardRecord::new(
            "Iron Blade",
            2,
            "Equip: target creature gets +2/+0.",
            CardVariant::Artifact(Artifact { is_equipment: true }),
        ),
        CardRecord::new(
            "Fireball",
            -1,
            "Deal X damage to target creature.",
            CardVariant::Spell(Spell {
                target_type: Some(TargetKind::Creature),
            }),
        ),
        CardRecord::new(
            "Glorious Anthem",
            3,
            "All creatures you control get +1/+1.",
            CardVariant::Anthem(Anthem { continuous: true }),
        ),
    ]
}

#[test]
fn scenario_basic_creature_within_budgets() {
    let record = mountain_bear();
    let card = compose(&record);

    assert_eq!(text_of(&card.document, "card-name"), "Mountain Bear");
    assert_eq!(text_of(&card.document, "mana-cost"), "3");
    assert_eq!(text_of(&card.document, "type-line"), "Creature - Beast");
    assert_eq!(text_of(&card.document, "attack-text"), "3");
    assert_eq!(text_of(&card.document, "defense-text"), "3");
    assert!(card.sidecar.zone("tap-zone").is_some());
    assert!(card.sidecar.zone("inspect-zone").is_some());
    assert!(!card.has_overflow());
}

#[test]
fn scenario_variable_cost_spell() {
    let record = from_json(serde_json::json!({
        "type": "Spell",
        "name": "Fireball",
        "cost": -1,
        "effect": "Deal X damage to target creature.",
        "target_type": "Creature"
    }))
    .unwrap();
    assert_matches!(
        &record.variant,
        CardVariant::Spell(Spell { target_type: Some(TargetKind::Creature) })
    );

    let card = compose(&record);
    assert_eq!(text_of(&card.document, "mana-cost"), "X");
    assert_eq!(text_of(&card.document, "type-line"), "Spell");
    assert_eq!(card.sidecar.game_state["cost"], "X");
}

#[test]
fn scenario_anthem_must_be_continuous() {
    let err = from_json(serde_json::json!({
        "type": "Anthem",
        "name": "Glorious Anthem",
        "cost": 3,
        "effect": "All creatures you control get +1/+1.",
        "continuous": false
    }))
    .unwrap_err();
    assert_eq!(err.field, "continuous");
    assert_eq!(err.kind, ValidationKind::Invalid);
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn scenario_equipment_needs_equip_word() {
    let err = from_json(serde_json::json!({
        "type": "Artifact",
        "name": "Sword of X",
        "cost": 3,
        "effect": "When this enters play, draw a card.",
        "is_equipment": true
    }))
    .unwrap_err();
    assert_eq!(err.field, "effect");
    assert_eq!(err.kind, ValidationKind::Invalid);
}

#[test]
fn scenario_overflowing_effect_renders_at_min_size() {
    let text = shipped_template("creature.svg").replace(
        r#"data-viewbox="160 1250 1180 500""#,
        r#"data-viewbox="160 1250 400 60""#,
    );
    let template = Template::from_svg("narrow-creature.svg", &text).unwrap();
    let min_size = template.boundary(BoundaryKind::EffectText).unwrap().font.min_size;

    let effect = "Whenever another creature enters the battlefield, gain one life. ".repeat(8);
    let effect = effect.trim_end().chars().take(500).collect::<String>();
    assert_eq!(effect.chars().count(), 500);
    let record = CardRecord::new(
        "Verbose Sage",
        4,
        effect,
        CardVariant::Creature(Creature {
            attack: 2,
            defense: 5,
            trait_: None,
        }),
    );

    let card = Composer::default()
        .compose(&record, &template, &placeholder(), &CancellationToken::new())
        .unwrap();
    let placement = card.placement("effect-text").unwrap();
    assert!(placement.overflow);
    assert_eq!(placement.font_size, min_size);
    assert!(card.has_overflow());
    assert_eq!(card.sidecar.game_state["overflow"], "effect-text");
    assert!(card.document.contains(r#"data-overflow="true""#));
}

#[test]
fn scenario_missing_stats_boundary_is_template_invalid() {
    let text: String = shipped_template("creature.svg")
        .lines()
        .filter(|l| !l.contains("boundary-stats-text"))
        .collect::<Vec<_>>()
        .join("\n");
    let template = Template::from_svg("statless-creature.svg", &text).unwrap();

    let err = Composer::default()
        .compose(&mountain_bear(), &template, &placeholder(), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateInvalid);
    assert_matches!(
        err,
        ComposeError::Template(TemplateError::Invalid { missing, .. }) if missing == vec!["stats-text".to_string()]
    );
}

#[test]
fn invariant_round_trip_keeps_records_valid() {
    for record in sample_records() {
        validate(&record).unwrap();
        let json = serde_json::to_string(&record.to_wire()).unwrap();
        let back = CardRecord::from_wire(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(back, record);
        validate(&back).unwrap();
    }
}

#[test]
fn invariant_round_trip_preserves_unknown_fields_but_strict_rejects_them() {
    let json = serde_json::json!({
        "type": "Spell",
        "name": "Zap",
        "cost": 1,
        "effect": "Deal 1 damage to any target.",
        "rarity": "common"
    });
    let wire: CardWire = serde_json::from_value(json.clone()).unwrap();
    let lenient = CardRecord::from_wire(wire.clone()).unwrap();
    assert_eq!(lenient.to_wire().extra["rarity"], "common");

    let err = CardRecord::from_wire_strict(wire).unwrap_err();
    assert_eq!(err.field, "rarity");
}

#[test]
fn invariant_every_variant_renders_stable_ids() {
    let pipeline = create_pipeline();
    let mut records = sample_records();
    records.push(CardRecord::new(
        "Sudden Strike",
        1,
        "ON ATTACK: deal 1 damage.",
        CardVariant::Incantation(cardforge_core::card::Incantation { timing: None }),
    ));

    for record in &records {
        let card = pipeline.compose_card(record, &CancellationToken::new()).unwrap();
        let ids = element_ids(&card.document);
        for id in STABLE_IDS {
            assert!(ids.iter().any(|i| i == id), "{} is missing {id}", record.name);
        }
        for zone in &card.sidecar.interactive_zones {
            assert!(ids.contains(&zone.id), "zone {} not rendered", zone.id);
        }
    }
    assert_eq!(pipeline.cache().len(), 4);
}

#[test]
fn invariant_fitted_text_stays_inside_safe_rect() {
    let template = Template::from_svg("creature.svg", &shipped_template("creature.svg")).unwrap();
    let card = Composer::default()
        .compose(&mountain_bear(), &template, &placeholder(), &CancellationToken::new())
        .unwrap();

    for (id, kind) in [("card-name", BoundaryKind::NameText), ("effect-text", BoundaryKind::EffectText)] {
        let placement = card.placement(id).unwrap();
        let boundary = template.boundary(kind).unwrap();
        assert!(!placement.overflow);
        let ascent = placement.font_size * 0.8;
        assert!(boundary.safe.contains(&placement.bounds(ascent)), "{id} escapes {kind}");
    }
}

#[test]
fn invariant_preferred_inside_safe_for_shipped_templates() {
    for file in ["creature.svg", "anthem.svg", "artifact.svg", "spell.svg"] {
        let template = Template::from_svg(file, &shipped_template(file)).unwrap();
        assert!(!template.boundaries.is_empty());
        for boundary in template.boundaries.values() {
            assert!(boundary.safe.contains(&boundary.preferred), "{file}: {}", boundary.kind);
        }
    }
}

#[test]
fn invariant_shipped_templates_support_their_variants() {
    let expect = [
        ("creature.svg", vec![CardType::Creature]),
        ("anthem.svg", vec![CardType::Anthem]),
        ("artifact.svg", vec![CardType::Artifact]),
        ("spell.svg", vec![CardType::Spell, CardType::Incantation]),
    ];
    for (file, variants) in expect {
        let template = Template::from_svg(file, &shipped_template(file)).unwrap();
        assert_eq!(template.report.supported_variants, variants, "{file}");
        assert!(template.keyword_symbols.contains_key("haste"));
    }
}

#[test]
fn invariant_type_line_and_cost_glyph() {
    let mut bear = mountain_bear();
    assert_eq!(bear.type_line(), "Creature - Beast");
    if let CardVariant::Creature(c) = &mut bear.variant {
        c.trait_ = None;
    }
    assert_eq!(bear.type_line(), "Creature");

    let spell = &sample_records()[2];
    assert_eq!(spell.type_line(), "Spell");
    assert_eq!(spell.cost_glyph(), "X");
    assert_eq!(sample_records()[0].cost_glyph(), "3");

    let dragon = CardRecord::new(
        "Elder",
        12,
        "Flying.",
        CardVariant::Creature(Creature {
            attack: 9,
            defense: 9,
            trait_: Some(Trait::Dragon),
        }),
    );
    assert_eq!(dragon.cost_glyph(), "12");
    assert_eq!(dragon.type_line(), "Creature - Dragon");
}

#[test]
fn invariant_equipment_word_boundary() {
    let artifact = |effect: &str| {
        CardRecord::new("Gear", 1, effect, CardVariant::Artifact(Artifact { is_equipment: true }))
    };
    assert!(validate(&artifact("Equip 2. Equipped creature gets +1/+1.")).is_ok());
    assert!(validate(&artifact("Attach to a creature; equip: 1")).is_ok());
    assert!(validate(&artifact("Equipment only. Equipped creatures fly.")).is_err());
    assert!(validate(&artifact("Requip the thing.")).is_err());
}

#[test]
fn invariant_compose_calls_validate() {
    let mut bear = mountain_bear();
    bear.name = "   ".into();
    let err = create_pipeline()
        .compose_card(&bear, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn invariant_composition_is_deterministic() {
    let options = cardforge_core::ComposeOptions {
        generated_at: Some(chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().into()),
        ..Default::default()
    };
    let pipeline = create_pipeline().with_composer(Composer::new(Default::default(), options));
    let record = mountain_bear();
    let a = pipeline.compose_card(&record, &CancellationToken::new()).unwrap();
    let b = pipeline.compose_card(&record, &CancellationToken::new()).unwrap();

    assert_eq!(a.card_id, b.card_id);
    assert_eq!(a.document, b.document);
    assert_eq!(
        canonical_json(&a.sidecar).unwrap(),
        canonical_json(&b.sidecar).unwrap()
    );
}

#[test]
fn invariant_cancelled_composition_returns_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = create_pipeline();
    let err = pipeline.compose_card(&mountain_bear(), &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(pipeline.cache().is_empty());
}

#[test]
fn invariant_canonical_json_deterministic() {
    use serde_json::json;

    let obj1 = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
    let obj2 = json!({"a": 2, "m": {"a": 2, "b": 1}, "z": 1});

    assert_eq!(canonical_json(&obj1).unwrap(), canonical_json(&obj2).unwrap());
}
