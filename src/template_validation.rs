//! Template Validator - per-variant requirement tables
//!
//! A template is checked against the card variant it is about to render.
//! All checks are pure over the parsed template.

use crate::card::CardType;
use crate::classify::{BoundaryKind, FrameVariant, ObjectKind};
use crate::templates::{Template, TemplateError};

/// Required objects and boundaries for one frame variant.
pub struct Requirements {
    pub objects: &'static [ObjectKind],
    pub boundaries: &'static [BoundaryKind],
}

static CREATURE: Requirements = Requirements {
    objects: &[
        ObjectKind::FrameBase,
        ObjectKind::Frame(FrameVariant::Creature),
        ObjectKind::NameStyle,
        ObjectKind::EffectStyle,
        ObjectKind::ArtFrame,
        ObjectKind::StatsStyle,
    ],
    boundaries: &[
        BoundaryKind::NameText,
        BoundaryKind::EffectText,
        BoundaryKind::CostSymbols,
        BoundaryKind::StatsText,
    ],
};

static ANTHEM: Requirements = Requirements {
    objects: &[
        ObjectKind::FrameBase,
        ObjectKind::Frame(FrameVariant::Anthem),
        ObjectKind::NameStyle,
        ObjectKind::EffectStyle,
        ObjectKind::ArtFrame,
        ObjectKind::AnthemGlow,
    ],
    boundaries: &[BoundaryKind::NameText, BoundaryKind::EffectText, BoundaryKind::CostSymbols],
};

static ARTIFACT: Requirements = Requirements {
    objects: &[
        ObjectKind::FrameBase,
        ObjectKind::Frame(FrameVariant::Artifact),
        ObjectKind::NameStyle,
        ObjectKind::EffectStyle,
        ObjectKind::ArtFrame,
    ],
    boundaries: &[BoundaryKind::NameText, BoundaryKind::EffectText, BoundaryKind::CostSymbols],
};

static SPELL: Requirements = Requirements {
    objects: &[
        ObjectKind::FrameBase,
        ObjectKind::Frame(FrameVariant::Spell),
        ObjectKind::NameStyle,
        ObjectKind::EffectStyle,
        ObjectKind::ArtFrame,
    ],
    boundaries: &[BoundaryKind::NameText, BoundaryKind::EffectText, BoundaryKind::CostSymbols],
};

pub fn requirements_for(card_type: CardType) -> &'static Requirements {
    match FrameVariant::for_card(card_type) {
        FrameVariant::Creature => &CREATURE,
        FrameVariant::Anthem => &ANTHEM,
        FrameVariant::Artifact => &ARTIFACT,
        FrameVariant::Spell => &SPELL,
    }
}

/// Confirm `template` can render cards of `card_type`.
pub fn validate(template: &Template, card_type: CardType) -> Result<(), TemplateError> {
    let req = requirements_for(card_type);

    let missing: Vec<String> = req
        .objects
        .iter()
        .filter(|k| !template.objects.contains_key(*k))
        .map(ToString::to_string)
        .chain(
            req.boundaries
                .iter()
                .filter(|k| !template.boundaries.contains_key(*k))
                .map(ToString::to_string),
        )
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::invalid(
            &template.source,
            missing,
            format!("template cannot render {card_type} cards"),
        ));
    }

    check_single_frame(template)?;
    check_dependencies(template)?;

    let empty: Vec<String> = req
        .boundaries
        .iter()
        .filter(|k| template.boundaries.get(*k).map_or(false, |b| b.safe.is_empty()))
        .map(ToString::to_string)
        .collect();
    if !empty.is_empty() {
        return Err(TemplateError::invalid(
            &template.source,
            empty,
            "required boundary has an empty safe rectangle",
        ));
    }

    check_preferred_inside_safe(template)
}

/// At most one variant-specific frame.
pub fn check_single_frame(template: &Template) -> Result<(), TemplateError> {
    let frames: Vec<String> = FrameVariant::ALL
        .into_iter()
        .map(ObjectKind::Frame)
        .filter(|k| template.objects.contains_key(k))
        .map(|k| k.to_string())
        .collect();
    if frames.len() > 1 {
        return Err(TemplateError::invalid(
            &template.source,
            vec![],
            format!("only one variant frame allowed, found {}", frames.join(", ")),
        ));
    }
    Ok(())
}

/// Every object's parents are present. The missing list names the absent parents.
pub fn check_dependencies(template: &Template) -> Result<(), TemplateError> {
    let mut missing: Vec<String> = Vec::new();
    let mut dependents: Vec<String> = Vec::new();
    for object in template.objects.values() {
        for parent in &object.dependencies {
            if !template.objects.contains_key(parent) {
                let name = parent.to_string();
                if !missing.contains(&name) {
                    missing.push(name);
                }
                dependents.push(object.kind.to_string());
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::invalid(
            &template.source,
            missing,
            format!("unsatisfied dependencies of {}", dependents.join(", ")),
        ))
    }
}

pub fn check_preferred_inside_safe(template: &Template) -> Result<(), TemplateError> {
    let outside: Vec<String> = template
        .boundaries
        .values()
        .filter(|b| !b.safe.contains(&b.preferred))
        .map(|b| b.kind.to_string())
        .collect();
    if outside.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::invalid(
            &template.source,
            outside,
            "preferred rectangle extends past the safe rectangle",
        ))
    }
}
