//! Card Validation - Rule-based invariant checks
//!
//! Each rule inspects one invariant of a record and produces a structured
//! error naming the offending field. `validate` runs the rules in a fixed
//! order and reports the first failure.

use serde::{Deserialize, Serialize};

use crate::card::{has_equip_word, CardRecord, CardVariant, VARIABLE_COST};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Required,
    Invalid,
    Range,
    Format,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Required => "required",
            ValidationKind::Invalid => "invalid",
            ValidationKind::Range => "range",
            ValidationKind::Format => "format",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{field} {}: {message}", kind.as_str())]
pub struct ValidationError {
    pub field: String,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn required(field: &str) -> Self {
        Self::new(field, ValidationKind::Required, format!("{field} is required"))
    }
}

/// Validation rule trait - one invariant per rule
pub trait CardRule: Sync {
    fn name(&self) -> &'static str;
    fn check(&self, record: &CardRecord) -> Result<(), ValidationError>;
}

// --- Concrete Rules ---

pub struct NameRule;

impl CardRule for NameRule {
    fn name(&self) -> &'static str { "name" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        if record.name.trim().is_empty() {
            return Err(ValidationError::required("name"));
        }
        Ok(())
    }
}

pub struct CostRule;

impl CardRule for CostRule {
    fn name(&self) -> &'static str { "cost" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        if record.cost < VARIABLE_COST {
            return Err(ValidationError::new(
                "cost",
                ValidationKind::Range,
                format!("cost must be >= -1, got {}", record.cost),
            ));
        }
        Ok(())
    }
}

pub struct EffectRule;

impl CardRule for EffectRule {
    fn name(&self) -> &'static str { "effect" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        if record.effect.trim().is_empty() {
            return Err(ValidationError::required("effect"));
        }
        Ok(())
    }
}

pub struct StatsRule;

impl CardRule for StatsRule {
    fn name(&self) -> &'static str { "stats" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        if let CardVariant::Creature(c) = &record.variant {
            for (field, value) in [("attack", c.attack), ("defense", c.defense)] {
                if value < 0 {
                    return Err(ValidationError::new(
                        field,
                        ValidationKind::Range,
                        format!("{field} must be >= 0, got {value}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

pub struct AnthemContinuousRule;

impl CardRule for AnthemContinuousRule {
    fn name(&self) -> &'static str { "anthem_continuous" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        match &record.variant {
            CardVariant::Anthem(a) if !a.continuous => Err(ValidationError::new(
                "continuous",
                ValidationKind::Invalid,
                "anthem cards must be continuous",
            )),
            _ => Ok(()),
        }
    }
}

pub struct EquipmentRule;

impl CardRule for EquipmentRule {
    fn name(&self) -> &'static str { "equipment" }

    fn check(&self, record: &CardRecord) -> Result<(), ValidationError> {
        match &record.variant {
            CardVariant::Artifact(a) if a.is_equipment && !has_equip_word(&record.effect) => {
                Err(ValidationError::new(
                    "effect",
                    ValidationKind::Invalid,
                    "equipment artifacts must mention equip in their effect",
                ))
            }
            _ => Ok(()),
        }
    }
}

static RULES: &[&dyn CardRule] = &[
    &NameRule,
    &CostRule,
    &EffectRule,
    &StatsRule,
    &AnthemContinuousRule,
    &EquipmentRule,
];

/// Validate a record; returns the first violated invariant.
pub fn validate(record: &CardRecord) -> Result<(), ValidationError> {
    RULES.iter().try_for_each(|rule| rule.check(record))
}

/// Every violated invariant, in rule order.
pub fn validate_all(record: &CardRecord) -> Vec<ValidationError> {
    RULES.iter().filter_map(|rule| rule.check(record).err()).collect()
}
