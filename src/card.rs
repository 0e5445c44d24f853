//! Card Model - typed records with five variants
//!
//! A record is a shared header plus exactly one variant payload. The wire
//! form (`CardWire`) is the loose JSON shape exchanged with the ingester,
//! the store and the CLI; `CardRecord` is the validated, typed shape the
//! composer consumes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::{self, ValidationError, ValidationKind};

/// Cost value that renders as the variable "X" glyph.
pub const VARIABLE_COST: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CardType {
    Creature,
    Artifact,
    Spell,
    Incantation,
    Anthem,
}

impl CardType {
    pub const ALL: [CardType; 5] = [
        CardType::Creature,
        CardType::Artifact,
        CardType::Spell,
        CardType::Incantation,
        CardType::Anthem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Creature => "Creature",
            CardType::Artifact => "Artifact",
            CardType::Spell => "Spell",
            CardType::Incantation => "Incantation",
            CardType::Anthem => "Anthem",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown card type: {0}")]
pub struct UnknownCardType(pub String);

impl FromStr for CardType {
    type Err = UnknownCardType;

    /// Case-insensitive; the tabular ingester accepts `creature` as well as `Creature`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        CardType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownCardType(s.to_string()))
    }
}

/// Closed set of creature subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trait {
    Beast,
    Warrior,
    Dragon,
    Demon,
    Angel,
    Legendary,
    Ancient,
    Divine,
}

impl Trait {
    pub const ALL: [Trait; 8] = [
        Trait::Beast,
        Trait::Warrior,
        Trait::Dragon,
        Trait::Demon,
        Trait::Angel,
        Trait::Legendary,
        Trait::Ancient,
        Trait::Divine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trait::Beast => "Beast",
            Trait::Warrior => "Warrior",
            Trait::Dragon => "Dragon",
            Trait::Demon => "Demon",
            Trait::Angel => "Angel",
            Trait::Legendary => "Legendary",
            Trait::Ancient => "Ancient",
            Trait::Divine => "Divine",
        }
    }
}

impl FromStr for Trait {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trait::ALL.into_iter().find(|t| t.as_str() == s).ok_or(())
    }
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a spell may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Creature,
    Player,
    Any,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Creature => "Creature",
            TargetKind::Player => "Player",
            TargetKind::Any => "Any",
        }
    }
}

impl FromStr for TargetKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creature" => Ok(TargetKind::Creature),
            "Player" => Ok(TargetKind::Player),
            "Any" => Ok(TargetKind::Any),
            _ => Err(()),
        }
    }
}

/// Trigger phase of an incantation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    #[serde(rename = "ON ANY CLASH")]
    OnAnyClash,
    #[serde(rename = "ON ATTACK")]
    OnAttack,
}

impl Timing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timing::OnAnyClash => "ON ANY CLASH",
            Timing::OnAttack => "ON ATTACK",
        }
    }
}

impl FromStr for Timing {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON ANY CLASH" => Ok(Timing::OnAnyClash),
            "ON ATTACK" => Ok(Timing::OnAttack),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creature {
    pub attack: i32,
    pub defense: i32,
    pub trait_: Option<Trait>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub is_equipment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spell {
    pub target_type: Option<TargetKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incantation {
    pub timing: Option<Timing>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anthem {
    pub continuous: bool,
}

/// Variant payload. The tag of a record is the payload's discriminant, so a
/// mismatched tag cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardVariant {
    Creature(Creature),
    Artifact(Artifact),
    Spell(Spell),
    Incantation(Incantation),
    Anthem(Anthem),
}

impl CardVariant {
    pub fn card_type(&self) -> CardType {
        match self {
            CardVariant::Creature(_) => CardType::Creature,
            CardVariant::Artifact(_) => CardType::Artifact,
            CardVariant::Spell(_) => CardType::Spell,
            CardVariant::Incantation(_) => CardType::Incantation,
            CardVariant::Anthem(_) => CardType::Anthem,
        }
    }
}

/// A card as handed to the core. Never mutated by composition.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    pub id: Option<String>,
    pub name: String,
    /// `-1` is the variable "X" cost.
    pub cost: i32,
    pub effect: String,
    /// Ordered, duplicate-free.
    pub keywords: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub variant: CardVariant,
    /// Unknown wire fields kept by a lenient load so they survive a round trip.
    pub extra: BTreeMap<String, Value>,
}

impl CardRecord {
    /// Build a record with an empty header apart from the required fields.
    pub fn new(name: impl Into<String>, cost: i32, effect: impl Into<String>, variant: CardVariant) -> Self {
        Self {
            id: None,
            name: name.into(),
            cost,
            effect: effect.into(),
            keywords: Vec::new(),
            created_at: None,
            updated_at: None,
            metadata: BTreeMap::new(),
            variant,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = dedup_keywords(keywords.into_iter().map(Into::into));
        self
    }

    pub fn card_type(&self) -> CardType {
        self.variant.card_type()
    }

    /// `"Creature - <trait>"` for creatures with a trait, otherwise the variant name.
    pub fn type_line(&self) -> String {
        match &self.variant {
            CardVariant::Creature(Creature { trait_: Some(t), .. }) => format!("Creature - {t}"),
            other => other.card_type().to_string(),
        }
    }

    /// The single cost glyph: base-ten digits, or "X" for a variable cost.
    pub fn cost_glyph(&self) -> String {
        if self.cost == VARIABLE_COST {
            "X".to_string()
        } else {
            self.cost.to_string()
        }
    }

    pub fn to_wire(&self) -> CardWire {
        let mut wire = CardWire {
            id: self.id.clone(),
            card_type: self.card_type().as_str().to_string(),
            name: self.name.clone(),
            cost: i64::from(self.cost),
            effect: self.effect.clone(),
            keywords: self.keywords.clone(),
            attack: None,
            defense: None,
            trait_: None,
            is_equipment: None,
            target_type: None,
            timing: None,
            continuous: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata.clone(),
            extra: self.extra.clone(),
        };
        match &self.variant {
            CardVariant::Creature(c) => {
                wire.attack = Some(i64::from(c.attack));
                wire.defense = Some(i64::from(c.defense));
                wire.trait_ = c.trait_.map(|t| t.as_str().to_string());
            }
            CardVariant::Artifact(a) => wire.is_equipment = Some(a.is_equipment),
            CardVariant::Spell(s) => wire.target_type = s.target_type.map(|t| t.as_str().to_string()),
            CardVariant::Incantation(i) => wire.timing = i.timing.map(|t| t.as_str().to_string()),
            CardVariant::Anthem(a) => wire.continuous = Some(a.continuous),
        }
        wire
    }

    /// Validated ingest: unknown fields are rejected and every invariant is checked.
    pub fn from_wire_strict(wire: CardWire) -> Result<Self, ValidationError> {
        if let Some(field) = wire.extra.keys().next() {
            return Err(ValidationError::new(
                field.clone(),
                ValidationKind::Format,
                format!("unknown field: {field}"),
            ));
        }
        let record = Self::from_wire(wire)?;
        validation::validate(&record)?;
        Ok(record)
    }

    /// Round-trip load: unknown fields are preserved in `extra`. Closed-set
    /// fields must still parse since the typed record cannot hold anything else.
    pub fn from_wire(wire: CardWire) -> Result<Self, ValidationError> {
        let card_type: CardType = wire
            .card_type
            .parse()
            .map_err(|e: UnknownCardType| ValidationError::new("type", ValidationKind::Invalid, e.to_string()))?;

        let cost = narrow("cost", wire.cost)?;

        let variant = match card_type {
            CardType::Creature => {
                let attack = wire
                    .attack
                    .ok_or_else(|| ValidationError::required("attack"))
                    .and_then(|v| narrow("attack", v))?;
                let defense = wire
                    .defense
                    .ok_or_else(|| ValidationError::required("defense"))
                    .and_then(|v| narrow("defense", v))?;
                let trait_ = parse_closed::<Trait>("trait", wire.trait_.as_deref())?;
                CardVariant::Creature(Creature { attack, defense, trait_ })
            }
            CardType::Artifact => CardVariant::Artifact(Artifact {
                is_equipment: wire.is_equipment.unwrap_or(false),
            }),
            CardType::Spell => CardVariant::Spell(Spell {
                target_type: parse_closed::<TargetKind>("target_type", wire.target_type.as_deref())?,
            }),
            CardType::Incantation => CardVariant::Incantation(Incantation {
                timing: parse_closed::<Timing>("timing", wire.timing.as_deref())?,
            }),
            CardType::Anthem => CardVariant::Anthem(Anthem {
                continuous: wire.continuous.unwrap_or(true),
            }),
        };

        Ok(Self {
            id: wire.id.filter(|id| !id.is_empty()),
            name: wire.name,
            cost,
            effect: wire.effect,
            keywords: dedup_keywords(wire.keywords),
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            metadata: wire.metadata,
            variant,
            extra: wire.extra,
        })
    }
}

fn narrow(field: &str, value: i64) -> Result<i32, ValidationError> {
    i32::try_from(value).map_err(|_| ValidationError::new(field, ValidationKind::Range, format!("{field} out of range: {value}")))
}

fn parse_closed<T: FromStr>(field: &str, value: Option<&str>) -> Result<Option<T>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ValidationError::new(field, ValidationKind::Invalid, format!("invalid {field}: {raw}"))),
    }
}

fn dedup_keywords(keywords: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for kw in keywords {
        let kw = kw.trim().to_string();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}

/// Wire form of a card record (JSON). Field order is not significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub card_type: String,
    pub name: String,
    pub cost: i64,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defense: Option<i64>,
    #[serde(rename = "trait", default, skip_serializing_if = "Option::is_none")]
    pub trait_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_equipment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// --- Derivation helpers ---

/// Creature if the effect says "target creature", else Player on "target player", else Any.
pub fn determine_target_type(effect: &str) -> TargetKind {
    let lower = effect.to_lowercase();
    if lower.contains("target creature") {
        TargetKind::Creature
    } else if lower.contains("target player") {
        TargetKind::Player
    } else {
        TargetKind::Any
    }
}

/// "ON ANY CLASH" wins over "ON ATTACK" when both appear.
pub fn determine_timing(effect: &str) -> Option<Timing> {
    if effect.contains(Timing::OnAnyClash.as_str()) {
        Some(Timing::OnAnyClash)
    } else if effect.contains(Timing::OnAttack.as_str()) {
        Some(Timing::OnAttack)
    } else {
        None
    }
}

/// True when "equip" occurs as a standalone word (case-insensitive).
pub fn determine_is_equipment(effect: &str) -> bool {
    has_equip_word(effect)
}

fn is_equip_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | ',' | ':' | ';')
}

/// "equip" bounded on both sides by start/end of string, whitespace or `.,:;`.
/// "equipment" and "equipped" do not count on their own.
pub(crate) fn has_equip_word(text: &str) -> bool {
    const WORD: &str = "equip";
    let lower = text.to_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(WORD) {
        let start = from + pos;
        let end = start + WORD.len();
        let before_ok = lower[..start].chars().next_back().map_or(true, is_equip_boundary);
        let after_ok = lower[end..].chars().next().map_or(true, is_equip_boundary);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}
