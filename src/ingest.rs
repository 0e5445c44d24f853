//! Tabular Ingest - CSV rows to card records
//!
//! The header row is mandatory. Every data row yields its own outcome so one
//! bad row never stops the rest of the file. Rows are numbered from 1, the
//! first row after the header.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::card::{
    determine_is_equipment, determine_target_type, determine_timing, Anthem, Artifact, CardRecord, CardType,
    CardVariant, Creature, Incantation, Spell, TargetKind, Timing, Trait, VARIABLE_COST,
};
use crate::error::{Classify, ErrorKind};
use crate::validation::{self, ValidationError};

/// Keywords picked out of the effect text when a file has no `Keywords` column.
pub const EXTRACTED_KEYWORDS: [&str; 10] = [
    "CRITICAL", "HASTE", "DAMAGE", "BUFF", "EQUIPMENT", "COUNTER", "DRAW", "DIRECT", "FLYING", "IMMUNE",
];

const REQUIRED_COLUMNS: [&str; 3] = ["Name", "Cost", "Effect"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read header: {0}")]
    Header(#[source] csv::Error),

    #[error("missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("row {row}: unreadable: {source}")]
    Read {
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error("row {row}: {field} is required")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: invalid {field}: {value:?}")]
    InvalidField {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: unknown card type: {value}")]
    UnknownType { row: usize, value: String },

    #[error("row {row}: {source}")]
    Validation {
        row: usize,
        #[source]
        source: ValidationError,
    },
}

impl IngestError {
    /// One-based data row the error belongs to, if any.
    pub fn row(&self) -> Option<usize> {
        match self {
            IngestError::Read { row, .. }
            | IngestError::MissingField { row, .. }
            | IngestError::InvalidField { row, .. }
            | IngestError::UnknownType { row, .. }
            | IngestError::Validation { row, .. } => Some(*row),
            _ => None,
        }
    }
}

impl Classify for IngestError {
    fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Validation,
        }
    }
}

/// Result for one data row.
#[derive(Debug)]
pub struct RowOutcome {
    pub row: usize,
    pub result: Result<CardRecord, IngestError>,
}

impl RowOutcome {
    /// One-line summary as printed by the ingest command.
    pub fn summary(&self) -> String {
        match &self.result {
            Ok(record) => format!("row {}: ok {} ({})", self.row, record.name, record.card_type()),
            Err(e) => format!("row {}: failed: {e}", self.row),
        }
    }
}

/// Column positions by header name, matched case-insensitively.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(header: &csv::StringRecord) -> Self {
        Self(
            header
                .iter()
                .enumerate()
                .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
                .collect(),
        )
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Trimmed cell, `None` when the column is absent or the cell is blank.
    fn get<'r>(&self, row: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|i| row.get(*i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

pub fn parse_file(path: &Path, fallback_type: Option<CardType>) -> Result<Vec<RowOutcome>, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_cards(file, fallback_type)
}

/// Parse every data row. `fallback_type` is used when the file has no `Type` column.
pub fn parse_cards<R: Read>(reader: R, fallback_type: Option<CardType>) -> Result<Vec<RowOutcome>, IngestError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header = csv.headers().map_err(IngestError::Header)?.clone();
    let columns = Columns::new(&header);

    if !columns.has("Type") && fallback_type.is_none() {
        return Err(IngestError::MissingColumn("Type"));
    }
    for name in REQUIRED_COLUMNS {
        if !columns.has(name) {
            return Err(IngestError::MissingColumn(name));
        }
    }

    let mut outcomes = Vec::new();
    for (i, row) in csv.records().enumerate() {
        let row_no = i + 1;
        let result = match row {
            Ok(row) => parse_row(&columns, &row, row_no, fallback_type),
            Err(source) => Err(IngestError::Read { row: row_no, source }),
        };
        if let Err(e) = &result {
            debug!(row = row_no, error = %e, "row rejected");
        }
        outcomes.push(RowOutcome { row: row_no, result });
    }
    Ok(outcomes)
}

fn parse_row(
    columns: &Columns,
    row: &csv::StringRecord,
    row_no: usize,
    fallback_type: Option<CardType>,
) -> Result<CardRecord, IngestError> {
    let required = |field: &'static str| {
        columns
            .get(row, field)
            .ok_or(IngestError::MissingField { row: row_no, field })
    };

    let card_type = match columns.get(row, "Type") {
        Some(raw) => raw.parse::<CardType>().map_err(|_| IngestError::UnknownType {
            row: row_no,
            value: raw.to_string(),
        })?,
        None => fallback_type.ok_or(IngestError::MissingField { row: row_no, field: "Type" })?,
    };

    let name = required("Name")?;
    let effect = required("Effect")?;
    let cost = parse_cost(required("Cost")?, row_no)?;

    let variant = match card_type {
        CardType::Creature => CardVariant::Creature(Creature {
            attack: parse_int(required("Attack")?, "attack", row_no)?,
            defense: parse_int(required("Defense")?, "defense", row_no)?,
            trait_: match columns.get(row, "Trait") {
                Some(raw) => Some(parse_trait(raw).ok_or_else(|| invalid(row_no, "trait", raw))?),
                None => None,
            },
        }),
        CardType::Artifact => CardVariant::Artifact(Artifact {
            is_equipment: match columns.get(row, "IsEquipment") {
                Some(raw) => parse_bool(raw).ok_or_else(|| invalid(row_no, "is_equipment", raw))?,
                None => determine_is_equipment(effect),
            },
        }),
        CardType::Spell => CardVariant::Spell(Spell {
            target_type: Some(match columns.get(row, "TargetType") {
                Some(raw) => raw
                    .parse::<TargetKind>()
                    .map_err(|_| invalid(row_no, "target_type", raw))?,
                None => determine_target_type(effect),
            }),
        }),
        CardType::Incantation => CardVariant::Incantation(Incantation {
            timing: match columns.get(row, "Timing") {
                Some(raw) => Some(
                    raw.to_ascii_uppercase()
                        .parse::<Timing>()
                        .map_err(|_| invalid(row_no, "timing", raw))?,
                ),
                None => determine_timing(effect),
            },
        }),
        CardType::Anthem => CardVariant::Anthem(Anthem {
            continuous: match columns.get(row, "Continuous") {
                Some(raw) => parse_bool(raw).ok_or_else(|| invalid(row_no, "continuous", raw))?,
                None => true,
            },
        }),
    };

    let keywords: Vec<String> = if columns.has("Keywords") {
        columns
            .get(row, "Keywords")
            .map(|raw| raw.split([';', '|']).map(str::to_string).collect())
            .unwrap_or_default()
    } else {
        extract_keywords(effect)
    };

    let mut record = CardRecord::new(name, cost, effect, variant).with_keywords(keywords);
    if let Some(id) = columns.get(row, "Id") {
        record = record.with_id(id);
    }

    validation::validate(&record).map_err(|source| IngestError::Validation { row: row_no, source })?;
    Ok(record)
}

/// Keywords from [`EXTRACTED_KEYWORDS`] that occur anywhere in the effect, in list order.
pub fn extract_keywords(effect: &str) -> Vec<String> {
    let upper = effect.to_uppercase();
    EXTRACTED_KEYWORDS
        .iter()
        .filter(|k| upper.contains(*k))
        .map(|k| k.to_string())
        .collect()
}

fn invalid(row: usize, field: &'static str, value: &str) -> IngestError {
    IngestError::InvalidField {
        row,
        field,
        value: value.to_string(),
    }
}

/// Digits, or `X` for the variable cost.
fn parse_cost(raw: &str, row: usize) -> Result<i32, IngestError> {
    if raw.eq_ignore_ascii_case("x") {
        return Ok(VARIABLE_COST);
    }
    parse_int(raw, "cost", row)
}

fn parse_int(raw: &str, field: &'static str, row: usize) -> Result<i32, IngestError> {
    raw.parse::<i32>().map_err(|_| invalid(row, field, raw))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_trait(raw: &str) -> Option<Trait> {
    Trait::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(raw))
}
