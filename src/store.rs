//! Card Store - persistence gateway contract
//!
//! Save is all-or-nothing across the base record, its variant payload,
//! keywords and metadata. `created_at` survives re-saves; `updated_at`
//! advances on every save.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::card::CardRecord;
use crate::config::ConfigError;
use crate::error::{Classify, ErrorKind};
use crate::validation::{self, ValidationError};

/// Store operation named in persistence errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Connect,
    Migrate,
    Seed,
    Save,
    Load,
    List,
    Delete,
    Clean,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Connect => "connect",
            StoreOp::Migrate => "migrate",
            StoreOp::Seed => "seed",
            StoreOp::Save => "save",
            StoreOp::Load => "load",
            StoreOp::List => "list",
            StoreOp::Delete => "delete",
            StoreOp::Clean => "clean",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("card {0} not found")]
    NotFound(String),

    #[error("{op} failed: {source}")]
    Persistence {
        op: StoreOp,
        #[source]
        source: sqlx::Error,
    },

    #[error("migrate failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored card {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn at(op: StoreOp) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Persistence { op, source }
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Config(_) => ErrorKind::Config,
            _ => ErrorKind::Persistence,
        }
    }
}

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Validate and persist `record`, returning it as stored (id and timestamps filled in).
    async fn save(&self, record: &CardRecord) -> Result<CardRecord, StoreError>;

    async fn load(&self, id: &str) -> Result<CardRecord, StoreError>;

    /// Snapshot of every stored card, in no particular order.
    async fn list(&self) -> Result<Vec<CardRecord>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// The record as it will be stored: validated, with an id, the original
/// `created_at` (or `now`) and `updated_at = now`.
///
/// Timestamps are truncated to microseconds, the precision of a Postgres
/// `TIMESTAMPTZ`, so the returned record equals what a later load reads back.
pub fn prepare_for_save(
    record: &CardRecord,
    existing_created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<CardRecord, StoreError> {
    validation::validate(record)?;
    let mut stored = record.clone();
    if stored.id.as_deref().map_or(true, str::is_empty) {
        stored.id = Some(Uuid::new_v4().to_string());
    }
    let now = now.trunc_subsecs(6);
    stored.created_at = existing_created_at
        .or(record.created_at)
        .map(|t| t.trunc_subsecs(6))
        .or(Some(now));
    stored.updated_at = Some(now);
    Ok(stored)
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: RwLock<BTreeMap<String, CardRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn save(&self, record: &CardRecord) -> Result<CardRecord, StoreError> {
        let mut cards = self.cards.write().await;
        let existing = record
            .id
            .as_deref()
            .and_then(|id| cards.get(id))
            .and_then(|c| c.created_at);
        let stored = prepare_for_save(record, existing, Utc::now())?;
        let id = stored.id.clone().unwrap_or_default();
        debug!(card_id = %id, "card saved");
        cards.insert(id, stored.clone());
        Ok(stored)
    }

    async fn load(&self, id: &str) -> Result<CardRecord, StoreError> {
        self.cards
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<CardRecord>, StoreError> {
        Ok(self.cards.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.cards
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Anthem, CardVariant, Creature};
    use assert_matches::assert_matches;

    fn bear() -> CardRecord {
        CardRecord::new(
            "Mountain Bear",
            3,
            "A sturdy beast.",
            CardVariant::Creature(Creature {
                attack: 3,
                defense: 3,
                trait_: None,
            }),
        )
    }

    #[tokio::test]
    async fn save_assigns_id_and_preserves_created_at() {
        let store = MemoryStore::new();
        let first = store.save(&bear()).await.unwrap();
        let id = first.id.clone().unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let mut edited = first.clone();
        edited.name = "Mountain Bear II".into();
        edited.created_at = None;
        let second = store.save(&edited).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.load(&id).await.unwrap().name, "Mountain Bear II");
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn saved_timestamps_keep_microsecond_precision() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let micros = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);

        let fresh = prepare_for_save(&bear(), None, now).unwrap();
        assert_eq!(fresh.created_at, Some(micros));
        assert_eq!(fresh.updated_at, Some(micros));

        let mut imported = bear();
        imported.created_at = Some(now);
        let stored = prepare_for_save(&imported, None, now).unwrap();
        assert_eq!(stored.created_at, Some(micros));
    }

    #[tokio::test]
    async fn invalid_records_are_not_saved() {
        let store = MemoryStore::new();
        let anthem = CardRecord::new("Fading Song", 2, "Creatures get +1/+0.", CardVariant::Anthem(Anthem { continuous: false }));
        assert_matches!(store.save(&anthem).await, Err(StoreError::Validation(e)) if e.field == "continuous");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_then_load_is_not_found() {
        let store = MemoryStore::new();
        let id = store.save(&bear()).await.unwrap().id.unwrap();
        store.delete(&id).await.unwrap();
        assert_matches!(store.load(&id).await, Err(StoreError::NotFound(_)));
        assert_matches!(store.delete(&id).await, Err(StoreError::NotFound(_)));
    }
}
