//! Postgres card store.
//!
//! A card is one `cards` row plus one row in the satellite table of its
//! variant, its keyword links and its metadata rows.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use crate::card::{
    Anthem, Artifact, CardRecord, CardType, CardVariant, Creature, Incantation, Spell, TargetKind, Timing, Trait,
};
use crate::config::DbConfig;
use crate::store::{prepare_for_save, CardStore, StoreError, StoreOp};

/// Satellite tables, one per variant, deleted first.
const SATELLITE_TABLES: [&str; 5] = ["creatures", "artifacts", "spells", "incantations", "anthems"];

/// Tables emptied by [`PgCardStore::clean`], children before parents.
const CARD_TABLES: [&str; 9] = [
    "creatures",
    "artifacts",
    "spells",
    "incantations",
    "anthems",
    "card_keywords",
    "card_metadata",
    "card_images",
    "cards",
];

type CardRow = (String, String, String, i32, String, Value, DateTime<Utc>, DateTime<Utc>);

const CARD_COLUMNS: &str = "id, card_type, name, cost, effect, extra, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgCardStore {
    pool: PgPool,
}

impl PgCardStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let options = config.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::at(StoreOp::Connect))?;
        info!(host = %config.effective_host(), database = %config.database, "connected to card store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("card store migrations applied");
        Ok(())
    }

    /// Insert the reference rows for card types and traits. Idempotent.
    pub async fn seed(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::Seed))?;
        for card_type in CardType::ALL {
            sqlx::query("INSERT INTO card_types (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(card_type.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Seed))?;
        }
        for t in Trait::ALL {
            sqlx::query("INSERT INTO traits (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(t.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Seed))?;
        }
        tx.commit().await.map_err(StoreError::at(StoreOp::Seed))?;
        Ok(())
    }

    /// Delete every card, children before parents. Returns the number of cards removed.
    pub async fn clean(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::Clean))?;
        let mut removed = 0;
        for table in CARD_TABLES {
            let result = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Clean))?;
            if table == "cards" {
                removed = result.rows_affected();
            }
        }
        tx.commit().await.map_err(StoreError::at(StoreOp::Clean))?;
        info!(removed, "card store cleaned");
        Ok(removed)
    }

    async fn load_in(conn: &mut PgConnection, id: &str) -> Result<CardRecord, StoreError> {
        let query = format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = $1");
        let row: Option<CardRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StoreError::at(StoreOp::Load))?;
        let Some((id, card_type, name, cost, effect, extra, created_at, updated_at)) = row else {
            return Err(StoreError::NotFound(id.to_string()));
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };
        let card_type = CardType::from_str(&card_type).map_err(|e| corrupt(e.to_string()))?;

        let variant = match card_type {
            CardType::Creature => {
                let (attack, defense, trait_): (i32, i32, Option<String>) =
                    sqlx::query_as("SELECT attack, defense, trait FROM creatures WHERE card_id = $1")
                        .bind(&id)
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(StoreError::at(StoreOp::Load))?;
                let trait_ = match trait_ {
                    Some(t) => Some(Trait::from_str(&t).map_err(|_| corrupt(format!("unknown trait {t}")))?),
                    None => None,
                };
                CardVariant::Creature(Creature { attack, defense, trait_ })
            }
            CardType::Artifact => {
                let (is_equipment,): (bool,) = sqlx::query_as("SELECT is_equipment FROM artifacts WHERE card_id = $1")
                    .bind(&id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(StoreError::at(StoreOp::Load))?;
                CardVariant::Artifact(Artifact { is_equipment })
            }
            CardType::Spell => {
                let (target,): (Option<String>,) = sqlx::query_as("SELECT target_type FROM spells WHERE card_id = $1")
                    .bind(&id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(StoreError::at(StoreOp::Load))?;
                let target_type = match target {
                    Some(t) => Some(TargetKind::from_str(&t).map_err(|_| corrupt(format!("unknown target {t}")))?),
                    None => None,
                };
                CardVariant::Spell(Spell { target_type })
            }
            CardType::Incantation => {
                let (timing,): (Option<String>,) =
                    sqlx::query_as("SELECT timing FROM incantations WHERE card_id = $1")
                        .bind(&id)
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(StoreError::at(StoreOp::Load))?;
                let timing = match timing {
                    Some(t) => Some(Timing::from_str(&t).map_err(|_| corrupt(format!("unknown timing {t}")))?),
                    None => None,
                };
                CardVariant::Incantation(Incantation { timing })
            }
            CardType::Anthem => {
                let (continuous,): (bool,) = sqlx::query_as("SELECT continuous FROM anthems WHERE card_id = $1")
                    .bind(&id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(StoreError::at(StoreOp::Load))?;
                CardVariant::Anthem(Anthem { continuous })
            }
        };

        let keywords: Vec<(String,)> = sqlx::query_as(
            "SELECT k.name FROM card_keywords ck \
             JOIN keywords k ON k.id = ck.keyword_id \
             WHERE ck.card_id = $1 ORDER BY ck.position",
        )
        .bind(&id)
        .fetch_all(&mut *conn)
        .await
        .map_err(StoreError::at(StoreOp::Load))?;

        let metadata: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM card_metadata WHERE card_id = $1")
                .bind(&id)
                .fetch_all(&mut *conn)
                .await
                .map_err(StoreError::at(StoreOp::Load))?;

        let extra = match extra {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => BTreeMap::new(),
            other => return Err(corrupt(format!("extra is not an object: {other}"))),
        };

        Ok(CardRecord {
            id: Some(id.clone()),
            name,
            cost,
            effect,
            keywords: keywords.into_iter().map(|(k,)| k).collect(),
            created_at: Some(created_at),
            updated_at: Some(updated_at),
            metadata: metadata.into_iter().collect(),
            variant,
            extra,
        })
    }
}

#[async_trait]
impl CardStore for PgCardStore {
    async fn save(&self, record: &CardRecord) -> Result<CardRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::Save))?;

        let existing: Option<(DateTime<Utc>,)> = match record.id.as_deref() {
            Some(id) if !id.is_empty() => sqlx::query_as("SELECT created_at FROM cards WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Save))?,
            _ => None,
        };
        let stored = prepare_for_save(record, existing.map(|(c,)| c), Utc::now())?;
        let id = stored.id.clone().unwrap_or_default();
        let extra = serde_json::to_value(&stored.extra).map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            "INSERT INTO cards (id, card_type, name, cost, effect, extra, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                card_type  = EXCLUDED.card_type, \
                name       = EXCLUDED.name, \
                cost       = EXCLUDED.cost, \
                effect     = EXCLUDED.effect, \
                extra      = EXCLUDED.extra, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&id)
        .bind(stored.card_type().as_str())
        .bind(&stored.name)
        .bind(stored.cost)
        .bind(&stored.effect)
        .bind(&extra)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::at(StoreOp::Save))?;

        // The variant may have changed since the last save.
        for table in SATELLITE_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE card_id = $1"))
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Save))?;
        }

        let satellite = match &stored.variant {
            CardVariant::Creature(c) => {
                sqlx::query("INSERT INTO creatures (card_id, attack, defense, trait) VALUES ($1, $2, $3, $4)")
                    .bind(&id)
                    .bind(c.attack)
                    .bind(c.defense)
                    .bind(c.trait_.map(|t| t.as_str()))
            }
            CardVariant::Artifact(a) => sqlx::query("INSERT INTO artifacts (card_id, is_equipment) VALUES ($1, $2)")
                .bind(&id)
                .bind(a.is_equipment),
            CardVariant::Spell(s) => sqlx::query("INSERT INTO spells (card_id, target_type) VALUES ($1, $2)")
                .bind(&id)
                .bind(s.target_type.map(|t| t.as_str())),
            CardVariant::Incantation(i) => sqlx::query("INSERT INTO incantations (card_id, timing) VALUES ($1, $2)")
                .bind(&id)
                .bind(i.timing.map(|t| t.as_str())),
            CardVariant::Anthem(a) => sqlx::query("INSERT INTO anthems (card_id, continuous) VALUES ($1, $2)")
                .bind(&id)
                .bind(a.continuous),
        };
        satellite
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::Save))?;

        sqlx::query("DELETE FROM card_keywords WHERE card_id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::Save))?;
        for (position, keyword) in stored.keywords.iter().enumerate() {
            let (keyword_id,): (i32,) = sqlx::query_as(
                "INSERT INTO keywords (name) VALUES ($1) \
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id",
            )
            .bind(keyword)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::Save))?;

            sqlx::query("INSERT INTO card_keywords (card_id, keyword_id, position) VALUES ($1, $2, $3)")
                .bind(&id)
                .bind(keyword_id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Save))?;
        }

        sqlx::query("DELETE FROM card_metadata WHERE card_id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::Save))?;
        for (key, value) in &stored.metadata {
            sqlx::query("INSERT INTO card_metadata (card_id, key, value) VALUES ($1, $2, $3)")
                .bind(&id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Save))?;
        }

        tx.commit().await.map_err(StoreError::at(StoreOp::Save))?;
        debug!(card_id = %id, variant = %stored.card_type(), "card saved");
        Ok(stored)
    }

    async fn load(&self, id: &str) -> Result<CardRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::Load))?;
        let record = Self::load_in(&mut *tx, id).await?;
        tx.commit().await.map_err(StoreError::at(StoreOp::Load))?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<CardRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::List))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::List))?;

        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM cards")
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::List))?;

        let mut cards = Vec::with_capacity(ids.len());
        for (id,) in ids {
            cards.push(Self::load_in(&mut *tx, &id).await?);
        }
        tx.commit().await.map_err(StoreError::at(StoreOp::List))?;
        Ok(cards)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(StoreOp::Delete))?;
        for table in SATELLITE_TABLES.iter().chain(&["card_keywords", "card_metadata", "card_images"]) {
            sqlx::query(&format!("DELETE FROM {table} WHERE card_id = $1"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::at(StoreOp::Delete))?;
        }
        let result = sqlx::query("DELETE FROM cards WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(StoreOp::Delete))?;
        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.commit().await.map_err(StoreError::at(StoreOp::Delete))?;
        debug!(card_id = %id, "card deleted");
        Ok(())
    }
}
