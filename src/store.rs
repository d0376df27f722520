//! SQLite persistence for user filters and the dedup ledger.
//!
//! Rows are parsed into typed models right here at the boundary; nothing
//! above this layer touches raw rows. The scheduler is the only writer,
//! which keeps the check-then-mark sequence on one connection and makes
//! the dedup contract a single-writer discipline.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{DeliveryOverride, Renovation, Source, UserFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt column value: {0}")]
    Corrupt(String),
}

/// Outcome of a mark_seen call. AlreadyMarked is a normal result, not an
/// error: re-presenting a listing across passes is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Inserted,
    AlreadyMarked,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_filters (
    user_id            INTEGER PRIMARY KEY,
    city               TEXT    NOT NULL DEFAULT 'Москва',
    rooms              TEXT    NOT NULL DEFAULT '[]',
    price_min          INTEGER,
    price_max          INTEGER,
    area_min           REAL,
    area_max           REAL,
    kitchen_min        REAL,
    renovation_types   TEXT    NOT NULL DEFAULT '[]',
    no_commission_only INTEGER NOT NULL DEFAULT 0,
    pets_required      INTEGER NOT NULL DEFAULT 0,
    enabled_sources    TEXT    NOT NULL DEFAULT '["cian","yandex","avito"]',
    paused             INTEGER NOT NULL DEFAULT 0,
    override_chat_id   INTEGER,
    override_topic_id  INTEGER
);

CREATE TABLE IF NOT EXISTS seen_listings (
    user_id     INTEGER NOT NULL,
    source      TEXT    NOT NULL,
    external_id TEXT    NOT NULL,
    seen_at     TEXT    NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, source, external_id)
);

CREATE INDEX IF NOT EXISTS idx_seen_user ON seen_listings(user_id);
"#;

/// Additive migrations for databases created by earlier versions. Each is
/// allowed to fail (column already present) without aborting startup.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE user_filters ADD COLUMN area_max REAL",
    "ALTER TABLE user_filters ADD COLUMN override_chat_id INTEGER",
    "ALTER TABLE user_filters ADD COLUMN override_topic_id INTEGER",
    "ALTER TABLE user_filters ADD COLUMN enabled_sources TEXT NOT NULL DEFAULT '[\"cian\",\"yandex\",\"avito\"]'",
];

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database and applies schema and
    /// migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let db = Self { conn };
        db.init()?;
        info!("Database ready at {}", path.as_ref().display());
        Ok(db)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        for sql in MIGRATIONS {
            if let Err(e) = self.conn.execute(sql, []) {
                debug!("Migration skipped ({e}): {}", &sql[..sql.len().min(60)]);
            }
        }
        Ok(())
    }

    // --- User filters ---

    pub fn get_filter(&self, user_id: i64) -> Result<Option<UserFilter>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, city, rooms, price_min, price_max, area_min, area_max,
                        kitchen_min, renovation_types, no_commission_only, pets_required,
                        enabled_sources, paused, override_chat_id, override_topic_id
                 FROM user_filters WHERE user_id = ?1",
                [user_id],
                row_to_filter,
            )
            .optional()?;
        row.transpose()
    }

    pub fn upsert_filter(&self, f: &UserFilter) -> Result<(), StoreError> {
        let rooms = serde_json::to_string(&f.rooms)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let renovations: Vec<&str> = f.renovation_types.iter().map(|r| r.as_str()).collect();
        let renovations = serde_json::to_string(&renovations)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let sources: Vec<&str> = f.enabled_sources.iter().map(|s| s.as_str()).collect();
        let sources = serde_json::to_string(&sources)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO user_filters
                (user_id, city, rooms, price_min, price_max, area_min, area_max,
                 kitchen_min, renovation_types, no_commission_only, pets_required,
                 enabled_sources, paused, override_chat_id, override_topic_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(user_id) DO UPDATE SET
                city = excluded.city,
                rooms = excluded.rooms,
                price_min = excluded.price_min,
                price_max = excluded.price_max,
                area_min = excluded.area_min,
                area_max = excluded.area_max,
                kitchen_min = excluded.kitchen_min,
                renovation_types = excluded.renovation_types,
                no_commission_only = excluded.no_commission_only,
                pets_required = excluded.pets_required,
                enabled_sources = excluded.enabled_sources,
                paused = excluded.paused,
                override_chat_id = excluded.override_chat_id,
                override_topic_id = excluded.override_topic_id",
            params![
                f.user_id,
                f.city,
                rooms,
                f.price_min,
                f.price_max,
                f.area_min,
                f.area_max,
                f.kitchen_min,
                renovations,
                f.no_commission_only as i64,
                f.pets_required as i64,
                sources,
                f.paused as i64,
                f.delivery_override.map(|o| o.chat_id),
                f.delivery_override.and_then(|o| o.topic_id),
            ],
        )?;
        Ok(())
    }

    /// All stored filters, paused ones included; the scheduler decides
    /// what to skip so it can report pause status while skipping.
    pub fn get_filters(&self) -> Result<Vec<UserFilter>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, city, rooms, price_min, price_max, area_min, area_max,
                    kitchen_min, renovation_types, no_commission_only, pets_required,
                    enabled_sources, paused, override_chat_id, override_topic_id
             FROM user_filters ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], row_to_filter)?;

        let mut filters = Vec::new();
        for row in rows {
            filters.push(row??);
        }
        Ok(filters)
    }

    pub fn set_paused(&self, user_id: i64, paused: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE user_filters SET paused = ?1 WHERE user_id = ?2",
            params![paused as i64, user_id],
        )?;
        Ok(())
    }

    /// Re-read of the pause flag mid-pass; a user deleted mid-pass counts
    /// as paused.
    pub fn is_paused(&self, user_id: i64) -> Result<bool, StoreError> {
        let paused: Option<i64> = self
            .conn
            .query_row(
                "SELECT paused FROM user_filters WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(paused.map_or(true, |p| p != 0))
    }

    // --- Seen listings (dedup ledger) ---

    pub fn has_seen(
        &self,
        user_id: i64,
        source: Source,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM seen_listings
                 WHERE user_id = ?1 AND source = ?2 AND external_id = ?3",
                params![user_id, source.as_str(), external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Durably records the (user, source, external_id) triple. Marking an
    /// already-marked key is a no-op reported as AlreadyMarked.
    pub fn mark_seen(
        &self,
        user_id: i64,
        source: Source,
        external_id: &str,
    ) -> Result<MarkOutcome, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO seen_listings (user_id, source, external_id)
             VALUES (?1, ?2, ?3)",
            params![user_id, source.as_str(), external_id],
        )?;
        Ok(if inserted > 0 {
            MarkOutcome::Inserted
        } else {
            MarkOutcome::AlreadyMarked
        })
    }

    /// Retention sweep; dedup correctness only needs records younger than
    /// the source sites keep listings visible.
    pub fn cleanup_seen_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM seen_listings WHERE seen_at < datetime('now', ?1)",
            [format!("-{days} days")],
        )?;
        Ok(removed)
    }
}

fn row_to_filter(row: &rusqlite::Row) -> rusqlite::Result<Result<UserFilter, StoreError>> {
    let rooms_json: String = row.get(2)?;
    let renovations_json: String = row.get(8)?;
    let sources_json: String = row.get(11)?;
    let override_chat_id: Option<i64> = row.get(13)?;
    let override_topic_id: Option<i64> = row.get(14)?;

    let filter = (|| {
        let rooms: Vec<u32> = serde_json::from_str(&rooms_json)
            .map_err(|e| StoreError::Corrupt(format!("rooms: {e}")))?;
        let renovations: Vec<String> = serde_json::from_str(&renovations_json)
            .map_err(|e| StoreError::Corrupt(format!("renovation_types: {e}")))?;
        let sources: Vec<String> = serde_json::from_str(&sources_json)
            .map_err(|e| StoreError::Corrupt(format!("enabled_sources: {e}")))?;

        Ok(UserFilter {
            user_id: row.get(0)?,
            city: row.get(1)?,
            rooms,
            price_min: row.get(3)?,
            price_max: row.get(4)?,
            area_min: row.get(5)?,
            area_max: row.get(6)?,
            kitchen_min: row.get(7)?,
            renovation_types: renovations
                .iter()
                .map(|r| Renovation::parse(r))
                .collect(),
            no_commission_only: row.get::<_, i64>(9)? != 0,
            pets_required: row.get::<_, i64>(10)? != 0,
            enabled_sources: sources
                .iter()
                .filter_map(|s| Source::parse(s))
                .collect(),
            paused: row.get::<_, i64>(12)? != 0,
            delivery_override: override_chat_id.map(|chat_id| DeliveryOverride {
                chat_id,
                topic_id: override_topic_id,
            }),
        })
    })();

    Ok(filter)
}
