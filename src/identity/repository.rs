// Identity persistence

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{IdentityMetadata, IdentityRecord};
use crate::error::Result;

/// Backing store for `IdentityStore`.
///
/// Calls are made while the store's lock is held, so implementations only
/// need to be `Send`.
pub trait IdentityRepository: Send {
    /// Every record, active or not, ordered by id.
    fn load_all(&self) -> Result<Vec<IdentityRecord>>;

    fn insert(&self, record: &IdentityRecord) -> Result<()>;

    fn update_hit(&self, id: i64, last_seen: DateTime<Utc>, match_count: u64) -> Result<()>;

    fn deactivate(&self, id: i64) -> Result<()>;
}

/// SQLite-backed repository (table `identities`).
pub struct SqliteIdentityRepository {
    conn: Connection,
}

impl SqliteIdentityRepository {
    /// Open (and migrate) the database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = crate::db::open_db(path)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = crate::db::open_in_memory()?;
        Ok(Self { conn })
    }
}

impl IdentityRepository for SqliteIdentityRepository {
    fn load_all(&self) -> Result<Vec<IdentityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, embedding, image_path, description, created_at, last_seen, match_count, active
             FROM identities ORDER BY id",
        )?;
        let records = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                let match_count: i64 = row.get(7)?;
                Ok(IdentityRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    embedding: decode_embedding(&blob),
                    metadata: IdentityMetadata {
                        image_path: row.get(3)?,
                        description: row.get(4)?,
                    },
                    created_at: row.get(5)?,
                    last_seen: row.get(6)?,
                    match_count: match_count.max(0) as u64,
                    active: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn insert(&self, record: &IdentityRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO identities (id, name, embedding, image_path, description, created_at, last_seen, match_count, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.name,
                encode_embedding(&record.embedding),
                record.metadata.image_path,
                record.metadata.description,
                record.created_at,
                record.last_seen,
                record.match_count as i64,
                record.active,
            ],
        )?;
        Ok(())
    }

    fn update_hit(&self, id: i64, last_seen: DateTime<Utc>, match_count: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE identities SET last_seen = ?1, match_count = ?2 WHERE id = ?3",
            params![last_seen, match_count as i64, id],
        )?;
        Ok(())
    }

    fn deactivate(&self, id: i64) -> Result<()> {
        self.conn.execute("UPDATE identities SET active = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }
}

/// Little-endian f32 sequence.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
