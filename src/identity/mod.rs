// Identity store
// Registered face embeddings and nearest-neighbour matching against them.

pub mod repository;
pub mod similarity;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EMBEDDING_DIMENSION;
use crate::error::{Result, SecureVisionError};

pub use repository::{IdentityRepository, SqliteIdentityRepository};
pub use similarity::cosine_similarity;

/// Optional descriptive data attached at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub image_path: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: IdentityMetadata,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub match_count: u64,
    pub active: bool,
}

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match { id: i64, name: String, similarity: f32 },
    /// Nothing reached the threshold; `best_similarity` is the closest score seen.
    NoMatch { best_similarity: f32 },
}

impl MatchOutcome {
    pub fn similarity(&self) -> f32 {
        match self {
            MatchOutcome::Match { similarity, .. } => *similarity,
            MatchOutcome::NoMatch { best_similarity } => *best_similarity,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }
}

struct StoreState {
    /// All records ever inserted, in id order. Removed ones stay with `active = false`.
    records: Vec<IdentityRecord>,
    next_id: i64,
    repository: Option<Box<dyn IdentityRepository>>,
}

/// Thread-safe identity store.
///
/// One coarse lock serializes inserts and hit updates against match scans.
pub struct IdentityStore {
    state: Mutex<StoreState>,
    dimension: usize,
}

impl IdentityStore {
    /// Store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState {
                records: Vec::new(),
                next_id: 1,
                repository: None,
            }),
            dimension: EMBEDDING_DIMENSION,
        }
    }

    /// Store backed by a repository; existing records are loaded up front.
    pub fn with_repository(repository: Box<dyn IdentityRepository>) -> Result<Self> {
        let mut records = repository.load_all()?;
        records.sort_by_key(|r| r.id);
        let next_id = records.last().map(|r| r.id + 1).unwrap_or(1);

        log::info!(
            "Loaded {} identities ({} active)",
            records.len(),
            records.iter().filter(|r| r.active).count()
        );

        Ok(Self {
            state: Mutex::new(StoreState {
                records,
                next_id,
                repository: Some(repository),
            }),
            dimension: EMBEDDING_DIMENSION,
        })
    }

    /// Open the SQLite identity database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let repository = SqliteIdentityRepository::open(path)?;
        Self::with_repository(Box::new(repository))
    }

    /// Embedding length every record must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| {
            log::warn!("IdentityStore lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Register a new identity and return its id.
    pub fn insert(&self, name: &str, embedding: Vec<f32>, metadata: IdentityMetadata) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SecureVisionError::EmptyName);
        }
        if embedding.len() != self.dimension {
            return Err(SecureVisionError::InvalidEmbedding {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(SecureVisionError::NonFiniteEmbedding);
        }

        let mut state = self.lock();
        let key = name.to_lowercase();
        if state.records.iter().any(|r| r.active && r.name.to_lowercase() == key) {
            return Err(SecureVisionError::DuplicateName(name.to_string()));
        }

        let record = IdentityRecord {
            id: state.next_id,
            name: name.to_string(),
            embedding,
            metadata,
            created_at: Utc::now(),
            last_seen: None,
            match_count: 0,
            active: true,
        };

        if let Some(repo) = state.repository.as_ref() {
            repo.insert(&record)?;
        }

        let id = record.id;
        state.next_id += 1;
        state.records.push(record);
        log::info!("Registered identity '{}' (id {})", name, id);
        Ok(id)
    }

    /// Linear scan over active records keeping the running maximum.
    /// The first record wins on an exact tie.
    pub fn find_best_match(&self, query: &[f32], min_similarity: f32) -> MatchOutcome {
        let state = self.lock();

        let mut best: Option<(&IdentityRecord, f32)> = None;
        for record in state.records.iter().filter(|r| r.active) {
            let score = cosine_similarity(query, &record.embedding);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((record, score));
            }
        }

        match best {
            Some((record, similarity)) if similarity >= min_similarity && similarity > 0.0 => {
                MatchOutcome::Match {
                    id: record.id,
                    name: record.name.clone(),
                    similarity,
                }
            }
            Some((_, similarity)) => MatchOutcome::NoMatch {
                best_similarity: similarity,
            },
            None => MatchOutcome::NoMatch { best_similarity: 0.0 },
        }
    }

    /// Note a successful match: bump the count and stamp last-seen.
    pub fn record_hit(&self, id: i64) -> Result<()> {
        let mut state = self.lock();
        let now = Utc::now();

        let index = state
            .records
            .iter()
            .position(|r| r.id == id && r.active)
            .ok_or(SecureVisionError::IdentityNotFound(id))?;
        let count = state.records[index].match_count + 1;

        // Persist first so a failed write leaves memory untouched
        if let Some(repo) = state.repository.as_ref() {
            repo.update_hit(id, now, count)?;
        }

        let record = &mut state.records[index];
        record.match_count = count;
        record.last_seen = Some(now);
        Ok(())
    }

    /// Soft-delete by name (case-insensitive). Returns false when no active record has it.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut state = self.lock();
        let key = name.trim().to_lowercase();

        let Some(index) = state
            .records
            .iter()
            .position(|r| r.active && r.name.to_lowercase() == key)
        else {
            return Ok(false);
        };

        let id = state.records[index].id;
        if let Some(repo) = state.repository.as_ref() {
            repo.deactivate(id)?;
        }
        state.records[index].active = false;
        log::info!("Removed identity '{}' (id {})", name.trim(), id);
        Ok(true)
    }

    pub fn get(&self, id: i64) -> Option<IdentityRecord> {
        self.lock().records.iter().find(|r| r.id == id && r.active).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<IdentityRecord> {
        let key = name.trim().to_lowercase();
        self.lock()
            .records
            .iter()
            .find(|r| r.active && r.name.to_lowercase() == key)
            .cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// Active names in registration order.
    pub fn list_names(&self) -> Vec<String> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.active)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn list_records(&self) -> Vec<IdentityRecord> {
        self.lock().records.iter().filter(|r| r.active).cloned().collect()
    }

    /// Number of active identities.
    pub fn count(&self) -> usize {
        self.lock().records.iter().filter(|r| r.active).count()
    }
}
