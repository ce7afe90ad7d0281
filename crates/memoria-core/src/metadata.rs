//! The metadata record store: the external collaborator contract from
//! spec §4.6, plus an in-process implementation good enough to run the
//! whole engine without a real database wired in.

use parking_lot::RwLock;

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer::VectorId;
use crate::error::{Error, Result};

/// Opaque identifier for a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonaId(pub Uuid);

impl PersonaId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PersonaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every memory belonging to one conversation turn pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type tag on a memory record. Must match exactly between persona
/// memory records and search filters — spec §9 flags this as a place where
/// the two sides of the boundary must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Conversation,
    Fact,
    Preference,
    Context,
    System,
}

/// Who produced a `conversation`-typed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// A single stored memory, addressed by the `VectorId` of its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: VectorId,
    pub persona_id: PersonaId,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub timestamp_ms: u64,
    pub original_content: String,
    pub conversation_id: Option<ConversationId>,
    pub speaker: Option<Speaker>,
    pub tags: Vec<String>,
    pub context: Option<serde_json::Value>,
    /// Timestamp of the most recent retrieval hit, used by the eviction
    /// score's recent-access term. Equals `timestamp_ms` until first access.
    pub last_accessed_ms: u64,
    /// Number of times this memory has surfaced in a search result,
    /// capped at 10 when used for importance scoring (spec §4.5).
    pub access_count: u32,
}

/// Filters accepted by `list_by_persona`.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    pub memory_types: Option<FxHashSet<MemoryType>>,
    pub conversation_id: Option<ConversationId>,
    /// Inclusive lower/upper bound on `timestamp_ms`.
    pub age_window_ms: Option<(u64, u64)>,
}

/// Sparse partial update applied by `update`. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub importance: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub context: Option<serde_json::Value>,
    pub last_accessed_ms: Option<u64>,
    pub access_count: Option<u32>,
}

/// The contract spec §4.6 assigns to the metadata store: durable,
/// single-record-atomic, no multi-record transactions.
pub trait MetadataStore: Send + Sync {
    /// Stores `record`, keyed by its own `id`.
    ///
    /// # Errors
    /// Implementations may surface `Dependency` on a backing-store failure.
    fn put(&self, record: MemoryRecord) -> Result<()>;

    /// Fetches the record for `id`.
    ///
    /// # Errors
    /// Returns `NotFound` if no record exists for `id`.
    fn get(&self, id: VectorId) -> Result<MemoryRecord>;

    /// Removes the record for `id`.
    ///
    /// # Errors
    /// Returns `NotFound` if no record exists for `id`.
    fn delete(&self, id: VectorId) -> Result<()>;

    /// Lists records for `persona_id` matching `filters`, newest-first,
    /// truncated to `limit`.
    ///
    /// # Errors
    /// May surface `Dependency` on a backing-store failure.
    fn list_by_persona(
        &self,
        persona_id: PersonaId,
        filters: &MemoryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Applies a sparse update to the record for `id`.
    ///
    /// # Errors
    /// Returns `NotFound` if no record exists for `id`.
    fn update(&self, id: VectorId, update: MemoryUpdate) -> Result<()>;

    /// Counts records currently stored for `persona_id`.
    ///
    /// # Errors
    /// May surface `Dependency` on a backing-store failure.
    fn count_active(&self, persona_id: PersonaId) -> Result<usize>;

    /// Removes every record for `persona_id`, returning their ids so the
    /// caller can free the corresponding buffer slots and index nodes.
    ///
    /// # Errors
    /// May surface `Dependency` on a backing-store failure.
    fn delete_persona(&self, persona_id: PersonaId) -> Result<Vec<VectorId>>;
}

/// An in-process, thread-safe `MetadataStore`. Not durable across restarts;
/// callers who need durability provide their own `MetadataStore`
/// implementation backed by a real database.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: DashMap<VectorId, MemoryRecord>,
    by_persona: DashMap<PersonaId, RwLock<FxHashSet<VectorId>>>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn put(&self, record: MemoryRecord) -> Result<()> {
        let persona_id = record.persona_id;
        let id = record.id;
        self.records.insert(id, record);
        self.by_persona
            .entry(persona_id)
            .or_insert_with(|| RwLock::new(FxHashSet::default()))
            .write()
            .insert(id);
        Ok(())
    }

    fn get(&self, id: VectorId) -> Result<MemoryRecord> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(format!("memory record {id}")))
    }

    fn delete(&self, id: VectorId) -> Result<()> {
        let (_, record) = self
            .records
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("memory record {id}")))?;
        if let Some(set) = self.by_persona.get(&record.persona_id) {
            set.write().remove(&id);
        }
        Ok(())
    }

    fn list_by_persona(
        &self,
        persona_id: PersonaId,
        filters: &MemoryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let Some(ids) = self.by_persona.get(&persona_id) else {
            return Ok(Vec::new());
        };
        let ids: Vec<VectorId> = ids.read().iter().copied().collect();

        let mut records: Vec<MemoryRecord> = ids
            .into_iter()
            .filter_map(|id| self.records.get(&id).map(|r| r.clone()))
            .filter(|r| {
                if let Some(types) = &filters.memory_types {
                    if !types.contains(&r.memory_type) {
                        return false;
                    }
                }
                if let Some(conv) = filters.conversation_id {
                    if r.conversation_id != Some(conv) {
                        return false;
                    }
                }
                if let Some((lo, hi)) = filters.age_window_ms {
                    if r.timestamp_ms < lo || r.timestamp_ms > hi {
                        return false;
                    }
                }
                true
            })
            .collect();

        records.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        records.truncate(limit);
        Ok(records)
    }

    fn update(&self, id: VectorId, update: MemoryUpdate) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("memory record {id}")))?;
        if let Some(importance) = update.importance {
            entry.importance = importance;
        }
        if let Some(tags) = update.tags {
            entry.tags = tags;
        }
        if let Some(context) = update.context {
            entry.context = Some(context);
        }
        if let Some(last_accessed_ms) = update.last_accessed_ms {
            entry.last_accessed_ms = last_accessed_ms;
        }
        if let Some(access_count) = update.access_count {
            entry.access_count = access_count;
        }
        Ok(())
    }

    fn count_active(&self, persona_id: PersonaId) -> Result<usize> {
        Ok(self
            .by_persona
            .get(&persona_id)
            .map_or(0, |set| set.read().len()))
    }

    fn delete_persona(&self, persona_id: PersonaId) -> Result<Vec<VectorId>> {
        let Some((_, set)) = self.by_persona.remove(&persona_id) else {
            return Ok(Vec::new());
        };
        let ids: Vec<VectorId> = set.into_inner().into_iter().collect();
        for id in &ids {
            self.records.remove(id);
        }
        Ok(ids)
    }
}
