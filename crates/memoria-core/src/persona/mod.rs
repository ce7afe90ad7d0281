//! `PersonaMemoryManager` — persona-scoped lifecycle over an
//! `IndexedVectorStore`: capacity enforcement, decay cleanup, and the final
//! ranking score fusion. See spec §4.5.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::metadata::{
    ConversationId, MemoryFilters, MemoryRecord, MemoryType, MemoryUpdate, PersonaId, Speaker,
};
use crate::store::{IndexedVectorStore, SearchFilters, SearchOptions};

const MIN_MAX_MEMORY_SIZE: usize = 10;
const MAX_MAX_MEMORY_SIZE: usize = 10_000;
const MIN_DECAY_MS: u64 = 60_000; // 1 minute
const MAX_DECAY_MS: u64 = 365 * 24 * 3_600_000; // 1 year
const DEFAULT_RETENTION_THRESHOLD: f32 = 0.7;
const RECENCY_HALF_LIFE_HOURS: f64 = 7.0 * 24.0;

/// Per-persona policy: capacity and decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Hard cap on active memories; must be in `[10, 10000]`.
    pub max_memory_size: usize,
    /// Age in milliseconds after which a low-importance memory becomes
    /// eligible for decay cleanup; must be in `[1 minute, 1 year]`.
    pub memory_decay_time_ms: u64,
    /// Optional system prompt used as contextual-relevance grounding by
    /// importance scoring (stubbed to 0.5 when absent; see §4.5).
    pub system_prompt: Option<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            max_memory_size: 1000,
            memory_decay_time_ms: 30 * 24 * 3_600_000,
            system_prompt: None,
        }
    }
}

/// A named container of memories with its own capacity and decay policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub config: PersonaConfig,
    pub created_at_ms: u64,
}

/// Options for `retrieve_relevant_memories`.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub limit: usize,
    pub threshold: f32,
    pub memory_types: Option<rustc_hash::FxHashSet<MemoryType>>,
    pub max_age_ms: Option<u64>,
}

/// A retrieved memory with both its raw similarity and its final fused
/// ranking score (spec §4.5).
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub record: MemoryRecord,
    pub similarity: f32,
    pub final_score: f32,
}

fn recency_factor(age_hours: f64) -> f32 {
    let lambda = std::f64::consts::LN_2 / RECENCY_HALF_LIFE_HOURS;
    (-lambda * age_hours).exp() as f32
}

/// Weighted default importance for a just-created memory with no caller-
/// supplied value: recency is maximal (it was just created), frequency is
/// zero (never yet accessed), and emotional/contextual signals are stubbed
/// to neutral per spec §4.5 when no analyzer is wired in.
fn default_importance() -> f32 {
    const RECENCY: f32 = 1.0;
    const FREQUENCY: f32 = 0.0;
    const EMOTIONAL: f32 = 0.5;
    const CONTEXTUAL: f32 = 0.5;
    0.3 * RECENCY + 0.3 * FREQUENCY + 0.2 * EMOTIONAL + 0.2 * CONTEXTUAL
}

fn eviction_score(record: &MemoryRecord, decay_time_ms: u64, now_ms: u64) -> f32 {
    let age_ms = now_ms.saturating_sub(record.timestamp_ms);
    let age_fraction = (age_ms as f64 / decay_time_ms.max(1) as f64).min(1.0) as f32;

    let since_access_ms = now_ms.saturating_sub(record.last_accessed_ms);
    let recent_access_factor = recency_factor(since_access_ms as f64 / 3_600_000.0);

    0.5 * (1.0 - record.importance) + 0.3 * age_fraction + 0.2 * (1.0 - recent_access_factor)
}

/// Maps persona-scoped operations onto an `IndexedVectorStore`: memory
/// creation/retrieval, conversation threading, capacity enforcement, and
/// decay-based cleanup.
pub struct PersonaMemoryManager {
    store: Arc<IndexedVectorStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    personas: DashMap<PersonaId, Persona>,
}

impl PersonaMemoryManager {
    /// Builds a manager over `store`, embedding text via `embedding`.
    #[must_use]
    pub fn new(store: Arc<IndexedVectorStore>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedding,
            personas: DashMap::new(),
        }
    }

    /// Registers a new persona.
    ///
    /// # Errors
    /// Returns `Validation` if `config.max_memory_size` or
    /// `config.memory_decay_time_ms` fall outside their allowed ranges.
    pub fn create_persona(
        &self,
        owner: impl Into<String>,
        name: impl Into<String>,
        config: PersonaConfig,
        now_ms: u64,
    ) -> Result<Persona> {
        if !(MIN_MAX_MEMORY_SIZE..=MAX_MAX_MEMORY_SIZE).contains(&config.max_memory_size) {
            return Err(Error::Validation(format!(
                "max_memory_size must be in [{MIN_MAX_MEMORY_SIZE}, {MAX_MAX_MEMORY_SIZE}], got {}",
                config.max_memory_size
            )));
        }
        if !(MIN_DECAY_MS..=MAX_DECAY_MS).contains(&config.memory_decay_time_ms) {
            return Err(Error::Validation(format!(
                "memory_decay_time_ms must be in [{MIN_DECAY_MS}, {MAX_DECAY_MS}], got {}",
                config.memory_decay_time_ms
            )));
        }

        let persona = Persona {
            id: PersonaId::new(),
            owner: owner.into(),
            name: name.into(),
            description: None,
            config,
            created_at_ms: now_ms,
        };
        self.personas.insert(persona.id, persona.clone());
        Ok(persona)
    }

    /// Fetches a registered persona.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered.
    pub fn get_persona(&self, persona_id: PersonaId) -> Result<Persona> {
        self.personas
            .get(&persona_id)
            .map(|p| p.clone())
            .ok_or_else(|| Error::NotFound(format!("persona {persona_id}")))
    }

    /// Lists every registered persona.
    #[must_use]
    pub fn list_personas(&self) -> Vec<Persona> {
        self.personas.iter().map(|e| e.value().clone()).collect()
    }

    /// Applies a sparse update to a persona's name, description, or config.
    /// `None` fields are left untouched; a supplied `config` is still
    /// validated against the same range checks as `create_persona`.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered, or
    /// `Validation` if a supplied `config` falls outside its allowed range.
    pub fn update_persona(
        &self,
        persona_id: PersonaId,
        name: Option<String>,
        description: Option<String>,
        config: Option<PersonaConfig>,
    ) -> Result<Persona> {
        if let Some(config) = &config {
            if !(MIN_MAX_MEMORY_SIZE..=MAX_MAX_MEMORY_SIZE).contains(&config.max_memory_size) {
                return Err(Error::Validation(format!(
                    "max_memory_size must be in [{MIN_MAX_MEMORY_SIZE}, {MAX_MAX_MEMORY_SIZE}], got {}",
                    config.max_memory_size
                )));
            }
            if !(MIN_DECAY_MS..=MAX_DECAY_MS).contains(&config.memory_decay_time_ms) {
                return Err(Error::Validation(format!(
                    "memory_decay_time_ms must be in [{MIN_DECAY_MS}, {MAX_DECAY_MS}], got {}",
                    config.memory_decay_time_ms
                )));
            }
        }

        let mut entry = self
            .personas
            .get_mut(&persona_id)
            .ok_or_else(|| Error::NotFound(format!("persona {persona_id}")))?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(description) = description {
            entry.description = Some(description);
        }
        if let Some(config) = config {
            entry.config = config;
        }
        Ok(entry.clone())
    }

    /// Deletes a persona and cascades to every memory it owns, freeing
    /// their buffer slots, index nodes, and metadata records.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered.
    pub fn delete_persona(&self, persona_id: PersonaId) -> Result<()> {
        self.personas
            .remove(&persona_id)
            .ok_or_else(|| Error::NotFound(format!("persona {persona_id}")))?;

        let records = self
            .store
            .metadata()
            .list_by_persona(persona_id, &MemoryFilters::default(), usize::MAX)?;
        for record in records {
            self.store.delete_vector(record.id)?;
        }
        Ok(())
    }

    /// Adds a memory: embeds `content`, inserts it into the store, then
    /// enforces the persona's capacity if it is now over cap.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered, or whatever
    /// the embedding call or store insert surfaces.
    #[allow(clippy::too_many_arguments)]
    pub fn add_memory(
        &self,
        persona_id: PersonaId,
        content: &str,
        memory_type: MemoryType,
        importance: Option<f32>,
        conversation_id: Option<ConversationId>,
        speaker: Option<Speaker>,
        context: Option<serde_json::Value>,
        now_ms: u64,
    ) -> Result<MemoryRecord> {
        let persona = self.get_persona(persona_id)?;

        let vector = self.embedding.embed(content)?;
        let id = crate::buffer::VectorId::new();
        let record = MemoryRecord {
            id,
            persona_id,
            memory_type,
            importance: importance.unwrap_or_else(default_importance),
            timestamp_ms: now_ms,
            original_content: content.to_string(),
            conversation_id,
            speaker,
            tags: Vec::new(),
            context,
            last_accessed_ms: now_ms,
            access_count: 0,
        };

        self.store.add_vector(id, &vector, record.clone())?;

        let active = self.store.metadata().count_active(persona_id)?;
        if active > persona.config.max_memory_size {
            self.enforce_memory_limits(persona_id, now_ms)?;
        }
        Ok(record)
    }

    /// Adds a linked pair of `conversation`-typed memories for one exchange.
    /// If the assistant-message insert fails, the user-message insert is
    /// rolled back so the pair is all-or-nothing.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered, or whatever
    /// the embedding call or store insert surfaces.
    pub fn add_conversation_exchange(
        &self,
        persona_id: PersonaId,
        user_message: &str,
        assistant_message: &str,
        conversation_id: Option<ConversationId>,
        now_ms: u64,
    ) -> Result<(MemoryRecord, MemoryRecord)> {
        let conversation_id = conversation_id.unwrap_or_default();

        let user_record = self.add_memory(
            persona_id,
            user_message,
            MemoryType::Conversation,
            None,
            Some(conversation_id),
            Some(Speaker::User),
            None,
            now_ms,
        )?;

        let assistant_record = match self.add_memory(
            persona_id,
            assistant_message,
            MemoryType::Conversation,
            None,
            Some(conversation_id),
            Some(Speaker::Assistant),
            None,
            now_ms,
        ) {
            Ok(record) => record,
            Err(err) => {
                let _ = self.store.delete_vector(user_record.id);
                return Err(err);
            }
        };

        Ok((user_record, assistant_record))
    }

    /// Retrieves the memories most relevant to `query`, embedding it, over-
    /// fetching `2 * options.limit` candidates from the store, then sorting
    /// by the final fused score and truncating to `options.limit`.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered, or whatever
    /// the embedding call surfaces.
    pub fn retrieve_relevant_memories(
        &self,
        persona_id: PersonaId,
        query: &str,
        options: &RetrievalOptions,
        now_ms: u64,
    ) -> Result<Vec<RankedMemory>> {
        self.get_persona(persona_id)?;
        let query_vector = self.embedding.embed(query)?;

        let search_options = SearchOptions {
            limit: options.limit * 2,
            threshold: options.threshold,
            ef: None,
            metric: None,
            filters: SearchFilters {
                persona_id: Some(persona_id),
                memory_types: options.memory_types.clone(),
                max_age_ms: options.max_age_ms,
            },
            include_values: false,
            include_metadata: true,
            now_ms,
        };

        let hits = self.store.search(&query_vector, &search_options);

        let mut ranked: Vec<RankedMemory> = hits
            .into_iter()
            .filter_map(|hit| {
                let record = hit.metadata?;
                let age_hours = now_ms.saturating_sub(record.timestamp_ms) as f64 / 3_600_000.0;
                let final_score =
                    hit.similarity + 0.10 * record.importance + 0.05 * recency_factor(age_hours);
                Some(RankedMemory {
                    record,
                    similarity: hit.similarity,
                    final_score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked.truncate(options.limit);

        for ranked_memory in &ranked {
            let _ = self.store.metadata().update(
                ranked_memory.record.id,
                MemoryUpdate {
                    last_accessed_ms: Some(now_ms),
                    access_count: Some(ranked_memory.record.access_count + 1),
                    ..Default::default()
                },
            );
        }

        Ok(ranked)
    }

    /// Fetches every memory in a conversation thread, oldest first.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered.
    pub fn get_conversation_history(
        &self,
        persona_id: PersonaId,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        self.get_persona(persona_id)?;
        let filters = MemoryFilters {
            conversation_id: Some(conversation_id),
            ..Default::default()
        };
        let mut records = self
            .store
            .metadata()
            .list_by_persona(persona_id, &filters, usize::MAX)?;
        records.sort_by_key(|r| r.timestamp_ms);
        records.truncate(limit);
        Ok(records)
    }

    /// If `persona_id` is over its configured cap, deletes the
    /// lowest-value memories (highest eviction score) until back within
    /// cap.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered.
    pub fn enforce_memory_limits(&self, persona_id: PersonaId, now_ms: u64) -> Result<()> {
        let persona = self.get_persona(persona_id)?;
        let records = self
            .store
            .metadata()
            .list_by_persona(persona_id, &MemoryFilters::default(), usize::MAX)?;

        if records.len() <= persona.config.max_memory_size {
            return Ok(());
        }
        let excess = records.len() - persona.config.max_memory_size;
        tracing::info!(
            "persona {persona_id}: over capacity ({} > {}), evicting {excess}",
            records.len(),
            persona.config.max_memory_size
        );

        let mut scored: Vec<(crate::buffer::VectorId, f32)> = records
            .iter()
            .map(|r| (r.id, eviction_score(r, persona.config.memory_decay_time_ms, now_ms)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0 .0.cmp(&b.0 .0)));

        for (id, _) in scored.into_iter().take(excess) {
            self.store.delete_vector(id)?;
        }
        tracing::debug!("persona {persona_id}: eviction complete");
        Ok(())
    }

    /// Deletes memories belonging to one persona whose age exceeds its
    /// decay time and whose importance is below the retention threshold.
    /// When `dry_run` is `true`, counts matching memories without deleting
    /// them. Returns the number of memories removed (or that would be).
    ///
    /// This sweep is decomposed per-record so callers can interleave with
    /// it (spec §5); `deadline` bounds how long a single call may run. Each
    /// delete below is already a complete, independent operation, so a
    /// deadline mid-sweep has nothing to roll back: the memories removed so
    /// far stay removed, and a `Timeout` error simply means the caller
    /// should call again to pick up where this sweep left off.
    ///
    /// # Errors
    /// Returns `NotFound` if `persona_id` is not registered, `Timeout` if
    /// `deadline` elapses before the sweep finishes, or propagates whatever
    /// the underlying metadata store or store delete surfaces.
    pub fn cleanup_persona_expired_memories(
        &self,
        persona_id: PersonaId,
        now_ms: u64,
        dry_run: bool,
        deadline: Deadline,
    ) -> Result<usize> {
        let persona = self.get_persona(persona_id)?;
        let records = self
            .store
            .metadata()
            .list_by_persona(persona_id, &MemoryFilters::default(), usize::MAX)?;

        let mut removed = 0usize;
        for record in records {
            deadline.check()?;
            let age_ms = now_ms.saturating_sub(record.timestamp_ms);
            if age_ms > persona.config.memory_decay_time_ms
                && record.importance < DEFAULT_RETENTION_THRESHOLD
            {
                if !dry_run {
                    self.store.delete_vector(record.id)?;
                }
                removed += 1;
            }
        }
        tracing::debug!(
            "persona {persona_id}: decay cleanup removed {removed} memories (dry_run={dry_run})"
        );
        Ok(removed)
    }

    /// Deletes memories across every persona whose age exceeds that
    /// persona's decay time and whose importance is below the retention
    /// threshold. Returns the number of memories removed. See
    /// `cleanup_persona_expired_memories` for why a mid-sweep timeout needs
    /// no rollback.
    ///
    /// # Errors
    /// Returns `Timeout` if `deadline` elapses before the sweep finishes, or
    /// propagates whatever the underlying metadata store or store delete
    /// surfaces.
    pub fn cleanup_expired_memories(&self, now_ms: u64, deadline: Deadline) -> Result<usize> {
        let mut removed = 0usize;
        let personas: Vec<Persona> = self.personas.iter().map(|e| e.value().clone()).collect();

        for persona in personas {
            let records = self.store.metadata().list_by_persona(
                persona.id,
                &MemoryFilters::default(),
                usize::MAX,
            )?;
            for record in records {
                deadline.check()?;
                let age_ms = now_ms.saturating_sub(record.timestamp_ms);
                if age_ms > persona.config.memory_decay_time_ms
                    && record.importance < DEFAULT_RETENTION_THRESHOLD
                {
                    self.store.delete_vector(record.id)?;
                    removed += 1;
                }
            }
        }
        tracing::debug!("decay cleanup across all personas removed {removed} memories");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::embedding::DeterministicEmbeddingProvider;
    use crate::index::HnswParams;
    use crate::metadata::InMemoryMetadataStore;

    const DIM: usize = 16;

    fn new_manager() -> PersonaMemoryManager {
        let mut params = HnswParams::new(8, 64, 32);
        params.index_threshold = 0;
        let store = Arc::new(IndexedVectorStore::new(
            256 * DIM * 4,
            DIM,
            DistanceMetric::Cosine,
            params,
            Arc::new(InMemoryMetadataStore::new()),
        ));
        let embedding = Arc::new(DeterministicEmbeddingProvider::new(DIM));
        PersonaMemoryManager::new(store, embedding)
    }

    #[test]
    fn rejects_out_of_range_persona_config() {
        let manager = new_manager();
        let err = manager
            .create_persona(
                "owner",
                "p",
                PersonaConfig {
                    max_memory_size: 3,
                    ..Default::default()
                },
                0,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn cap_enforcement_keeps_highest_importance_memories() {
        let manager = new_manager();
        let persona = manager
            .create_persona(
                "owner",
                "p",
                PersonaConfig {
                    max_memory_size: 10,
                    ..Default::default()
                },
                0,
            )
            .unwrap();

        // max_memory_size must be >= 10, so pad with neutral filler before
        // the four importance-tagged memories from the spec's scenario.
        for i in 0..6 {
            manager
                .add_memory(
                    persona.id,
                    &format!("filler {i}"),
                    MemoryType::Fact,
                    Some(0.4),
                    None,
                    None,
                    None,
                    0,
                )
                .unwrap();
        }

        for importance in [0.9, 0.1, 0.5, 0.8] {
            manager
                .add_memory(
                    persona.id,
                    &format!("memory {importance}"),
                    MemoryType::Fact,
                    Some(importance),
                    None,
                    None,
                    None,
                    0,
                )
                .unwrap();
        }

        let active = manager.store.metadata().count_active(persona.id).unwrap();
        assert_eq!(active, 10);

        let records = manager
            .store
            .metadata()
            .list_by_persona(persona.id, &MemoryFilters::default(), usize::MAX)
            .unwrap();
        let lowest_survivor = records.iter().map(|r| r.importance).fold(f32::MAX, f32::min);
        assert!(lowest_survivor >= 0.1 - f32::EPSILON);
        // the 0.1-importance memory should have been evicted first
        assert!(!records.iter().any(|r| (r.importance - 0.1).abs() < 1e-6));
    }

    #[test]
    fn decay_cleanup_respects_perpetual_tier() {
        let manager = new_manager();
        let persona = manager
            .create_persona(
                "owner",
                "p",
                PersonaConfig {
                    max_memory_size: 100,
                    memory_decay_time_ms: 3_600_000,
                    system_prompt: None,
                },
                0,
            )
            .unwrap();

        let low = manager
            .add_memory(persona.id, "low importance", MemoryType::Fact, Some(0.3), None, None, None, 0)
            .unwrap();
        let high = manager
            .add_memory(persona.id, "high importance", MemoryType::Fact, Some(0.9), None, None, None, 0)
            .unwrap();

        let two_hours = 2 * 3_600_000;
        manager.cleanup_expired_memories(two_hours, Deadline::none()).unwrap();

        assert!(manager.store.metadata().get(low.id).is_err());
        assert!(manager.store.metadata().get(high.id).is_ok());
    }

    #[test]
    fn cleanup_reports_timeout_once_deadline_elapses() {
        let manager = new_manager();
        let persona = manager
            .create_persona(
                "owner",
                "p",
                PersonaConfig {
                    max_memory_size: 100,
                    memory_decay_time_ms: 1,
                    system_prompt: None,
                },
                0,
            )
            .unwrap();

        for i in 0..5 {
            manager
                .add_memory(
                    persona.id,
                    &format!("memory {i}"),
                    MemoryType::Fact,
                    Some(0.1),
                    None,
                    None,
                    None,
                    0,
                )
                .unwrap();
        }

        let already_expired = Deadline::after(std::time::Duration::from_millis(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = manager
            .cleanup_persona_expired_memories(persona.id, 1_000_000, false, already_expired)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn conversation_exchange_round_trips() {
        let manager = new_manager();
        let persona = manager.create_persona("owner", "p", PersonaConfig::default(), 0).unwrap();

        let (user, assistant) = manager
            .add_conversation_exchange(persona.id, "hello", "hi there", None, 0)
            .unwrap();

        assert_eq!(user.conversation_id, assistant.conversation_id);
        let history = manager
            .get_conversation_history(persona.id, user.conversation_id.unwrap(), 10)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Some(Speaker::User));
        assert_eq!(history[1].speaker, Some(Speaker::Assistant));
        assert_eq!(history[0].original_content, "hello");
        assert_eq!(history[1].original_content, "hi there");
    }
}
