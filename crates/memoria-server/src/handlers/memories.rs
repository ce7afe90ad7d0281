use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;

use memoria_core::{ConversationId, PersonaId, RetrievalOptions};

use crate::auth::{require_permission, ApiKey, Permission};
use crate::error::ApiError;
use crate::handlers::{now_ms, parse_uuid};
use crate::state::AppState;
use crate::types::{
    AddConversationRequest, AddMemoryRequest, ConversationResponse, Envelope, MemoryResponse,
    MemorySearchHit, SearchMemoriesRequest,
};

fn to_response(record: memoria_core::MemoryRecord) -> MemoryResponse {
    MemoryResponse {
        id: record.id.to_string(),
        memory_type: record.memory_type,
        importance: record.importance,
        timestamp_ms: record.timestamp_ms,
        content: record.original_content,
        conversation_id: record.conversation_id.map(|c| c.to_string()),
        speaker: record.speaker,
    }
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
    Json(req): Json<AddMemoryRequest>,
) -> Result<Json<Envelope<MemoryResponse>>, ApiError> {
    require_permission(&api_key, Permission::Write)?;
    let persona_id = PersonaId(parse_uuid(&persona_id)?);

    let record = state.personas.add_memory(
        persona_id,
        &req.content,
        req.memory_type,
        req.importance,
        None,
        None,
        req.context,
        now_ms(),
    )?;

    Ok(Json(Envelope::ok(to_response(record))))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
    Json(req): Json<SearchMemoriesRequest>,
) -> Result<Json<Envelope<Vec<MemorySearchHit>>>, ApiError> {
    require_permission(&api_key, Permission::Read)?;
    let persona_id = PersonaId(parse_uuid(&persona_id)?);

    let options = RetrievalOptions {
        limit: req.limit.unwrap_or(10),
        threshold: req.threshold.unwrap_or(0.0),
        memory_types: req
            .memory_types
            .map(|types| types.into_iter().collect()),
        max_age_ms: req.max_age_ms,
    };

    let ranked = state
        .personas
        .retrieve_relevant_memories(persona_id, &req.query, &options, now_ms())?;

    let hits = ranked
        .into_iter()
        .map(|ranked_memory| MemorySearchHit {
            id: ranked_memory.record.id.to_string(),
            similarity: ranked_memory.similarity,
            final_score: ranked_memory.final_score,
            content: ranked_memory.record.original_content,
            memory_type: ranked_memory.record.memory_type,
            importance: ranked_memory.record.importance,
        })
        .collect();

    Ok(Json(Envelope::ok(hits)))
}

pub async fn add_conversation(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
    Json(req): Json<AddConversationRequest>,
) -> Result<Json<Envelope<ConversationResponse>>, ApiError> {
    require_permission(&api_key, Permission::Write)?;
    let persona_id = PersonaId(parse_uuid(&persona_id)?);
    let conversation_id = req
        .conversation_id
        .map(|raw| parse_uuid(&raw).map(ConversationId))
        .transpose()?;

    let (user_record, assistant_record) = state.personas.add_conversation_exchange(
        persona_id,
        &req.user_message,
        &req.assistant_response,
        conversation_id,
        now_ms(),
    )?;

    Ok(Json(Envelope::ok(ConversationResponse {
        conversation_id: user_record
            .conversation_id
            .expect("add_conversation_exchange always stamps a conversation id")
            .to_string(),
        user_memory_id: user_record.id.to_string(),
        assistant_memory_id: assistant_record.id.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConversationHistoryQuery {
    pub limit: Option<usize>,
}

pub async fn conversation_history(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path((persona_id, conversation_id)): Path<(String, String)>,
    Query(query): Query<ConversationHistoryQuery>,
) -> Result<Json<Envelope<Vec<MemoryResponse>>>, ApiError> {
    require_permission(&api_key, Permission::Read)?;
    let persona_id = PersonaId(parse_uuid(&persona_id)?);
    let conversation_id = ConversationId(parse_uuid(&conversation_id)?);

    let records = state.personas.get_conversation_history(
        persona_id,
        conversation_id,
        query.limit.unwrap_or(100),
    )?;

    Ok(Json(Envelope::ok(
        records.into_iter().map(to_response).collect(),
    )))
}
