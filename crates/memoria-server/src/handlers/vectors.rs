use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::Json;

use memoria_core::{MemoryRecord, PersonaId, SearchFilters, SearchOptions, VectorId};

use crate::auth::{require_permission, ApiKey, Permission};
use crate::error::ApiError;
use crate::handlers::{now_ms, parse_uuid};
use crate::state::AppState;
use crate::types::{AddVectorRequest, Envelope, VectorSearchHit, VectorSearchRequest};

pub async fn add(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Json(req): Json<AddVectorRequest>,
) -> Result<Json<Envelope<String>>, ApiError> {
    require_permission(&api_key, Permission::VectorsWrite)?;
    let persona_id = PersonaId(parse_uuid(&req.persona_id)?);

    let id = VectorId::new();
    let now = now_ms();
    let record = MemoryRecord {
        id,
        persona_id,
        memory_type: req.memory_type,
        importance: req.importance.unwrap_or(0.5),
        timestamp_ms: now,
        original_content: req.content,
        conversation_id: None,
        speaker: None,
        tags: Vec::new(),
        context: None,
        last_accessed_ms: now,
        access_count: 0,
    };

    state.store.add_vector(id, &req.vector, record)?;
    Ok(Json(Envelope::ok(id.to_string())))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Json(req): Json<VectorSearchRequest>,
) -> Result<Json<Envelope<Vec<VectorSearchHit>>>, ApiError> {
    require_permission(&api_key, Permission::VectorsRead)?;

    let persona_id = req
        .persona_id
        .map(|raw| parse_uuid(&raw).map(PersonaId))
        .transpose()?;

    let options = SearchOptions {
        limit: req.limit.unwrap_or(10),
        threshold: req.threshold.unwrap_or(0.0),
        filters: SearchFilters {
            persona_id,
            ..Default::default()
        },
        now_ms: now_ms(),
        ..Default::default()
    };

    let hits = state
        .store
        .search(&req.vector, &options)
        .into_iter()
        .map(|hit| VectorSearchHit {
            id: hit.id.to_string(),
            similarity: hit.similarity,
        })
        .collect();

    Ok(Json(Envelope::ok(hits)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Vec<f32>>>, ApiError> {
    require_permission(&api_key, Permission::VectorsRead)?;
    let id = VectorId(parse_uuid(&id)?);
    let vector = state.store.get_vector(id)?;
    Ok(Json(Envelope::ok(vector)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(id): Path<String>,
    Json(vector): Json<Vec<f32>>,
) -> Result<Json<Envelope<()>>, ApiError> {
    require_permission(&api_key, Permission::VectorsWrite)?;
    let id = VectorId(parse_uuid(&id)?);
    state.store.update_vector(id, &vector)?;
    Ok(Json(Envelope::ok(())))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    require_permission(&api_key, Permission::VectorsWrite)?;
    let id = VectorId(parse_uuid(&id)?);
    state.store.delete_vector(id)?;
    Ok(Json(Envelope::ok(())))
}
