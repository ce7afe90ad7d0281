use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::Json;

use memoria_core::PersonaConfig;

use crate::auth::{require_permission, ApiKey, Permission};
use crate::error::ApiError;
use crate::handlers::{now_ms, parse_uuid};
use crate::state::AppState;
use crate::types::{
    CleanupRequest, CleanupResponse, CreatePersonaRequest, Envelope, PersonaResponse,
    UpdatePersonaRequest,
};

fn to_response(persona: memoria_core::Persona) -> PersonaResponse {
    PersonaResponse {
        id: persona.id.to_string(),
        owner: persona.owner,
        name: persona.name,
        description: persona.description,
        max_memory_size: persona.config.max_memory_size,
        memory_decay_time_ms: persona.config.memory_decay_time_ms,
        created_at_ms: persona.created_at_ms,
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Json(req): Json<CreatePersonaRequest>,
) -> Result<Json<Envelope<PersonaResponse>>, ApiError> {
    require_permission(&api_key, Permission::PersonasWrite)?;

    let config = PersonaConfig {
        max_memory_size: req.max_memory_size.unwrap_or(1000),
        memory_decay_time_ms: req.memory_decay_time_ms.unwrap_or(30 * 24 * 3_600_000),
        system_prompt: req.system_prompt,
    };
    let persona = state
        .personas
        .create_persona(api_key.name.clone(), req.name, config, now_ms())?;

    Ok(Json(Envelope::ok(to_response(persona))))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
) -> Result<Json<Envelope<PersonaResponse>>, ApiError> {
    require_permission(&api_key, Permission::PersonasRead)?;
    let persona_id = memoria_core::PersonaId(parse_uuid(&persona_id)?);
    let persona = state.personas.get_persona(persona_id)?;
    Ok(Json(Envelope::ok(to_response(persona))))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
) -> Result<Json<Envelope<Vec<PersonaResponse>>>, ApiError> {
    require_permission(&api_key, Permission::PersonasRead)?;
    let personas = state.personas.list_personas().into_iter().map(to_response).collect();
    Ok(Json(Envelope::ok(personas)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
    Json(req): Json<UpdatePersonaRequest>,
) -> Result<Json<Envelope<PersonaResponse>>, ApiError> {
    require_permission(&api_key, Permission::PersonasWrite)?;
    let persona_id = memoria_core::PersonaId(parse_uuid(&persona_id)?);

    let config = if req.max_memory_size.is_some() || req.memory_decay_time_ms.is_some() {
        let current = state.personas.get_persona(persona_id)?.config;
        Some(PersonaConfig {
            max_memory_size: req.max_memory_size.unwrap_or(current.max_memory_size),
            memory_decay_time_ms: req.memory_decay_time_ms.unwrap_or(current.memory_decay_time_ms),
            system_prompt: current.system_prompt,
        })
    } else {
        None
    };

    let persona = state
        .personas
        .update_persona(persona_id, req.name, req.description, config)?;
    Ok(Json(Envelope::ok(to_response(persona))))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    require_permission(&api_key, Permission::PersonasWrite)?;
    let persona_id = memoria_core::PersonaId(parse_uuid(&persona_id)?);
    state.personas.delete_persona(persona_id)?;
    Ok(Json(Envelope::ok(())))
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    Extension(api_key): Extension<ApiKey>,
    Path(persona_id): Path<String>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<Envelope<CleanupResponse>>, ApiError> {
    require_permission(&api_key, Permission::PersonasWrite)?;
    let persona_id = memoria_core::PersonaId(parse_uuid(&persona_id)?);
    let removed = state.personas.cleanup_persona_expired_memories(
        persona_id,
        now_ms(),
        req.dry_run,
        memoria_core::Deadline::none(),
    )?;
    Ok(Json(Envelope::ok(CleanupResponse {
        removed,
        dry_run: req.dry_run,
    })))
}
