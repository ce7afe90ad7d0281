//! Request/response DTOs for the memoria HTTP API. Kept separate from the
//! core's own types so the wire shape can evolve independently (snake_case
//! JSON, string ids) without touching `memoria_core`.

use serde::{Deserialize, Serialize};

use memoria_core::{MemoryType, Speaker};

/// The response envelope every endpoint returns, per spec §6.1.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "success",
            data: Some(data),
            error: None,
            message: None,
            meta: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePersonaRequest {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub max_memory_size: Option<usize>,
    pub memory_decay_time_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdatePersonaRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_memory_size: Option<usize>,
    pub memory_decay_time_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PersonaResponse {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub max_memory_size: usize,
    pub memory_decay_time_ms: u64,
    pub created_at_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddMemoryRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: Option<f32>,
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct MemoryResponse {
    pub id: String,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub timestamp_ms: u64,
    pub content: String,
    pub conversation_id: Option<String>,
    pub speaker: Option<Speaker>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMemoriesRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub memory_types: Option<Vec<MemoryType>>,
    pub max_age_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct MemorySearchHit {
    pub id: String,
    pub similarity: f32,
    pub final_score: f32,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: f32,
}

#[derive(Debug, Deserialize)]
pub struct AddConversationRequest {
    pub user_message: String,
    pub assistant_response: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub user_memory_id: String,
    pub assistant_memory_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupRequest {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddVectorRequest {
    pub vector: Vec<f32>,
    pub persona_id: String,
    pub content: String,
    #[serde(rename = "type", default = "default_memory_type")]
    pub memory_type: MemoryType,
    pub importance: Option<f32>,
}

fn default_memory_type() -> MemoryType {
    MemoryType::Context
}

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub persona_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VectorSearchHit {
    pub id: String,
    pub similarity: f32,
}
