//! Shared application state handed to every axum handler.

use std::sync::Arc;

use memoria_core::{EngineConfig, IndexedVectorStore, PersonaMemoryManager};

use crate::auth::ApiKeyStore;

pub struct AppState {
    pub personas: Arc<PersonaMemoryManager>,
    pub store: Arc<IndexedVectorStore>,
    pub api_keys: Arc<ApiKeyStore>,
    pub config: EngineConfig,
}

impl AppState {
    #[must_use]
    pub fn new(
        personas: Arc<PersonaMemoryManager>,
        store: Arc<IndexedVectorStore>,
        api_keys: Arc<ApiKeyStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            personas,
            store,
            api_keys,
            config,
        }
    }
}
