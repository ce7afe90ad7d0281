//! HTTP surface for the memoria vector-memory engine.

use std::path::PathBuf;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoria_core::{
    DeterministicEmbeddingProvider, EngineConfig, HnswParams, IndexedVectorStore,
    InMemoryMetadataStore, PersonaMemoryManager,
};

mod auth;
mod error;
mod handlers;
mod state;
mod types;

use auth::ApiKeyStore;
use state::AppState;
use types::Envelope;

/// memoria server - persona-scoped vector memory for AI agents
#[derive(Parser, Debug)]
#[command(name = "memoria-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "MEMORIA_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "MEMORIA_PORT")]
    port: u16,

    /// Path to the TOML config file
    #[arg(long, default_value = "memoria.toml", env = "MEMORIA_CONFIG")]
    config: PathBuf,
}

async fn health() -> Json<Envelope<&'static str>> {
    Json(Envelope::ok("ok"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = EngineConfig::load(&args.config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{},tower_http=debug", config.log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting memoria server");

    let metadata = Arc::new(InMemoryMetadataStore::new());
    let store = Arc::new(IndexedVectorStore::new(
        config.max_memory_bytes(),
        config.default_dimensions,
        config.distance_metric,
        HnswParams::default(),
        metadata,
    ));
    let embedding = Arc::new(DeterministicEmbeddingProvider::new(config.default_dimensions));
    let personas = Arc::new(PersonaMemoryManager::new(store.clone(), embedding));
    let api_keys = Arc::new(ApiKeyStore::new());

    let state = Arc::new(AppState::new(personas, store, api_keys, config));

    let protected = Router::new()
        .route(
            "/api/personas",
            get(handlers::personas::list).post(handlers::personas::create),
        )
        .route(
            "/api/personas/{id}",
            get(handlers::personas::get)
                .put(handlers::personas::update)
                .delete(handlers::personas::delete),
        )
        .route("/api/personas/{id}/memories", post(handlers::memories::add))
        .route(
            "/api/personas/{id}/memories/search",
            post(handlers::memories::search),
        )
        .route(
            "/api/personas/{id}/conversations",
            post(handlers::memories::add_conversation),
        )
        .route(
            "/api/personas/{id}/conversations/{conversation_id}",
            get(handlers::memories::conversation_history),
        )
        .route("/api/personas/{id}/cleanup", post(handlers::personas::cleanup))
        .route(
            "/api/vectors",
            post(handlers::vectors::add),
        )
        .route("/api/vectors/search", post(handlers::vectors::search))
        .route(
            "/api/vectors/{id}",
            get(handlers::vectors::get)
                .put(handlers::vectors::update)
                .delete(handlers::vectors::delete),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    let app = Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("memoria server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
