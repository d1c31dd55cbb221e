pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logic;
pub mod model;
pub mod scheduler;
pub mod seed;
pub mod store;
pub mod transport;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use engine::{KnowledgeEngine, Sweep, SweepReport};
pub use error::{EngineError, EngineResult};

// Export logic entry points
pub use logic::{
    collect_by_type, delete_cascade, export_dataset, import_dataset, ChangeSet, EngineContext, ImportOutcome,
    NewDataSet, ReleaseOutcome, VersionInfo,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, Store};

pub use transport::{HttpTransport, Transport};

/// Build the engine described by the configuration: snapshots when a
/// snapshot directory is set, empty in-memory stores otherwise
pub fn build_engine(config: &config::AppConfig) -> anyhow::Result<KnowledgeEngine<MemoryStore>> {
    use std::sync::Arc;

    let registry = config.type_registry()?;
    let server = config.server_context();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.http_timeout())?);

    let engine = match config.snapshot_paths() {
        Some((draft, materialized)) => {
            log::info!("Opening snapshots {} and {}", draft.display(), materialized.display());
            KnowledgeEngine::open(registry, server, &draft, &materialized, transport)?
        }
        None => KnowledgeEngine::new(
            registry,
            server,
            MemoryStore::new("draft"),
            MemoryStore::new("materialized"),
            transport,
        ),
    };
    Ok(engine)
}
