use axum::serve;
use knowledge_server::api::routes::create_router;
use knowledge_server::config::AppConfig;
use knowledge_server::{build_engine, scheduler, seed, KnowledgeEngine, MemoryStore};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging; RUST_LOG overrides the default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Knowledge server starting");

    // Load configuration
    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{} uri={}",
        config.server.host,
        config.server.port,
        config.knowledge_server.uri
    );

    let engine = Arc::new(build_engine(&config)?);

    // Load seed data for demonstration (optional)
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("Loading seed data...");
        let summary = seed::load_seed_data(&*engine)?;
        log::info!(
            "Seed data loaded: {} licenses, continents {}, view {}",
            summary.licenses.len(),
            summary.continents.uri,
            summary.large_states.uri
        );
    }

    if config.sweeps.enabled {
        let handles = scheduler::spawn_sweeps(engine.clone(), config.sweep_interval());
        log::info!("Started {} sweeps every {:?}", handles.len(), config.sweep_interval());
    }

    run_server(engine.clone(), &config).await?;

    if let Some((draft, materialized)) = config.snapshot_paths() {
        engine.save_snapshots(&draft, &materialized)?;
    }

    Ok(())
}

async fn run_server(engine: Arc<KnowledgeEngine<MemoryStore>>, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Knowledge server running on http://{}", bind_address);

    serve(listener, create_router().with_state(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;

    Ok(())
}
