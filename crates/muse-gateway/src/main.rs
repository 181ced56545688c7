use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use muse_clock::TimeProvider;
use muse_core::config::MuseConfig;
use muse_gateway::app;
use muse_memory::Stores;
use muse_search::SearchService;
use muse_storage::{DatabaseManager, SessionClockRepository};

#[derive(Parser)]
#[command(name = "muse", about = "Muse roleplay conversation engine")]
struct Cli {
    /// Path to muse.toml (defaults to MUSE_CONFIG or config/muse.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muse=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = MuseConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        MuseConfig::default()
    });

    let db = Arc::new(DatabaseManager::new(&config.database.data_dir)?);
    let clock = Arc::new(TimeProvider::new());
    let search = Arc::new(SearchService::new(&config.meilisearch));
    // Spawns the bundled daemon when [meilisearch].auto_start is set.
    search.start().await;

    // Clocks hydrate lazily from the working database on first reference.
    let loader_repo = SessionClockRepository::new(db.clone(), clock.clone());
    clock.set_loader(Box::new(move |session_id| {
        loader_repo.get_by_session_id(session_id).ok().flatten()
    }));

    let stores = Stores::new(db.clone(), clock.clone(), search.clone());
    let state = Arc::new(app::AppState::new(
        config,
        db,
        clock,
        search.clone(),
        stores,
    ));

    let bind = state.config.gateway.bind.clone();
    let port = state.config.gateway.port;
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Muse gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, router).await;
    // Tear down a daemon we spawned ourselves before reporting any serve error.
    search.stop().await;
    served?;

    Ok(())
}
