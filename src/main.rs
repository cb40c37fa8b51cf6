//! Watchpost - metric alerting service.

use watchpost::config::{Mode, ServerConfig};
use watchpost::db::Store;
use watchpost::registry::Catalog;
use watchpost::scheduler::{Evaluator, LogNotifier};
use watchpost::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("watchpost=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    let modes: Vec<&str> = cfg.modes.iter().map(|m| m.as_str()).collect();
    tracing::info!("Starting watchpost in mode {}", modes.join(","));
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if cfg.runs(Mode::InitDb) {
        return Ok(());
    }

    let catalog = Arc::new(Catalog::builtin()?);

    let (stop_tx, _) = tokio::sync::broadcast::channel(1);
    let daemon = if cfg.runs(Mode::Daemon) {
        let evaluator = Evaluator::new(store.clone(), catalog.clone(), Arc::new(LogNotifier));
        Some(evaluator.start(cfg.eval_interval(), stop_tx.subscribe()))
    } else {
        None
    };

    if cfg.runs(Mode::Web) {
        let server = Server::new(cfg, store, catalog);
        server.start().await?;
    } else {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
    }

    let _ = stop_tx.send(());
    if let Some(daemon) = daemon {
        daemon.await?;
    }

    Ok(())
}
