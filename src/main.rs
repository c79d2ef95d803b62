use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use coinharvest::config::{load_exchange_definitions, AppConfig};
use coinharvest::controls::StopSignal;
use coinharvest::exchange::ExchangeAdapter;
use coinharvest::interfaces::Storage;
use coinharvest::observability::metrics::register_metrics;
use coinharvest::observability::tracing::init_tracing;
use coinharvest::scheduler::Scheduler;
use coinharvest::storage::{JsonLinesStorage, MemoryStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("COINHARVEST_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env).context("loading configuration")?;

    init_tracing(&config.logging);
    register_metrics();
    info!("Starting coinharvest ({})", env);

    let storage: Arc<dyn Storage> = match &config.storage.path {
        Some(path) => Arc::new(
            JsonLinesStorage::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Arc::new(MemoryStorage::new()),
    };

    let definitions = load_exchange_definitions(&config.exchanges_dir)
        .with_context(|| format!("loading exchanges from {}", config.exchanges_dir.display()))?;
    let adapters: Vec<ExchangeAdapter> = definitions
        .iter()
        .filter_map(|definition| match ExchangeAdapter::new(definition) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                error!("Skipping exchange {}: {}", definition.name, e);
                None
            }
        })
        .collect();
    if adapters.is_empty() {
        anyhow::bail!("no usable exchange definition in {}", config.exchanges_dir.display());
    }

    let scheduler = Arc::new(Scheduler::new(adapters, storage, config.scheduler.clone()));
    let jobs = scheduler.build_jobs(&config.jobs);

    let stop = StopSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.stop("ctrl-c received");
        }
    });

    scheduler.run_until_stopped(jobs, stop).await?;
    info!("Shutdown complete");
    Ok(())
}
