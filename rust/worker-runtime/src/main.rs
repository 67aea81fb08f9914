use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use worker_runtime::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting worker task execution runtime");

    let config = WorkerConfig::initialize()?;
    info!(
        master_address = %config.master_address,
        worker_exec_threads = config.worker_exec_threads,
        develop_mode = config.develop_mode,
        "configuration loaded"
    );

    let cache = TaskExecutionContextCache::new();
    let pool = WorkerPool::start(config, cache);

    info!(slots = pool.slot_count(), "worker pool started, awaiting task dispatch");

    // Task dispatch (the master-facing RPC/transport layer that calls
    // `pool.submit`) is out of scope here; this keeps the process
    // alive until an operator stops it.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, aborting executor slots");
    pool.shutdown();

    Ok(())
}
