//! Directory synchronization manager
//!
//! The manager keeps a registry of source-to-target directory pairs and copies every file of
//! an added source directory to its target, one [`task::Task`] per file:
//!
//! - [`control`] - reads `add` / `cancel` / `shutdown` from the command source
//! - [`dispatcher`] - lists source directories and queues or cancels tasks
//! - [`registry`] - the pairs, in a chained hash map with prime-sized growth
//! - [`queue`] - bounded FIFO shared by the dispatcher and the workers
//! - [`worker`] - fixed pool of tasks that stream files between agents
//! - [`result_log`] - one record per transfer leg
//!
//! # Shutdown
//!
//! `shutdown` queues one stop entry per worker behind the pending tasks, waits until the
//! queue is empty and every worker has exited, and only then reports completion. Cancelled
//! pairs never produce records for tasks that were still queued.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::instrument;

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod result_log;
pub mod task;
pub mod worker;

pub use config::ManagerConfig;
pub use worker::Summary;

/// Runs the manager on an already bound control `listener` until a command source sends
/// `shutdown`.
#[instrument(skip_all)]
pub async fn run(config: ManagerConfig, listener: tokio::net::TcpListener) -> Result<Summary> {
    config
        .validate()
        .map_err(|error| anyhow::anyhow!(error))
        .context("invalid configuration")?;
    let log = Arc::new(result_log::ResultLog::create(&config.result_log).await?);
    let queue = Arc::new(queue::TaskQueue::new(config.queue_capacity));
    let stats = Arc::new(worker::TransferStats::default());
    let workers = worker::WorkerPool::spawn(config.workers, &queue, &log, config.transfer, &stats);
    tracing::info!(
        "started {} workers, queue capacity {}",
        workers.len(),
        queue.capacity()
    );
    let mut dispatcher = dispatcher::Dispatcher::new(queue, log, workers);
    if let Some(path) = &config.config_file {
        for (source, target) in config::load_pairs(path).await? {
            let ack = dispatcher.handle_add(&source, &target).await;
            tracing::info!("{ack}");
        }
    }
    tracing::info!(
        "waiting for commands on {}",
        listener.local_addr().context("control listener has no address")?
    );
    control::serve(listener, dispatcher).await?;
    Ok(stats.summary())
}
