//! Control-side handling of `add`, `cancel` and `shutdown`.
//!
//! The dispatcher is owned by the single control task, so the registry needs no lock of its
//! own; the queue and the result log are shared with the workers.

use common::{Error, PairKey};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::queue::TaskQueue;
use crate::registry::SyncRegistry;
use crate::result_log::ResultLog;
use crate::task::{QueueEntry, Task};
use crate::worker::WorkerPool;

fn stamped(message: &str) -> String {
    format!("[{}] {message}", common::timestamp())
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: SyncRegistry,
    queue: Arc<TaskQueue>,
    log: Arc<ResultLog>,
    workers: WorkerPool,
}

impl Dispatcher {
    pub fn new(queue: Arc<TaskQueue>, log: Arc<ResultLog>, workers: WorkerPool) -> Self {
        Self {
            registry: SyncRegistry::new(),
            queue,
            log,
            workers,
        }
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Lists the source directory and queues one task per file; returns the number queued.
    async fn add_pair(&mut self, source: &PairKey, target: &PairKey) -> common::Result<usize> {
        if self.registry.is_active(source) {
            return Err(Error::AlreadyActive(source.to_string()));
        }
        let source_endpoint = source.decode()?;
        let target_endpoint = target.decode()?;
        let files = remote::list_files(&source_endpoint).await?;
        for file in &files {
            let message = format!("Added file: {}", target_endpoint.file_location(file));
            self.log.record_event(&message).await;
            tracing::info!("{message}");
            self.queue
                .enqueue(QueueEntry::Transfer(Task::new(
                    file.clone(),
                    source.clone(),
                    target.clone(),
                )))
                .await;
        }
        self.registry.upsert(source, target)?;
        Ok(files.len())
    }

    /// Starts synchronizing `source` into `target`; returns the acknowledgement line.
    #[instrument(skip(self), fields(source = %source, target = %target))]
    pub async fn handle_add(&mut self, source: &PairKey, target: &PairKey) -> String {
        match self.add_pair(source, target).await {
            Ok(queued) => {
                tracing::info!("{queued} files queued");
                stamped(&format!(
                    "Synchronization started for {source}: {queued} files queued"
                ))
            }
            Err(error @ Error::AlreadyActive(_)) => stamped(&error.to_string()),
            Err(error) => {
                tracing::warn!("cannot add {source}: {error}");
                self.log
                    .record_event(&format!("Failed to add pair: {source} {target} ({error})"))
                    .await
            }
        }
    }

    /// Marks the pair inactive and drops its queued tasks; returns the acknowledgement line.
    ///
    /// Transfers already picked up by a worker run to completion.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn handle_cancel(&mut self, source: &PairKey) -> String {
        if !self.registry.deactivate(source) {
            return stamped(&Error::NotFound(source.to_string()).to_string());
        }
        let removed = self.queue.cancel_matching(source);
        tracing::info!("removed {removed} queued tasks");
        self.log
            .record_event(&format!("Synchronization stopped for {source}"))
            .await
    }

    /// Stops every worker once the queue has been worked off.
    ///
    /// Progress lines are written to `reply`; a command source that went away does not stop
    /// the shutdown.
    #[instrument(skip_all)]
    pub async fn handle_shutdown<W: AsyncWrite + Unpin>(
        self,
        reply: &mut W,
    ) -> anyhow::Result<()> {
        say(reply, "Shutting down manager...").await;
        say(reply, "Waiting for all active workers to finish...").await;
        say(reply, "Processing remaining queued tasks...").await;
        for _ in 0..self.workers.len() {
            self.queue.enqueue(QueueEntry::Shutdown).await;
        }
        self.queue.wait_until_empty().await;
        self.workers.join().await?;
        say(reply, "Manager shutdown complete...").await;
        Ok(())
    }
}

async fn say<W: AsyncWrite + Unpin>(reply: &mut W, message: &str) {
    tracing::info!("{message}");
    if let Err(error) = write_line(reply, &stamped(message)).await {
        tracing::debug!("command source gone: {error}");
    }
}

pub(crate) async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
