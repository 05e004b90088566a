//! Workers that move one file at a time from a source agent to a target agent.
//!
//! A worker never talks to the file systems itself: it opens one connection to each agent,
//! PULLs the file from the source and forwards the bytes to the target as a PUSH sequence,
//! chunk by chunk. Both legs are always logged, with the same outcome.

use common::{Endpoint, TransferConfig};
use remote::AgentConnection;
use remote::protocol::{self, PullReply, PushChunk, Request};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

use crate::queue::TaskQueue;
use crate::result_log::{Leg, Outcome, ResultLog, TransferRecord};
use crate::task::{QueueEntry, Task};

/// Error text collected over one transfer, bounded in length.
#[derive(Debug, Clone, Default)]
pub struct ErrorText {
    text: String,
    limit: usize,
}

impl ErrorText {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    /// Appends `message`, separated from earlier messages by `, `; text past the limit is
    /// dropped.
    pub fn push(&mut self, message: impl std::fmt::Display) {
        if self.text.len() >= self.limit {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str(", ");
        }
        self.text.push_str(&message.to_string());
        if self.text.len() > self.limit {
            let mut end = self.limit;
            while !self.text.is_char_boundary(end) {
                end -= 1;
            }
            self.text.truncate(end);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// What happened to one task.
#[derive(Debug)]
pub struct TransferReport {
    pub source_location: String,
    pub target_location: String,
    pub bytes_pulled: u64,
    pub bytes_pushed: u64,
    pub errors: ErrorText,
}

impl TransferReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Totals across all workers.
#[derive(Debug, Default)]
pub struct TransferStats {
    files_transferred: AtomicU64,
    files_failed: AtomicU64,
    bytes_pushed: AtomicU64,
}

impl TransferStats {
    fn account(&self, report: &TransferReport) {
        if report.succeeded() {
            self.files_transferred.fetch_add(1, Ordering::Relaxed);
            self.bytes_pushed
                .fetch_add(report.bytes_pushed, Ordering::Relaxed);
        } else {
            self.files_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            files_transferred: self.files_transferred.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_transferred: u64,
    pub files_failed: u64,
    /// Bytes of files that reached their target; failed transfers add nothing
    pub bytes_pushed: u64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes pushed: {}\n\
            files transferred: {}\n\
            files failed: {}",
            bytesize::ByteSize(self.bytes_pushed),
            self.files_transferred,
            self.files_failed,
        )
    }
}

/// Copies `task.filename` from its source agent to its target agent.
///
/// Never fails: every problem ends up in the report's error text.
#[instrument(level = "debug", skip(config), fields(task = %task))]
pub async fn transfer_file(task: &Task, config: &TransferConfig) -> TransferReport {
    let mut errors = ErrorText::new(config.max_error_text);
    let (source, target) = match (task.source.decode(), task.target.decode()) {
        (Ok(source), Ok(target)) => (source, target),
        (Err(error), _) | (_, Err(error)) => {
            errors.push(&error);
            return TransferReport {
                source_location: format!("{}/{}", task.source, task.filename),
                target_location: format!("{}/{}", task.target, task.filename),
                bytes_pulled: 0,
                bytes_pushed: 0,
                errors,
            };
        }
    };
    let mut report = TransferReport {
        source_location: source.file_location(&task.filename),
        target_location: target.file_location(&task.filename),
        bytes_pulled: 0,
        bytes_pushed: 0,
        errors,
    };
    let (source_connection, target_connection) =
        (remote::connect(&source).await, remote::connect(&target).await);
    match (source_connection, target_connection) {
        (Ok(mut source_connection), Ok(mut target_connection)) => {
            copy_between(
                &mut source_connection,
                &source,
                &mut target_connection,
                &target,
                &task.filename,
                config,
                &mut report,
            )
            .await;
        }
        (source_connection, target_connection) => {
            if let Err(error) = source_connection {
                report.errors.push(error);
            }
            if let Err(error) = target_connection {
                report.errors.push(error);
            }
        }
    }
    report
}

async fn copy_between<R, W, TR, TW>(
    source_connection: &mut AgentConnection<R, W>,
    source: &Endpoint,
    target_connection: &mut AgentConnection<TR, TW>,
    target: &Endpoint,
    filename: &str,
    config: &TransferConfig,
    report: &mut TransferReport,
) where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
    TR: tokio::io::AsyncRead + Unpin,
    TW: tokio::io::AsyncWrite + Unpin,
{
    let pull = Request::Pull {
        path: source.remote_path(filename),
    };
    if let Err(error) = source_connection.send_request(&pull).await {
        report.errors.push(format!("PULL request failed: {error}"));
        return;
    }
    let size = match protocol::read_pull_reply(source_connection.recv_mut(), config.max_error_text)
        .await
    {
        Ok(PullReply::Data { size }) => size,
        Ok(PullReply::Failed { reason }) => {
            report.errors.push(format!("File: {filename} {reason}"));
            return;
        }
        Err(error) => {
            report.errors.push(format!("bad PULL reply: {error}"));
            return;
        }
    };
    let push_path = target.remote_path(filename);
    // once a write to the target fails the rest of the file is still drained from the source
    let mut target_ok = true;
    let open = Request::Push {
        path: push_path.clone(),
        chunk: PushChunk::Open,
    };
    if let Err(error) = target_connection.send_request(&open).await {
        report.errors.push(format!("write: {error}"));
        target_ok = false;
    }
    let mut buffer = vec![0u8; config.chunk_size];
    let mut remaining = size;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buffer.len(), |left| left.min(buffer.len()));
        let read = match source_connection.recv_chunk(&mut buffer[..want]).await {
            Ok(0) => {
                report.errors.push(format!(
                    "source closed after {} of {size} bytes",
                    report.bytes_pulled
                ));
                break;
            }
            Ok(read) => read,
            Err(error) => {
                report.errors.push(format!("read failed {error}"));
                break;
            }
        };
        report.bytes_pulled += read as u64;
        remaining -= read as u64;
        if !target_ok {
            continue;
        }
        match target_connection
            .send_push_data(&push_path, &buffer[..read])
            .await
        {
            Ok(()) => report.bytes_pushed += read as u64,
            Err(error) => {
                report.errors.push(format!("write: {error}"));
                target_ok = false;
            }
        }
    }
    if !target_ok {
        return;
    }
    let close = Request::Push {
        path: push_path,
        chunk: PushChunk::Close,
    };
    if let Err(error) = target_connection.send_request(&close).await {
        report.errors.push(format!("write: {error}"));
        return;
    }
    // the target only answers (with `-1 <text>`) when it failed
    match target_connection.finish(config.max_error_text).await {
        Ok(reply) if reply.is_empty() => {}
        Ok(reply) => {
            let text = String::from_utf8_lossy(&reply);
            let text = text.trim();
            let text = text
                .strip_prefix(&protocol::FAILURE_SIZE.to_string())
                .unwrap_or(text)
                .trim_start();
            report.errors.push(format!("target: {text}"));
        }
        Err(error) => report.errors.push(format!("target: {error}")),
    }
}

async fn log_report(log: &ResultLog, worker: usize, report: &TransferReport) {
    let (outcome, push_details, pull_details) = if report.succeeded() {
        (
            Outcome::Success,
            format!("{} bytes pushed", report.bytes_pushed),
            format!("{} bytes pulled", report.bytes_pulled),
        )
    } else {
        let details = report.errors.as_str().to_string();
        (Outcome::Error, details.clone(), details)
    };
    for (leg, details) in [(Leg::Push, &push_details), (Leg::Pull, &pull_details)] {
        log.record_transfer(&TransferRecord {
            source: &report.source_location,
            target: &report.target_location,
            worker,
            leg,
            outcome,
            details,
        })
        .await;
    }
}

#[instrument(level = "debug", skip_all, fields(worker = id))]
async fn run_worker(
    id: usize,
    queue: Arc<TaskQueue>,
    log: Arc<ResultLog>,
    config: TransferConfig,
    stats: Arc<TransferStats>,
) {
    loop {
        let task = match queue.dequeue().await {
            QueueEntry::Transfer(task) => task,
            QueueEntry::Shutdown => {
                tracing::debug!("worker {id} stopping");
                return;
            }
        };
        let report = transfer_file(&task, &config).await;
        if report.succeeded() {
            tracing::info!(
                "{} -> {}: {} bytes",
                report.source_location,
                report.target_location,
                report.bytes_pushed
            );
        } else {
            tracing::warn!(
                "{} -> {} failed: {}",
                report.source_location,
                report.target_location,
                report.errors.as_str()
            );
        }
        log_report(&log, id, &report).await;
        stats.account(&report);
    }
}

/// Fixed set of worker tasks consuming from one queue.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers, numbered from 1.
    pub fn spawn(
        count: usize,
        queue: &Arc<TaskQueue>,
        log: &Arc<ResultLog>,
        config: TransferConfig,
        stats: &Arc<TransferStats>,
    ) -> Self {
        let handles = (1..=count)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    log.clone(),
                    config,
                    stats.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit; they only do so after dequeuing a shutdown entry.
    pub async fn join(self) -> anyhow::Result<()> {
        for handle in self.handles {
            handle.await?;
        }
        Ok(())
    }
}
