//! Append-only log of transfer results and dispatcher events.
//!
//! Transfer records have the form
//!
//! ```text
//! [<timestamp>] [<src dir>/<file>@<host>:<port>] [<dst dir>/<file>@<host>:<port>] [<worker>] [PUSH|PULL] [SUCCESS|ERROR] [<details>]
//! ```
//!
//! and dispatcher events are `[<timestamp>] <message>`. Each line is written with a single
//! `write_all` while holding the log's own lock, so concurrent writers never interleave bytes.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Push,
    Pull,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Leg::Push => "PUSH",
            Leg::Pull => "PULL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Outcome::Success => "SUCCESS",
            Outcome::Error => "ERROR",
        })
    }
}

/// One leg of one transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferRecord<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub worker: usize,
    pub leg: Leg,
    pub outcome: Outcome,
    pub details: &'a str,
}

impl TransferRecord<'_> {
    pub fn format(&self, timestamp: &str) -> String {
        format!(
            "[{timestamp}] [{}] [{}] [{}] [{}] [{}] [{}]\n",
            self.source, self.target, self.worker, self.leg, self.outcome, self.details
        )
    }
}

#[derive(Debug)]
pub struct ResultLog {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl ResultLog {
    /// Creates (or truncates) the log at `path`.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .with_context(|| format!("cannot open result log {path:?}"))?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }

    async fn append(&self, line: &str) {
        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };
        if let Err(error) = written.await {
            tracing::error!("failed to write result log: {error}");
        }
    }

    pub async fn record_transfer(&self, record: &TransferRecord<'_>) {
        self.append(&record.format(&common::timestamp())).await;
    }

    /// Appends `[<timestamp>] <message>` and returns the line without its newline.
    pub async fn record_event(&self, message: &str) -> String {
        let line = format!("[{}] {message}", common::timestamp());
        self.append(&format!("{line}\n")).await;
        line
    }
}
