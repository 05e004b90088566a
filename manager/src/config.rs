//! Manager settings and the startup pair list.

use anyhow::{Context, Result};
use common::{PairKey, TransferConfig};
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKERS: usize = 5;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Maximum number of queued tasks
    pub queue_capacity: usize,
    pub transfer: TransferConfig,
    /// Result log, truncated at startup
    pub result_log: PathBuf,
    /// Pairs to add before accepting commands
    pub config_file: Option<PathBuf>,
    /// Address the control server binds to
    pub bind: String,
    pub port: u16,
}

impl ManagerConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("number of workers must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("buffer size must be greater than 0".to_string());
        }
        self.transfer.validate()
    }

    pub async fn bind(&self) -> Result<tokio::net::TcpListener> {
        tokio::net::TcpListener::bind((self.bind.as_str(), self.port))
            .await
            .with_context(|| format!("failed to bind control port {}:{}", self.bind, self.port))
    }
}

/// Splits `text` into `(source, target)` pairs.
///
/// Returns the trailing token as well when the token count is odd.
pub fn parse_pairs(text: &str) -> (Vec<(PairKey, PairKey)>, Option<&str>) {
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    let mut chunks = tokens.chunks_exact(2);
    let pairs = chunks
        .by_ref()
        .map(|pair| (PairKey::from(pair[0]), PairKey::from(pair[1])))
        .collect();
    let leftover = chunks.remainder().first().copied();
    (pairs, leftover)
}

/// Reads the startup pairs from `path`.
pub async fn load_pairs(path: &Path) -> Result<Vec<(PairKey, PairKey)>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read config file {path:?}"))?;
    let (pairs, leftover) = parse_pairs(&text);
    if let Some(token) = leftover {
        tracing::warn!("{path:?}: ignoring {token:?}, it has no target");
    }
    Ok(pairs)
}
