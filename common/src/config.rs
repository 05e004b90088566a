//! Configuration types for runtime and output settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of runtime worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Default log directive derived from `quiet` and `verbose`.
    #[must_use]
    pub fn level_directive(&self) -> &'static str {
        if self.quiet {
            return "off";
        }
        match self.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Settings that shape a single file transfer between two agents
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Maximum number of payload bytes forwarded per PUSH request
    pub chunk_size: usize,
    /// Upper bound on the error text kept for one transfer
    pub max_error_text: usize,
}

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Each worker holds one chunk buffer per transfer.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_ERROR_TEXT: usize = 1024;

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_error_text: DEFAULT_MAX_ERROR_TEXT,
        }
    }
}

impl TransferConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(format!("chunk_size must be at most {MAX_CHUNK_SIZE} bytes"));
        }
        if self.max_error_text == 0 {
            return Err("max_error_text must be greater than 0".to_string());
        }
        Ok(())
    }
}
