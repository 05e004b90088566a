//! Shared building blocks for the dsync tools
//!
//! This crate holds the pieces used by the manager, the file-serving agent and the console:
//!
//! - [`Error`] - the failure taxonomy every component reports through
//! - [`spec`] - decoding of `<dir>@<host>:<port>` directory specs
//! - [`config`] - runtime, output and transfer settings
//! - [`logging`] - tracing subscriber setup
//! - [`run`] - the common `main` body: logging, tokio runtime, error reporting

pub mod config;
pub mod error;
pub mod logging;
pub mod spec;

pub use config::{OutputConfig, RuntimeConfig, TransferConfig};
pub use error::{Error, Result};
pub use spec::{Endpoint, PairKey};

/// Local wall-clock time in the format used by every log line and acknowledgement.
#[must_use]
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Runs `func` on a freshly built tokio runtime.
///
/// Returns `None` if the runtime could not be built or `func` failed; the error has
/// already been logged (unless running quiet) in that case.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    logging::init(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to build tokio runtime: {error:#}");
            }
            return None;
        }
    };
    match rt.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_fixed_width() {
        let ts = timestamp();
        assert_eq!(ts.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
    }

    #[test]
    fn run_reports_failure_as_none() {
        let output = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let res: Option<String> = run(output, RuntimeConfig::default(), || async {
            Err(anyhow::anyhow!("boom"))
        });
        assert!(res.is_none());
    }

    #[test]
    fn run_returns_summary() {
        let output = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let runtime = RuntimeConfig {
            max_workers: 2,
            max_blocking_threads: 0,
        };
        let res = run(output, runtime, || async { Ok(42) });
        assert_eq!(res, Some(42));
    }
}
