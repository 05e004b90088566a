//! Tracing subscriber setup shared by all binaries

use crate::config::OutputConfig;

/// Installs the global fmt subscriber.
///
/// The level comes from `-v`/`--quiet` unless `RUST_LOG` is set, in which case the
/// environment wins. Calling this twice is harmless: the second install is ignored.
pub fn init(output: &OutputConfig) {
    let filter = match std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => tracing_subscriber::EnvFilter::new(directives),
        _ => tracing_subscriber::EnvFilter::new(output.level_directive()),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(output.verbose > 1)
        .with_writer(std::io::stdout)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
