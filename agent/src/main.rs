use anyhow::{Context, Result};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dsync-agent",
    version,
    about = "File-serving agent for dsync - answers LIST/PULL/PUSH requests",
    long_about = "`dsync-agent` serves one local directory tree to the dsync manager.

Directory specs given to the manager (`<dir>@<host>:<port>`) name a directory relative to the
agent root of the agent listening on <host>:<port>.

EXAMPLE:
    # Serve /srv/data on port 9001
    dsync-agent --root /srv/data --port 9001 -v"
)]
struct Args {
    // Network
    /// Port to listen on
    #[arg(short = 'p', long, value_name = "PORT", help_heading = "Network")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR", help_heading = "Network")]
    bind: String,

    // Storage
    /// Directory served by this agent
    #[arg(long, default_value = ".", value_name = "PATH", help_heading = "Storage")]
    root: std::path::PathBuf,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,
}

#[instrument]
async fn async_main(args: Args) -> Result<String> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("cannot serve {:?}", args.root))?;
    let listener = tokio::net::TcpListener::bind((args.bind.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.bind, args.port))?;
    let cancel = tokio_util::sync::CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for ctrl-c: {error}");
            return;
        }
        stop.cancel();
    });
    agent::serve(listener, root.clone(), cancel).await?;
    Ok(format!("agent for {root:?} stopped"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: false,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: 0,
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    if common::run(output, runtime, func).is_none() {
        std::process::exit(1);
    }
    Ok(())
}
