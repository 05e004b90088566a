use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dsync-manager",
    version,
    about = "Replicate directories between dsync agents",
    long_about = "`dsync-manager` copies every file of a source directory to a target directory, where both
directories are served by `dsync-agent` instances, possibly on different hosts.

Directories are named `<dir>@<host>:<port>`. Pairs are added from the config file at startup and
from a command source (`dsync-console`) connected to the control port.

EXAMPLE:
    # Four workers, room for 32 queued files, control port 9000
    dsync-manager -l results.log -c pairs.conf -n 4 -b 32 -p 9000"
)]
struct Args {
    // Synchronization
    /// Result log, one line per transfer leg (truncated at startup)
    #[arg(short = 'l', long = "logfile", value_name = "PATH", help_heading = "Synchronization")]
    logfile: std::path::PathBuf,

    /// File with `<source> <target>` pairs to add at startup
    #[arg(short = 'c', long = "config", value_name = "PATH", help_heading = "Synchronization")]
    config: Option<std::path::PathBuf>,

    /// Number of worker tasks
    #[arg(
        short = 'n',
        long = "workers",
        default_value_t = manager::config::DEFAULT_WORKERS,
        value_name = "N",
        help_heading = "Synchronization"
    )]
    workers: usize,

    /// Maximum number of files waiting in the queue
    #[arg(short = 'b', long = "buffer-size", value_name = "N", help_heading = "Synchronization")]
    buffer_size: usize,

    /// Bytes forwarded per PUSH request
    ///
    /// This option accepts a human readable size, e.g. "4KiB", "1MiB".
    #[arg(
        long,
        default_value = "4KiB",
        value_name = "SIZE",
        help_heading = "Synchronization"
    )]
    chunk_size: bytesize::ByteSize,

    // Network
    /// Control port the command source connects to
    #[arg(short = 'p', long, value_name = "PORT", help_heading = "Network")]
    port: u16,

    /// Address to bind the control port to
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR", help_heading = "Network")]
    bind: String,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of runtime threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,
}

#[instrument]
async fn async_main(args: Args) -> Result<manager::Summary> {
    let config = manager::ManagerConfig {
        workers: args.workers,
        queue_capacity: args.buffer_size,
        transfer: common::TransferConfig {
            chunk_size: usize::try_from(args.chunk_size.as_u64())?,
            ..Default::default()
        },
        result_log: args.logfile,
        config_file: args.config,
        bind: args.bind,
        port: args.port,
    };
    let listener = config.bind().await?;
    manager::run(config, listener).await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: 0,
    };
    if common::run(output, runtime, func).is_none() {
        std::process::exit(1);
    }
    Ok(())
}
