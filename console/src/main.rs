use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dsync-console",
    version,
    disable_help_flag = true,
    about = "Interactive command source for dsync-manager",
    long_about = "`dsync-console` reads commands from standard input, forwards them to a running
`dsync-manager` and prints whatever the manager replies.

COMMANDS:
    add <source> <target>    start synchronizing <source> into <target>
    cancel <source>          stop synchronizing <source>
    shutdown                 finish queued work and stop the manager

Directories are named `<dir>@<host>:<port>`. Every forwarded command is recorded in the console
log as `[timestamp] Command <command>`.

EXAMPLE:
    dsync-console -l console.log -h 10.0.0.5 -p 9000"
)]
struct Args {
    /// Console log, truncated at startup
    #[arg(short = 'l', long = "logfile", value_name = "PATH")]
    logfile: std::path::PathBuf,

    // Network
    /// Host running dsync-manager
    #[arg(short = 'h', long, value_name = "HOST", help_heading = "Network")]
    host: String,

    /// Control port of dsync-manager
    #[arg(short = 'p', long, value_name = "PORT", help_heading = "Network")]
    port: u16,

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

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Add { source: &'a str, target: &'a str },
    Cancel { source: &'a str },
    Shutdown,
}

impl std::fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Add { source, target } => write!(f, "add {source} {target}"),
            Command::Cancel { source } => write!(f, "cancel {source}"),
            Command::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Checks one input line; `Err` carries the message to show instead of forwarding it.
fn parse_command(line: &str) -> Result<Option<Command<'_>>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, operands)) = tokens.split_first() else {
        return Ok(None);
    };
    let command = match (*verb, operands) {
        ("add", &[source, target]) => Command::Add { source, target },
        ("cancel", &[source]) => Command::Cancel { source },
        ("shutdown", &[]) => Command::Shutdown,
        ("add", _) => return Err("usage: add <source> <target>".to_string()),
        ("cancel", _) => return Err("usage: cancel <source>".to_string()),
        ("shutdown", _) => return Err("usage: shutdown".to_string()),
        (other, _) => return Err(format!("Wrong command given: <{other}>")),
    };
    Ok(Some(command))
}

#[derive(Debug, Default)]
struct Session {
    forwarded: usize,
    rejected: usize,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "commands forwarded: {}", self.forwarded)?;
        write!(f, "commands rejected: {}", self.rejected)
    }
}

/// Feeds stdin lines into a channel from a plain thread.
///
/// A blocking stdin read cannot be cancelled, so it must not hold up the runtime on exit.
fn stdin_lines() -> tokio::sync::mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn print_replies(read_half: tokio::net::tcp::OwnedReadHalf) -> Result<()> {
    let mut replies = BufReader::new(read_half).lines();
    while let Some(reply) = replies.next_line().await? {
        println!("{reply}");
    }
    tracing::info!("manager closed the connection");
    Ok(())
}

#[instrument]
async fn async_main(args: Args) -> Result<Session> {
    let mut log = tokio::fs::File::create(&args.logfile)
        .await
        .with_context(|| format!("cannot open console log {:?}", args.logfile))?;
    let stream = tokio::net::TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("cannot reach manager at {}:{}", args.host, args.port))?;
    let (read_half, mut write_half) = stream.into_split();
    let replies = tokio::spawn(print_replies(read_half));
    println!("Enter your commands:");
    let mut session = Session::default();
    let mut lines = stdin_lines();
    while let Some(line) = lines.recv().await {
        let line = line.context("failed reading standard input")?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                session.rejected += 1;
                continue;
            }
        };
        write_half
            .write_all(format!("{command}\n").as_bytes())
            .await
            .context("manager closed the connection")?;
        log.write_all(format!("[{}] Command {command}\n", common::timestamp()).as_bytes())
            .await?;
        log.flush().await?;
        session.forwarded += 1;
        if command == Command::Shutdown {
            break;
        }
    }
    // the manager closes its side once it is done with us
    if let Err(error) = write_half.shutdown().await {
        tracing::debug!("cannot half-close the control connection: {error}");
    }
    replies.await??;
    Ok(session)
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
        max_workers: 2,
        max_blocking_threads: 0,
    };
    if common::run(output, runtime, func).is_none() {
        std::process::exit(1);
    }
    Ok(())
}
