//! Control connection from the command source (usually `dsync-console`).
//!
//! Commands are whitespace-delimited tokens: `add <source> <target>`, `cancel <source>` and
//! `shutdown`. Every `add` and `cancel` gets exactly one acknowledgement line back. One command
//! source is served at a time; when it disconnects the manager waits for the next one.

use common::PairKey;
use remote::codec::{self, WireError};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::instrument;

use crate::dispatcher::{Dispatcher, write_line};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { source: PairKey, target: PairKey },
    Cancel { source: PairKey },
    Shutdown,
    Unknown(String),
}

/// Reads the next command; `Ok(None)` when the command source closed the connection.
pub async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Command>, WireError> {
    let Some(verb) = codec::read_token(reader, codec::MAX_TOKEN_LEN).await? else {
        return Ok(None);
    };
    let command = match verb.as_str() {
        "add" => Command::Add {
            source: codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?.into(),
            target: codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?.into(),
        },
        "cancel" => Command::Cancel {
            source: codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?.into(),
        },
        "shutdown" => Command::Shutdown,
        _ => Command::Unknown(verb),
    };
    Ok(Some(command))
}

/// Serves command sources one after another until one of them sends `shutdown`.
#[instrument(skip_all)]
pub async fn serve(
    listener: tokio::net::TcpListener,
    mut dispatcher: Dispatcher,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::warn!("accept failed: {error}");
                continue;
            }
        };
        tracing::info!("command source connected from {peer}");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let command = match read_command(&mut reader).await {
                Ok(Some(command)) => command,
                Ok(None) => {
                    tracing::info!("command source {peer} disconnected");
                    break;
                }
                Err(error) => {
                    tracing::warn!("dropping command source {peer}: {error}");
                    break;
                }
            };
            tracing::debug!("command: {command:?}");
            let ack = match command {
                Command::Add { source, target } => dispatcher.handle_add(&source, &target).await,
                Command::Cancel { source } => dispatcher.handle_cancel(&source).await,
                Command::Shutdown => return dispatcher.handle_shutdown(&mut write_half).await,
                Command::Unknown(verb) => {
                    format!("[{}] Wrong command given: <{verb}>", common::timestamp())
                }
            };
            if let Err(error) = write_line(&mut write_half, &ack).await {
                tracing::warn!("cannot reply to {peer}: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_commands_across_lines() -> anyhow::Result<()> {
        let mut input = BufReader::new(
            &b"add docs@127.0.0.1:9001\n   backup@127.0.0.1:9002\ncancel docs@127.0.0.1:9001\nlist\nshutdown\n"[..],
        );
        assert_eq!(
            read_command(&mut input).await?,
            Some(Command::Add {
                source: "docs@127.0.0.1:9001".into(),
                target: "backup@127.0.0.1:9002".into(),
            })
        );
        assert_eq!(
            read_command(&mut input).await?,
            Some(Command::Cancel {
                source: "docs@127.0.0.1:9001".into()
            })
        );
        assert_eq!(
            read_command(&mut input).await?,
            Some(Command::Unknown("list".to_string()))
        );
        assert_eq!(read_command(&mut input).await?, Some(Command::Shutdown));
        assert_eq!(read_command(&mut input).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn truncated_add_is_an_error() {
        let mut input = BufReader::new(&b"add docs@127.0.0.1:9001"[..]);
        assert!(matches!(
            read_command(&mut input).await,
            Err(WireError::UnexpectedEof)
        ));
    }
}
