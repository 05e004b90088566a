//! Reference file-serving agent
//!
//! Serves one local directory tree over the LIST / PULL / PUSH protocol in
//! [`remote::protocol`]. Every accepted connection carries exactly one request (or one PUSH
//! sequence) and is handled on its own task.
//!
//! Request paths are interpreted relative to the agent root: a leading `/` is stripped and
//! paths with `..` components are refused.

use anyhow::{Context, Result, anyhow};
use remote::AgentConnection;
use remote::protocol::{self, PushChunk, Request};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

/// Accepts connections on `listener` until `cancel` fires.
///
/// Connections already being served are left to finish on their own tasks.
pub async fn serve(
    listener: tokio::net::TcpListener,
    root: PathBuf,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let root = std::sync::Arc::new(root);
    tracing::info!(
        "serving {:?} on {}",
        root,
        listener.local_addr().context("listener has no local address")?
    );
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        tracing::warn!("accept failed: {error}");
                        continue;
                    }
                };
                tracing::debug!("connection from {peer}");
                let root = root.clone();
                tokio::spawn(async move {
                    let mut connection = AgentConnection::new(stream);
                    if let Err(error) = handle_connection(&mut connection, &root).await {
                        tracing::warn!("connection from {peer} failed: {error:#}");
                    }
                });
            }
            () = cancel.cancelled() => {
                tracing::info!("agent shutting down");
                return Ok(());
            }
        }
    }
}

/// Serves the single request (or PUSH sequence) carried by `connection`.
pub async fn handle_connection<R, W>(
    connection: &mut AgentConnection<R, W>,
    root: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(request) = protocol::read_request(connection.recv_mut()).await? else {
        tracing::debug!("peer closed without a request");
        return Ok(());
    };
    match request {
        Request::List { dir } => list(connection, root, &dir).await,
        Request::Pull { path } => pull(connection, root, &path).await,
        Request::Push { path, chunk } => push(connection, root, path, chunk).await,
    }
}

/// Maps a request path onto the agent root.
pub fn resolve(root: &Path, request_path: &str) -> Result<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("refusing path outside agent root: {request_path:?}"));
            }
        }
    }
    Ok(resolved)
}

/// Replies `-1 <reason>` and consumes whatever the peer still sends.
async fn send_failure<R, W>(connection: &mut AgentConnection<R, W>, reason: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let send = connection.send_mut();
    send.write_all(format!("{} {reason}\n", protocol::FAILURE_SIZE).as_bytes())
        .await?;
    send.flush().await?;
    send.shutdown().await?;
    // unread input would turn our close into a reset and lose the reply
    tokio::io::copy(connection.recv_mut(), &mut tokio::io::sink()).await?;
    Ok(())
}

async fn regular_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            // names are whitespace-delimited tokens on the wire
            Ok(name) if !name.contains(|c: char| c.is_ascii_whitespace()) => names.push(name),
            Ok(name) => tracing::warn!("skipping {name:?}: name contains whitespace"),
            Err(name) => tracing::warn!("skipping {name:?}: name is not valid UTF-8"),
        }
    }
    names.sort();
    Ok(names)
}

#[instrument(level = "debug", skip(connection, root))]
async fn list<R, W>(connection: &mut AgentConnection<R, W>, root: &Path, dir: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let names = match resolve(root, dir) {
        Ok(path) => regular_file_names(&path).await.unwrap_or_else(|error| {
            tracing::warn!("cannot list {path:?}: {error}");
            Vec::new()
        }),
        Err(error) => {
            tracing::warn!("{error:#}");
            Vec::new()
        }
    };
    let mut reply = String::new();
    for name in &names {
        reply.push_str(name);
        reply.push('\n');
    }
    reply.push_str(protocol::LIST_END);
    reply.push('\n');
    let send = connection.send_mut();
    send.write_all(reply.as_bytes()).await?;
    send.shutdown().await?;
    tracing::debug!("listed {} files", names.len());
    Ok(())
}

#[instrument(level = "debug", skip(connection, root))]
async fn pull<R, W>(connection: &mut AgentConnection<R, W>, root: &Path, path: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let opened = async {
        let path = resolve(root, path)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("cannot open {path:?}"))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("cannot stat {path:?}"))?
            .len();
        anyhow::Ok((file, size))
    };
    let (file, size) = match opened.await {
        Ok(opened) => opened,
        Err(error) => {
            tracing::info!("PULL {path} failed: {error:#}");
            return send_failure(connection, &format!("{error:#}")).await;
        }
    };
    let send = connection.send_mut();
    send.write_all(format!("{size} ").as_bytes()).await?;
    let sent = tokio::io::copy(&mut file.take(size), send).await?;
    send.shutdown().await?;
    if sent != size {
        return Err(anyhow!(
            "{path} shrank while being sent: {sent} of {size} bytes"
        ));
    }
    tracing::debug!("sent {size} bytes");
    Ok(())
}

#[instrument(level = "debug", skip(connection, root, first))]
async fn push<R, W>(
    connection: &mut AgentConnection<R, W>,
    root: &Path,
    path: String,
    first: PushChunk,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut open: Option<tokio::fs::File> = None;
    let mut written = 0u64;
    let mut chunk = first;
    loop {
        match chunk {
            PushChunk::Open => {
                let created = async {
                    let target = resolve(root, &path)?;
                    tokio::fs::File::create(&target)
                        .await
                        .with_context(|| format!("cannot create {target:?}"))
                };
                match created.await {
                    Ok(file) => open = Some(file),
                    Err(error) => {
                        tracing::info!("PUSH {path} failed: {error:#}");
                        return send_failure(connection, &format!("{error:#}")).await;
                    }
                }
            }
            PushChunk::Data(len) => {
                let Some(file) = open.as_mut() else {
                    return send_failure(connection, &format!("{path} is not open")).await;
                };
                let len = len as u64;
                let copied = tokio::io::copy(&mut connection.recv_mut().take(len), file).await;
                match copied {
                    Ok(copied) if copied == len => written += copied,
                    Ok(copied) => {
                        return Err(anyhow!(
                            "connection closed after {copied} of {len} bytes for {path}"
                        ));
                    }
                    Err(error) => {
                        tracing::info!("PUSH {path} failed: {error}");
                        return send_failure(connection, &error.to_string()).await;
                    }
                }
            }
            PushChunk::Close => break,
        }
        match protocol::read_request(connection.recv_mut()).await? {
            Some(Request::Push {
                path: next_path,
                chunk: next,
            }) if next_path == path => chunk = next,
            Some(other) => {
                let reason = format!("unexpected request in PUSH sequence for {path}: {other:?}");
                return send_failure(connection, &reason).await;
            }
            None => {
                tracing::warn!("PUSH sequence for {path} ended without close");
                break;
            }
        }
    }
    let flushed = match open {
        Some(mut file) => file.flush().await,
        None => Ok(()),
    };
    if let Err(error) = flushed {
        return send_failure(connection, &error.to_string()).await;
    }
    connection.send_mut().shutdown().await?;
    tracing::debug!("received {written} bytes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_leading_slash() -> Result<()> {
        let root = Path::new("/srv/agent");
        assert_eq!(
            resolve(root, "/docs/a.txt")?,
            PathBuf::from("/srv/agent/docs/a.txt")
        );
        assert_eq!(resolve(root, "docs/./a.txt")?, PathBuf::from("/srv/agent/docs/a.txt"));
        Ok(())
    }

    #[test]
    fn resolve_refuses_parent_components() {
        let root = Path::new("/srv/agent");
        assert!(resolve(root, "docs/../../etc/passwd").is_err());
        assert!(resolve(root, "..").is_err());
    }

    #[tokio::test]
    async fn push_sequence_over_in_memory_pipe() -> Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("backup"))?;
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let agent_root = root.path().to_path_buf();
        let agent = tokio::spawn(async move {
            let mut connection = AgentConnection::from_parts(server_read, server_write);
            handle_connection(&mut connection, &agent_root).await
        });
        let (client_read, client_write) = tokio::io::split(client);
        let mut connection = AgentConnection::from_parts(client_read, client_write);
        let open = Request::Push {
            path: "/backup/a.txt".to_string(),
            chunk: PushChunk::Open,
        };
        connection.send_request(&open).await?;
        connection.send_push_data("/backup/a.txt", b"hel").await?;
        connection.send_push_data("/backup/a.txt", b"lo").await?;
        let close = Request::Push {
            path: "/backup/a.txt".to_string(),
            chunk: PushChunk::Close,
        };
        connection.send_request(&close).await?;
        let reply = connection.finish(64).await?;
        agent.await??;
        assert!(reply.is_empty(), "unexpected reply {reply:?}");
        assert_eq!(std::fs::read(root.path().join("backup/a.txt"))?, b"hello");
        Ok(())
    }
}
