//! Networking between the manager and the file-serving agents
//!
//! - [`codec`] - whitespace-delimited tokens and numbers over a byte stream
//! - [`protocol`] - LIST / PULL / PUSH requests and their replies
//! - [`streams`] - an owned, buffered connection to one agent
//!
//! The helpers at the crate root wrap the request sequences used by the manager's control
//! path; the per-file PULL/PUSH streaming is driven by the manager's workers directly.

use tracing::instrument;

pub mod codec;
pub mod protocol;
pub mod streams;

pub use streams::AgentConnection;

/// Opens a TCP connection to the agent serving `endpoint`.
///
/// No timeout is applied: a peer that never answers blocks the caller.
#[instrument(level = "debug", skip(endpoint), fields(addr = %endpoint.address()))]
pub async fn connect(endpoint: &common::Endpoint) -> common::Result<AgentConnection> {
    let addr = endpoint.address();
    let stream = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(|source| common::Error::Connect {
            addr: addr.clone(),
            source,
        })?;
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!("failed to set TCP_NODELAY on {addr}: {error}");
    }
    tracing::debug!("connected to {addr}");
    Ok(AgentConnection::new(stream))
}

/// Asks the agent for the names of the files in `endpoint.dir`.
///
/// The reply is read up to the `.` terminator; a connection that ends before it is a
/// protocol error, so a partially listed directory is never mistaken for a complete one.
#[instrument(level = "debug", skip(endpoint), fields(endpoint = %endpoint))]
pub async fn list_files(endpoint: &common::Endpoint) -> common::Result<Vec<String>> {
    let mut connection = connect(endpoint).await?;
    let request = protocol::Request::List {
        dir: endpoint.dir.clone(),
    };
    connection
        .send_request(&request)
        .await
        .map_err(|source| common::Error::io(format!("failed sending LIST to {endpoint}"), source))?;
    let mut files = Vec::new();
    loop {
        match codec::read_token(connection.recv_mut(), codec::MAX_TOKEN_LEN).await? {
            Some(name) if name == protocol::LIST_END => break,
            Some(name) => files.push(name),
            None => {
                return Err(common::Error::Protocol(format!(
                    "listing of {endpoint} ended before the terminator"
                )));
            }
        }
    }
    tracing::debug!("{} files listed", files.len());
    Ok(files)
}
