use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::instrument;

use crate::protocol::{PushChunk, Request};

/// Connection to one agent, owned by whoever opened it for its whole lifetime.
///
/// Generic over the underlying halves so it works with TCP or any in-memory pipe.
#[derive(Debug)]
pub struct AgentConnection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    recv: BufReader<R>,
    send: W,
}

impl AgentConnection {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(read_half, write_half)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> AgentConnection<R, W> {
    pub fn from_parts(read: R, write: W) -> Self {
        Self {
            recv: BufReader::new(read),
            send: write,
        }
    }

    /// Writes a request header and flushes it.
    pub async fn send_request(&mut self, request: &Request) -> std::io::Result<()> {
        self.send.write_all(request.header().as_bytes()).await?;
        self.send.flush().await
    }

    /// Writes one PUSH data request: header followed by the raw chunk.
    #[instrument(level = "trace", skip(self, data))]
    pub async fn send_push_data(&mut self, path: &str, data: &[u8]) -> std::io::Result<()> {
        let request = Request::Push {
            path: path.to_string(),
            chunk: PushChunk::Data(data.len()),
        };
        self.send.write_all(request.header().as_bytes()).await?;
        self.send.write_all(data).await?;
        self.send.flush().await
    }

    /// Reads at most `buf.len()` payload bytes; 0 means the peer closed the connection.
    pub async fn recv_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv.read(buf).await
    }

    /// Buffered reader for token-level parsing with [`crate::codec`].
    pub fn recv_mut(&mut self) -> &mut BufReader<R> {
        &mut self.recv
    }

    /// Raw writer for replies that are not requests (agent side).
    pub fn send_mut(&mut self) -> &mut W {
        &mut self.send
    }

    /// Half-closes the send side and collects whatever the peer sends until it closes.
    ///
    /// At most `max_len` bytes are kept; anything beyond that is drained and dropped.
    pub async fn finish(&mut self, max_len: usize) -> std::io::Result<Vec<u8>> {
        self.send.shutdown().await?;
        let mut kept = Vec::new();
        (&mut self.recv)
            .take(max_len as u64)
            .read_to_end(&mut kept)
            .await?;
        tokio::io::copy(&mut self.recv, &mut tokio::io::sink()).await?;
        Ok(kept)
    }
}
