//! Requests understood by a file-serving agent and the replies it sends back.
//!
//! ```text
//! LIST <dir>\n                    -> <name>\n ... .\n
//! PULL <dir>/<file><sp>           -> <size><sp><size raw bytes>  |  -1<sp><error text>
//! PUSH <dir>/<file> 0\n           open (create/truncate) the file
//! PUSH <dir>/<file> <n><sp><n raw bytes>   append
//! PUSH <dir>/<file> -1\n          close the file, end of the PUSH sequence
//! ```
//!
//! A connection carries exactly one LIST, one PULL, or one PUSH sequence.

use tokio::io::AsyncBufRead;

use crate::codec::{self, WireError};

/// Line that terminates a LIST reply.
pub const LIST_END: &str = ".";

/// Size token an agent sends instead of a byte count when a request failed.
pub const FAILURE_SIZE: i64 = -1;

/// One step of a PUSH sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushChunk {
    /// Create or truncate the target file.
    Open,
    /// Append the given number of raw bytes, which follow the header immediately.
    Data(usize),
    /// Close the file; no more requests follow on this connection.
    Close,
}

impl PushChunk {
    fn from_wire(size: i64) -> Result<Self, WireError> {
        match size {
            0 => Ok(PushChunk::Open),
            FAILURE_SIZE => Ok(PushChunk::Close),
            n if n > 0 => usize::try_from(n)
                .map(PushChunk::Data)
                .map_err(|_| WireError::InvalidNumber(n.to_string())),
            n => Err(WireError::InvalidNumber(n.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List { dir: String },
    Pull { path: String },
    Push { path: String, chunk: PushChunk },
}

impl Request {
    /// Wire form of the request header; PUSH data bytes are written separately.
    pub fn header(&self) -> String {
        match self {
            Request::List { dir } => format!("LIST {dir}\n"),
            Request::Pull { path } => format!("PULL {path} "),
            Request::Push {
                path,
                chunk: PushChunk::Open,
            } => format!("PUSH {path} 0\n"),
            Request::Push {
                path,
                chunk: PushChunk::Data(len),
            } => format!("PUSH {path} {len} "),
            Request::Push {
                path,
                chunk: PushChunk::Close,
            } => format!("PUSH {path} {FAILURE_SIZE}\n"),
        }
    }
}

/// Reads the next request header; `Ok(None)` when the peer closed the connection.
///
/// For [`PushChunk::Data`] the stream is left positioned at the first payload byte.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Request>, WireError> {
    let Some(verb) = codec::read_token(reader, codec::MAX_TOKEN_LEN).await? else {
        return Ok(None);
    };
    let request = match verb.as_str() {
        "LIST" => Request::List {
            dir: codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?,
        },
        "PULL" => Request::Pull {
            path: codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?,
        },
        "PUSH" => {
            let path = codec::expect_token(reader, codec::MAX_TOKEN_LEN).await?;
            let chunk = PushChunk::from_wire(codec::read_number(reader).await?)?;
            Request::Push { path, chunk }
        }
        _ => return Err(WireError::UnknownRequest(verb)),
    };
    Ok(Some(request))
}

/// Outcome of a PULL as announced by the source agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullReply {
    /// Exactly `size` raw bytes follow.
    Data { size: u64 },
    /// The agent could not serve the file.
    Failed { reason: String },
}

pub async fn read_pull_reply<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_error_text: usize,
) -> Result<PullReply, WireError> {
    let size = codec::read_number(reader).await?;
    if size < 0 {
        let reason = codec::read_error_text(reader, max_error_text).await?;
        return Ok(PullReply::Failed { reason });
    }
    Ok(PullReply::Data {
        size: size.unsigned_abs(),
    })
}
