/// Failure classes shared by the manager, its workers and the agents.
///
/// Each variant carries enough text to be shown to the command source or written
/// into the result log as-is.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `<dir>@<host>:<port>` spec could not be decoded.
    #[error("malformed spec {spec:?}: {reason}")]
    Format { spec: String, reason: &'static str },

    /// A peer sent a malformed or oversized token.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket creation, name resolution or connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failure on an established connection.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The pair is unknown to the registry (or no longer active).
    #[error("Directory not being synchronized: {0}")]
    NotFound(String),

    /// The pair is already being synchronized.
    #[error("Already in queue: {0}")]
    AlreadyActive(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
