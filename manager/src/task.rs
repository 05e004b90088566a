use common::PairKey;

/// One file's worth of copy work.
///
/// Never mutated after creation; a cancelled task is dropped from the queue as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub filename: String,
    pub source: PairKey,
    pub target: PairKey,
}

impl Task {
    pub fn new(filename: impl Into<String>, source: PairKey, target: PairKey) -> Self {
        Self {
            filename: filename.into(),
            source,
            target,
        }
    }
}

/// `<filename> <source spec> <target spec>`
impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.filename, self.source, self.target)
    }
}

/// What a worker can pull out of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    Transfer(Task),
    /// Stop the worker that dequeues it; one is enqueued per worker on shutdown.
    Shutdown,
}

impl QueueEntry {
    /// Source key of a transfer; the shutdown entry belongs to no pair.
    pub fn source(&self) -> Option<&PairKey> {
        match self {
            QueueEntry::Transfer(task) => Some(&task.source),
            QueueEntry::Shutdown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_space_delimited() {
        let task = Task::new(
            "a.txt",
            PairKey::from("docs@127.0.0.1:9001"),
            PairKey::from("backup@127.0.0.1:9002"),
        );
        assert_eq!(
            task.to_string(),
            "a.txt docs@127.0.0.1:9001 backup@127.0.0.1:9002"
        );
    }

    #[test]
    fn shutdown_matches_no_pair() {
        // a file literally named like the sentinel is still a regular transfer
        let task = Task::new(
            "shutdown",
            PairKey::from("shutdown"),
            PairKey::from("backup@127.0.0.1:9002"),
        );
        assert_eq!(
            QueueEntry::Transfer(task).source(),
            Some(&PairKey::from("shutdown"))
        );
        assert_eq!(QueueEntry::Shutdown.source(), None);
    }
}
