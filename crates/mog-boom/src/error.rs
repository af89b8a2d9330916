/// Errors for the boom store.
///
/// Startup failures (snapshot, reconciliation) are fatal; runtime failures
/// are logged by the loops and only surface here when they happen during
/// shutdown cleanup.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BoomError {
    #[error("snapshot not found: {}", path.display())]
    SnapshotNotFound { path: PathBuf },

    #[error("corrupt snapshot {}: {source}", path.display())]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot io on {}: {source}", path.display())]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encode failed: {0}")]
    SnapshotEncode(#[source] serde_json::Error),

    #[error("reconcile channel {channel}: {source}")]
    Reconcile {
        channel: String,
        #[source]
        source: GatewayError,
    },

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("{}", join_display(.0))]
    Multiple(Vec<BoomError>),
}

impl BoomError {
    /// Collapse collected errors: none is `Ok`, one is itself, more become
    /// [`BoomError::Multiple`].
    pub fn join(mut errors: Vec<BoomError>) -> Result<(), BoomError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(BoomError::Multiple(errors)),
        }
    }

    /// True when a snapshot read failed only because the file is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BoomError::SnapshotNotFound { .. })
    }
}

fn join_display(errors: &[BoomError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors reported by a [`Gateway`](crate::gateway::Gateway) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The remote side does not know this message (already deleted).
    #[error("message not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("subscription {0} is not registered")]
    UnknownSubscription(u64),

    #[error("gateway is closed")]
    Closed,
}
