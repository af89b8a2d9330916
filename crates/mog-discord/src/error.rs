use mog_boom::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status other than 429.
    #[error("discord returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The gateway broke protocol (missing hello, unacked heartbeat, close frame).
    #[error("gateway protocol: {0}")]
    Protocol(String),
}

impl DiscordError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DiscordError::Status { status, .. } => Some(*status),
            DiscordError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<DiscordError> for GatewayError {
    fn from(e: DiscordError) -> Self {
        match e {
            DiscordError::Status {
                status: 404,
                message,
            } => GatewayError::NotFound(message),
            DiscordError::Status { status, message } => GatewayError::Rejected { status, message },
            DiscordError::RateLimited { retry_after_ms } => {
                GatewayError::RateLimited { retry_after_ms }
            }
            other => GatewayError::Transport(other.to_string()),
        }
    }
}
