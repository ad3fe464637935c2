#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("connect to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    #[error("send failed: {0}")]
    Send(String),

    #[error("send timed out after {timeout_ms}ms")]
    SendTimeout { timeout_ms: u64 },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    QueueFull,

    #[error("envelope codec: {0}")]
    Codec(String),
}

impl TransportError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint { .. } => "invalid_endpoint",
            Self::Connect { .. } => "connect_failed",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Send(_) => "send_failed",
            Self::SendTimeout { .. } => "send_timeout",
            Self::Receive(_) => "receive_failed",
            Self::Closed => "closed",
            Self::QueueFull => "queue_full",
            Self::Codec(_) => "codec",
        }
    }

    /// Whether another connect attempt could succeed.
    pub fn is_connect_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
