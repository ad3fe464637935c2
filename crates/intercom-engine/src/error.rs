use intercom_core::errors::ErrorKind;
use intercom_core::ids::{ChannelId, SessionId};
use intercom_core::playlist::PlaylistKind;
use intercom_store::StoreError;
use intercom_transport::TransportError;

use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{operation}: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("channel {channel_id} already has open session {session_id}")]
    AlreadyOpen {
        channel_id: ChannelId,
        session_id: SessionId,
    },

    #[error("session {session_id} is {state}, not open")]
    SessionNotOpen {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("{operation} on channel {channel_id}: {source}")]
    Transport {
        operation: &'static str,
        channel_id: ChannelId,
        session_id: Option<SessionId>,
        #[source]
        source: TransportError,
    },

    #[error("{playlist} {operation} in session {session_id}: {reason}")]
    Sequencer {
        playlist: PlaylistKind,
        session_id: SessionId,
        operation: &'static str,
        reason: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ControlError {
    pub fn validation(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            operation,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::ChannelNotFound(_)
            | Self::SessionNotFound(_)
            | Self::AlreadyOpen { .. }
            | Self::SessionNotOpen { .. } => ErrorKind::Validation,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Sequencer { .. } => ErrorKind::Sequencer,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "INVALID_PARAMS",
            Self::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::AlreadyOpen { .. } => "SESSION_ALREADY_OPEN",
            Self::SessionNotOpen { .. } => "SESSION_NOT_OPEN",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Sequencer { .. } => "SEQUENCER_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_mapping() {
        assert_eq!(
            ControlError::validation("set_volume", "not finite").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ControlError::SessionNotFound(SessionId::from_raw("bcast_x")).kind(),
            ErrorKind::Validation
        );
        let transport = ControlError::Transport {
            operation: "open_session",
            channel_id: ChannelId::from_raw("chan_1"),
            session_id: None,
            source: TransportError::Closed,
        };
        assert_eq!(transport.kind(), ErrorKind::Transport);
        assert!(transport.kind().is_retryable());
        assert_eq!(transport.error_code(), "TRANSPORT_ERROR");
    }

    #[test]
    fn sequencer_error_names_context() {
        let err = ControlError::Sequencer {
            playlist: PlaylistKind::Media,
            session_id: SessionId::from_raw("bcast_7"),
            operation: "play",
            reason: "empty playlist".into(),
        };
        let text = err.to_string();
        assert!(text.contains("media"));
        assert!(text.contains("bcast_7"));
        assert!(text.contains("play"));
        assert_eq!(err.kind(), ErrorKind::Sequencer);
    }

    #[test]
    fn store_errors_are_internal() {
        let err = ControlError::from(StoreError::Database("locked".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.error_code(), "STORE_ERROR");
    }
}
