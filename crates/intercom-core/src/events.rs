use serde::{Deserialize, Serialize};

use crate::audio::AudioSource;
use crate::ids::{ChannelId, ContentId, SessionId};
use crate::playlist::{PlaylistKind, SequencerStatus};

/// Connection lifecycle of a session's transport, as reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Dropped before an orderly `disconnect` was exchanged.
    Lost,
    /// Never established.
    Failed,
}

/// Delivery telemetry reported by the far end of a session transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub packet_count: u64,
    pub total_bytes: u64,
    pub duration_seconds: f64,
}

/// Events emitted by the control plane for monitoring and UI.
/// None of them feed back into control decisions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionStatus {
        session_id: SessionId,
        channel_id: ChannelId,
        status: ConnectionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    DeliveryStats {
        session_id: SessionId,
        channel_id: ChannelId,
        #[serde(flatten)]
        stats: DeliveryStats,
    },

    Playback {
        session_id: SessionId,
        channel_id: ChannelId,
        playlist: PlaylistKind,
        status: SequencerStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item: Option<ContentId>,
    },

    Volume {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        channel_id: ChannelId,
        source: AudioSource,
        volume: f32,
        applied_live: bool,
    },

    SequencerError {
        session_id: SessionId,
        channel_id: ChannelId,
        playlist: PlaylistKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item: Option<ContentId>,
        message: String,
    },
}

impl SessionEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::ConnectionStatus { channel_id, .. }
            | Self::DeliveryStats { channel_id, .. }
            | Self::Playback { channel_id, .. }
            | Self::Volume { channel_id, .. }
            | Self::SequencerError { channel_id, .. } => channel_id,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::ConnectionStatus { session_id, .. }
            | Self::DeliveryStats { session_id, .. }
            | Self::Playback { session_id, .. }
            | Self::SequencerError { session_id, .. } => Some(session_id),
            Self::Volume { session_id, .. } => session_id.as_ref(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::DeliveryStats { .. } => "delivery_stats",
            Self::Playback { .. } => "playback",
            Self::Volume { .. } => "volume",
            Self::SequencerError { .. } => "sequencer_error",
        }
    }
}
