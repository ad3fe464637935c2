//! Text envelopes exchanged with a channel endpoint.
//!
//! Every message is one JSON object tagged by `type`. Audio payloads travel
//! base64-encoded inside the text frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use intercom_core::events::DeliveryStats;
use intercom_core::ids::{ChannelId, SessionId, SpeakerId};

use crate::error::TransportError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// First message on a new connection.
    #[serde(rename_all = "camelCase")]
    Connect {
        session_id: SessionId,
        channel_id: ChannelId,
        speaker_ids: Vec<SpeakerId>,
    },

    #[serde(rename_all = "camelCase")]
    Audio {
        session_id: SessionId,
        /// Base64 of the frame bytes.
        data: String,
        timestamp: String,
    },

    /// Last message before an orderly close.
    #[serde(rename_all = "camelCase")]
    Disconnect { session_id: SessionId },

    /// Delivery telemetry from the far end.
    #[serde(rename_all = "camelCase")]
    Status {
        packet_count: u64,
        total_bytes: u64,
        duration_seconds: f64,
    },
}

impl Envelope {
    pub fn audio(session_id: SessionId, frame: &[u8], at: DateTime<Utc>) -> Self {
        Self::Audio {
            session_id,
            data: STANDARD.encode(frame),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn status(stats: DeliveryStats) -> Self {
        Self::Status {
            packet_count: stats.packet_count,
            total_bytes: stats.total_bytes,
            duration_seconds: stats.duration_seconds,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Audio { .. } => "audio",
            Self::Disconnect { .. } => "disconnect",
            Self::Status { .. } => "status",
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decoded frame bytes of an `audio` envelope.
    pub fn audio_payload(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self {
            Self::Audio { data, .. } => STANDARD
                .decode(data)
                .map(Some)
                .map_err(|e| TransportError::Codec(format!("audio payload: {e}"))),
            _ => Ok(None),
        }
    }

    pub fn delivery_stats(&self) -> Option<DeliveryStats> {
        match self {
            Self::Status {
                packet_count,
                total_bytes,
                duration_seconds,
            } => Some(DeliveryStats {
                packet_count: *packet_count,
                total_bytes: *total_bytes,
                duration_seconds: *duration_seconds,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_wire_shape() {
        let env = Envelope::Connect {
            session_id: SessionId::from_raw("bcast_1"),
            channel_id: ChannelId::from_raw("chan_1"),
            speaker_ids: vec![SpeakerId::from_raw("spk_a"), SpeakerId::from_raw("spk_b")],
        };
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "connect",
                "sessionId": "bcast_1",
                "channelId": "chan_1",
                "speakerIds": ["spk_a", "spk_b"],
            })
        );
    }

    #[test]
    fn audio_carries_base64_payload() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let env = Envelope::audio(SessionId::from_raw("bcast_1"), &[0, 1, 254, 255], at);
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "audio");
        assert_eq!(value["data"], "AAH+/w==");
        assert_eq!(value["timestamp"], "2026-03-01T10:00:00.000Z");
        assert_eq!(env.audio_payload().unwrap(), Some(vec![0, 1, 254, 255]));
    }

    #[test]
    fn status_decodes_from_far_end() {
        let env = Envelope::decode(
            r#"{"type":"status","packetCount":120,"totalBytes":76800,"durationSeconds":2.4}"#,
        )
        .unwrap();
        let stats = env.delivery_stats().unwrap();
        assert_eq!(stats.packet_count, 120);
        assert_eq!(stats.total_bytes, 76_800);
        assert!((stats.duration_seconds - 2.4).abs() < f64::EPSILON);
    }

    #[test]
    fn disconnect_wire_shape() {
        let env = Envelope::Disconnect {
            session_id: SessionId::from_raw("bcast_9"),
        };
        assert_eq!(
            env.encode().unwrap(),
            r#"{"type":"disconnect","sessionId":"bcast_9"}"#
        );
    }

    #[test]
    fn unknown_type_is_codec_error() {
        let err = Envelope::decode(r#"{"type":"hello"}"#).unwrap_err();
        assert_eq!(err.error_kind(), "codec");
    }

    #[test]
    fn corrupt_audio_payload_rejected() {
        let env = Envelope::Audio {
            session_id: SessionId::from_raw("bcast_1"),
            data: "***".into(),
            timestamp: String::new(),
        };
        assert!(env.audio_payload().is_err());
    }
}
