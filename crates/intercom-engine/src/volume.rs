//! Volume directives: persist a channel's default gain and, when the
//! directive reaches an open session on that channel, apply it live.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use intercom_core::audio::{clamp_gain, AudioSource};
use intercom_core::events::SessionEvent;
use intercom_core::ids::{ChannelId, SessionId};
use intercom_store::StoreError;

use crate::error::ControlError;
use crate::session::{SessionManager, SessionState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDirective {
    pub source: AudioSource,
    pub volume: f32,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeOutcome {
    /// The gain in effect after clamping.
    pub volume: f32,
    pub applied_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Clone)]
pub struct VolumeRouter {
    sessions: SessionManager,
}

impl VolumeRouter {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Persist first, then apply live. Only a directive naming the session
    /// open on the channel reaches the live mix; without a session id, or with
    /// any other id, it just updates the stored default.
    #[instrument(skip(self, directive), fields(channel_id = %directive.channel_id, source = %directive.source))]
    pub async fn set_volume(&self, directive: VolumeDirective) -> Result<VolumeOutcome, ControlError> {
        let volume = clamp_gain(directive.volume).ok_or_else(|| {
            ControlError::validation(
                "set_volume",
                format!("volume must be a finite number, got {}", directive.volume),
            )
        })?;
        let channel_id = directive.channel_id;

        // Serialize with session open and close on this channel.
        let slot = self.sessions.lock_channel(&channel_id).await;

        self.sessions
            .channels()
            .set_default_gain(&channel_id, directive.source, volume)
            .map_err(|e| match e {
                StoreError::NotFound(_) => ControlError::ChannelNotFound(channel_id.clone()),
                other => other.into(),
            })?;

        let live = slot
            .session
            .as_ref()
            .filter(|open| directive.session_id.as_ref() == Some(*open))
            .and_then(|open| self.sessions.session_arc(open))
            .filter(|s| s.state() == SessionState::Open && s.channel_id == channel_id);

        let session_id = live.as_ref().map(|s| s.id.clone());
        let applied_live = match &live {
            Some(session) => {
                session.gains().set(directive.source, volume);
                true
            }
            None => false,
        };
        drop(slot);

        self.sessions.metrics().volume_directive();
        self.sessions.emit(SessionEvent::Volume {
            session_id: session_id.clone(),
            channel_id: channel_id.clone(),
            source: directive.source,
            volume,
            applied_live,
        });
        if applied_live {
            info!(volume, session_id = ?session_id, "volume applied live");
        } else {
            debug!(volume, "volume persisted as channel default");
        }

        Ok(VolumeOutcome {
            volume,
            applied_live,
            session_id,
        })
    }
}
