//! Session manager: the lifecycle of broadcast sessions, at most one open
//! per channel.
//!
//! Opening, closing and volume directives for a channel serialize on that
//! channel's slot lock. Open sessions live in a concurrent map so status and
//! playback calls never wait on another channel's lifecycle.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use intercom_core::audio::{FrameFormat, GainSet};
use intercom_core::events::{ConnectionStatus, SessionEvent};
use intercom_core::ids::{ChannelId, ContentId, GroupId, SessionId, SpeakerId};
use intercom_core::playlist::PlaylistKind;
use intercom_settings::IntercomSettings;
use intercom_store::{ChannelRepo, ChannelRow, Database, StoreError};
use intercom_telemetry::ControlMetrics;
use intercom_transport::{
    connect_with_retry, Connector, LinkConfig, LinkEvent, LinkStats, TransportError,
    TransportLink,
};

use crate::deck::{DeckContext, NowPlaying, PlayOutcome};
use crate::error::ControlError;
use crate::fetch::ContentFetcher;
use crate::gains::LiveGains;
use crate::mixer::MixLoop;
use crate::playback::PlaybackCoordinator;
use crate::resolver::SpeakerTargetResolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Closed,
    /// Held only under the channel's slot lock while `open` runs; no caller
    /// can observe a session in this state.
    Opening,
    Open,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        })
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub frame_ms: u32,
    pub fetch_timeout: Duration,
    pub microphone_queue: usize,
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub link: LinkConfig,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            fetch_timeout: Duration::from_secs(10),
            microphone_queue: 32,
            connect_timeout: Duration::from_secs(5),
            reconnect_attempts: 1,
            link: LinkConfig::default(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &IntercomSettings) -> Self {
        let audio = &settings.audio;
        let transport = &settings.transport;
        Self {
            frame_ms: audio.frame_ms.max(1),
            fetch_timeout: Duration::from_millis(audio.fetch_timeout_ms),
            microphone_queue: audio.microphone_queue.max(1),
            connect_timeout: Duration::from_millis(transport.connect_timeout_ms),
            reconnect_attempts: transport.reconnect_attempts,
            link: LinkConfig {
                send_timeout: Duration::from_millis(transport.send_timeout_ms),
                close_timeout: Duration::from_millis(transport.close_timeout_ms),
                outbound_queue: transport.outbound_queue,
            },
            ..Self::default()
        }
    }
}

/// Parameters of `open_session`.
#[derive(Clone, Debug, Default)]
pub struct OpenRequest {
    pub channel_id: ChannelId,
    /// Speakers to add to the channel before resolving targets.
    pub speaker_ids: Vec<SpeakerId>,
    /// Groups whose current members are added like `speaker_ids`.
    pub group_ids: Vec<GroupId>,
    pub loop_playback: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedSession {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    pub speaker_ids: Vec<SpeakerId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    pub state: SessionState,
    pub speaker_ids: Vec<SpeakerId>,
    pub opened_at: DateTime<Utc>,
    pub gains: GainSet,
    pub loop_playback: bool,
    pub link: LinkStats,
    pub tts: NowPlaying,
    pub media: NowPlaying,
}

/// A session from open until teardown.
pub struct LiveSession {
    pub id: SessionId,
    pub channel_id: ChannelId,
    pub speakers: Vec<SpeakerId>,
    pub format: FrameFormat,
    pub opened_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    gains: Arc<LiveGains>,
    playback: Arc<PlaybackCoordinator>,
    link: Arc<TransportLink>,
    microphone: mpsc::Sender<Vec<f32>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn gains(&self) -> &LiveGains {
        &self.gains
    }

    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    pub fn link_stats(&self) -> LinkStats {
        self.link.stats()
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            state: self.state(),
            speaker_ids: self.speakers.clone(),
            opened_at: self.opened_at,
            gains: self.gains.snapshot(),
            loop_playback: self.playback.looping(),
            link: self.link.stats(),
            tts: self.playback.deck(PlaylistKind::Tts).now_playing(),
            media: self.playback.deck(PlaylistKind::Media).now_playing(),
        }
    }
}

/// Which session, if any, a channel currently has open.
#[derive(Debug, Default)]
pub struct ChannelSlot {
    pub session: Option<SessionId>,
}

enum EndCause {
    Closed,
    Lost(String),
}

struct Inner {
    channels: ChannelRepo,
    resolver: SpeakerTargetResolver,
    connector: Arc<dyn Connector>,
    fetcher: Arc<dyn ContentFetcher>,
    config: EngineConfig,
    slots: DashMap<ChannelId, Arc<AsyncMutex<ChannelSlot>>>,
    sessions: DashMap<SessionId, Arc<LiveSession>>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<ControlMetrics>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        db: Database,
        connector: Arc<dyn Connector>,
        fetcher: Arc<dyn ContentFetcher>,
        config: EngineConfig,
        metrics: Arc<ControlMetrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                channels: ChannelRepo::new(db.clone()),
                resolver: SpeakerTargetResolver::new(db),
                connector,
                fetcher,
                config,
                slots: DashMap::new(),
                sessions: DashMap::new(),
                events,
                metrics,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn metrics(&self) -> &Arc<ControlMetrics> {
        &self.inner.metrics
    }

    pub fn resolver(&self) -> &SpeakerTargetResolver {
        &self.inner.resolver
    }

    pub(crate) fn channels(&self) -> &ChannelRepo {
        &self.inner.channels
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Hold the lifecycle lock of `channel`.
    pub(crate) async fn lock_channel(&self, channel: &ChannelId) -> OwnedMutexGuard<ChannelSlot> {
        let slot = Arc::clone(self.inner.slots.entry(channel.clone()).or_default().value());
        slot.lock_owned().await
    }

    pub(crate) fn session_arc(&self, id: &SessionId) -> Option<Arc<LiveSession>> {
        self.inner.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    #[instrument(skip(self, request), fields(channel_id = %request.channel_id))]
    pub async fn open(&self, request: OpenRequest) -> Result<OpenedSession, ControlError> {
        let mut slot = self.lock_channel(&request.channel_id).await;
        if let Some(existing) = slot.session.clone() {
            if self.inner.sessions.contains_key(&existing) {
                return Err(ControlError::AlreadyOpen {
                    channel_id: request.channel_id,
                    session_id: existing,
                });
            }
            slot.session = None;
        }

        let channel = self.channel_row(&request.channel_id)?;
        let (selection, targets) = self.prepare_targets(&channel, &request)?;
        let session_id = SessionId::new();

        let (link, link_events) = match self.connect(&channel, &session_id, &targets).await {
            Ok(established) => established,
            Err(source) => {
                self.inner.metrics.open_failed();
                warn!(channel_id = %channel.id, error = %source, "session open failed");
                self.emit(SessionEvent::ConnectionStatus {
                    session_id: session_id.clone(),
                    channel_id: channel.id.clone(),
                    status: ConnectionStatus::Failed,
                    reason: Some(source.to_string()),
                });
                return Err(ControlError::Transport {
                    operation: "open_session",
                    channel_id: channel.id,
                    session_id: Some(session_id),
                    source,
                });
            }
        };

        // Membership is written only after the far end accepts.
        if let Err(e) = self.persist_selection(&channel, &selection) {
            self.inner.metrics.open_failed();
            warn!(
                channel_id = %channel.id,
                error = %e,
                "persisting selection failed, dropping connection"
            );
            link.abort();
            return Err(e);
        }

        let session = self.start_session(&channel, session_id, targets, request.loop_playback, link, link_events);
        slot.session = Some(session.id.clone());
        self.inner
            .sessions
            .insert(session.id.clone(), Arc::clone(&session));

        self.inner.metrics.session_opened();
        self.emit(SessionEvent::ConnectionStatus {
            session_id: session.id.clone(),
            channel_id: session.channel_id.clone(),
            status: ConnectionStatus::Connected,
            reason: None,
        });
        info!(
            session_id = %session.id,
            channel_id = %session.channel_id,
            speakers = session.speakers.len(),
            "session opened"
        );

        Ok(OpenedSession {
            session_id: session.id.clone(),
            channel_id: session.channel_id.clone(),
            speaker_ids: session.speakers.clone(),
        })
    }

    /// Close a session. Closing one that is unknown or already closed
    /// succeeds without effect; returns whether this call closed it.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn close(&self, session_id: &SessionId) -> Result<bool, ControlError> {
        Ok(self.end(session_id, EndCause::Closed).await)
    }

    /// Close every open session, e.g. at shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.end(&id, EndCause::Closed).await;
        }
    }

    async fn end(&self, session_id: &SessionId, cause: EndCause) -> bool {
        let Some(channel_id) = self
            .inner
            .sessions
            .get(session_id)
            .map(|s| s.channel_id.clone())
        else {
            debug!(session_id = %session_id, "session already closed");
            return false;
        };

        let mut slot = self.lock_channel(&channel_id).await;
        let Some((_, session)) = self.inner.sessions.remove(session_id) else {
            return false;
        };
        if slot.session.as_ref() == Some(session_id) {
            slot.session = None;
        }
        self.teardown(&session, cause).await;
        true
    }

    async fn teardown(&self, session: &LiveSession, cause: EndCause) {
        session.set_state(SessionState::Closing);
        session.cancel.cancel();
        session.playback.shutdown();

        let (status, reason) = match cause {
            EndCause::Closed => {
                if session.link.close().await {
                    (ConnectionStatus::Disconnected, None)
                } else {
                    (ConnectionStatus::Lost, Some("connection ended before close".to_string()))
                }
            }
            EndCause::Lost(reason) => {
                session.link.abort();
                (ConnectionStatus::Lost, Some(reason))
            }
        };
        for task in session.tasks.lock().drain(..) {
            task.abort();
        }
        session.set_state(SessionState::Closed);

        let lost = status == ConnectionStatus::Lost;
        self.inner.metrics.session_ended(lost);
        let stats = session.link.stats();
        info!(
            session_id = %session.id,
            channel_id = %session.channel_id,
            lost,
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            "session closed"
        );
        self.emit(SessionEvent::ConnectionStatus {
            session_id: session.id.clone(),
            channel_id: session.channel_id.clone(),
            status,
            reason,
        });
    }

    fn channel_row(&self, id: &ChannelId) -> Result<ChannelRow, ControlError> {
        self.inner.channels.get(id).map_err(|e| match e {
            StoreError::NotFound(_) => ControlError::ChannelNotFound(id.clone()),
            other => other.into(),
        })
    }

    /// Validate the operator's selection and compute the targets the channel
    /// will have once it is persisted. Writes nothing.
    fn prepare_targets(
        &self,
        channel: &ChannelRow,
        request: &OpenRequest,
    ) -> Result<(Vec<SpeakerId>, Vec<SpeakerId>), ControlError> {
        let resolver = &self.inner.resolver;
        let selection = resolver.expand_selection(&request.speaker_ids, &request.group_ids)?;
        resolver
            .membership()
            .check_speakers(&selection)
            .map_err(selection_error)?;

        let mut targets: BTreeSet<SpeakerId> = resolver.resolve(&channel.id)?.into_iter().collect();
        targets.extend(selection.iter().cloned());
        if targets.is_empty() {
            return Err(ControlError::validation(
                "open_session",
                format!("channel {} has no speakers to broadcast to", channel.id),
            ));
        }
        Ok((selection, targets.into_iter().collect()))
    }

    fn persist_selection(
        &self,
        channel: &ChannelRow,
        selection: &[SpeakerId],
    ) -> Result<(), ControlError> {
        if selection.is_empty() {
            return Ok(());
        }
        self.inner
            .resolver
            .membership()
            .assign_speakers(&channel.id, selection)
            .map(|_| ())
            .map_err(selection_error)
    }

    async fn connect(
        &self,
        channel: &ChannelRow,
        session_id: &SessionId,
        targets: &[SpeakerId],
    ) -> Result<(TransportLink, mpsc::UnboundedReceiver<LinkEvent>), TransportError> {
        let config = &self.inner.config;
        let conn = connect_with_retry(
            self.inner.connector.as_ref(),
            &channel.id,
            config.connect_timeout,
            config.reconnect_attempts,
        )
        .await?;
        TransportLink::establish(
            conn,
            session_id.clone(),
            channel.id.clone(),
            targets.to_vec(),
            config.link.clone(),
        )
        .await
    }

    fn start_session(
        &self,
        channel: &ChannelRow,
        session_id: SessionId,
        speakers: Vec<SpeakerId>,
        loop_playback: bool,
        link: TransportLink,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Arc<LiveSession> {
        let config = &self.inner.config;
        let format = channel.frame_format(config.frame_ms);
        let cancel = CancellationToken::new();
        let link = Arc::new(link);
        let gains = Arc::new(LiveGains::new(channel.gains));
        let playback = Arc::new(PlaybackCoordinator::start(
            DeckContext {
                session_id: session_id.clone(),
                channel_id: channel.id.clone(),
                format,
                looping: Arc::default(),
                fetcher: Arc::clone(&self.inner.fetcher),
                fetch_timeout: config.fetch_timeout,
                events: self.inner.events.clone(),
            },
            loop_playback,
        ));
        let (microphone, microphone_rx) = mpsc::channel(config.microphone_queue);

        let mixer = tokio::spawn(
            MixLoop {
                session_id: session_id.clone(),
                format,
                gains: Arc::clone(&gains),
                playback: Arc::clone(&playback),
                link: Arc::clone(&link),
                microphone: microphone_rx,
                metrics: Arc::clone(&self.inner.metrics),
                cancel: cancel.clone(),
            }
            .run(),
        );
        let pump = spawn_link_pump(
            Arc::downgrade(&self.inner),
            session_id.clone(),
            channel.id.clone(),
            link_events,
        );

        Arc::new(LiveSession {
            id: session_id,
            channel_id: channel.id.clone(),
            speakers,
            format,
            opened_at: Utc::now(),
            state: RwLock::new(SessionState::Open),
            gains,
            playback,
            link,
            microphone,
            cancel,
            tasks: Mutex::new(vec![mixer, pump]),
        })
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn summary(&self, id: &SessionId) -> Result<SessionSummary, ControlError> {
        self.session_arc(id)
            .map(|s| s.summary())
            .ok_or_else(|| ControlError::SessionNotFound(id.clone()))
    }

    /// Open sessions, ordered by channel.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> =
            self.inner.sessions.iter().map(|s| s.summary()).collect();
        sessions.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        sessions
    }

    /// The open session on `channel`, if any.
    pub fn session_for_channel(&self, channel: &ChannelId) -> Option<SessionId> {
        self.inner
            .sessions
            .iter()
            .find(|s| &s.channel_id == channel)
            .map(|s| s.id.clone())
    }

    /// Where microphone frames for a session go, and the layout they must be
    /// in.
    pub fn microphone_sender(
        &self,
        id: &SessionId,
    ) -> Result<(mpsc::Sender<Vec<f32>>, FrameFormat), ControlError> {
        let session = self.open_session(id)?;
        Ok((session.microphone.clone(), session.format))
    }

    // ─── Playback ────────────────────────────────────────────────────────

    fn open_session(&self, id: &SessionId) -> Result<Arc<LiveSession>, ControlError> {
        let session = self
            .session_arc(id)
            .ok_or_else(|| ControlError::SessionNotFound(id.clone()))?;
        match session.state() {
            SessionState::Open => Ok(session),
            state => Err(ControlError::SessionNotOpen {
                session_id: id.clone(),
                state,
            }),
        }
    }

    fn playback(&self, id: &SessionId) -> Result<Arc<PlaybackCoordinator>, ControlError> {
        let session = self.open_session(id)?;
        self.inner.metrics.playback_command();
        Ok(Arc::clone(&session.playback))
    }

    pub async fn play(
        &self,
        id: &SessionId,
        kind: PlaylistKind,
        items: Vec<ContentId>,
        shuffle: bool,
    ) -> Result<PlayOutcome, ControlError> {
        self.playback(id)?.deck(kind).play(items, shuffle).await
    }

    pub async fn stop(&self, id: &SessionId, kind: PlaylistKind) -> Result<(), ControlError> {
        self.playback(id)?.deck(kind).stop().await;
        Ok(())
    }

    pub async fn pause(&self, id: &SessionId, kind: PlaylistKind) -> Result<(), ControlError> {
        self.playback(id)?.deck(kind).pause().await
    }

    pub async fn resume(&self, id: &SessionId, kind: PlaylistKind) -> Result<(), ControlError> {
        self.playback(id)?.deck(kind).resume().await
    }

    pub async fn seek(
        &self,
        id: &SessionId,
        kind: PlaylistKind,
        seconds: f64,
    ) -> Result<f64, ControlError> {
        self.playback(id)?.deck(kind).seek(seconds).await
    }

    pub async fn skip_next(
        &self,
        id: &SessionId,
        kind: PlaylistKind,
    ) -> Result<Option<ContentId>, ControlError> {
        self.playback(id)?.deck(kind).skip_next().await
    }

    pub fn now_playing(&self, id: &SessionId, kind: PlaylistKind) -> Result<NowPlaying, ControlError> {
        Ok(self.open_session(id)?.playback.deck(kind).now_playing())
    }

    pub fn set_loop(&self, id: &SessionId, enabled: bool) -> Result<(), ControlError> {
        self.playback(id)?.set_loop(enabled);
        Ok(())
    }
}

fn selection_error(e: StoreError) -> ControlError {
    match e {
        StoreError::NotFound(what) => ControlError::validation("open_session", format!("unknown {what}")),
        other => other.into(),
    }
}

/// Forward link events as session events. A lost connection tears the
/// session down from a separate task so the pump is never aborting itself.
fn spawn_link_pump(
    inner: Weak<Inner>,
    session_id: SessionId,
    channel_id: ChannelId,
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = link_events.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            match event {
                LinkEvent::Status(stats) => {
                    let _ = inner.events.send(SessionEvent::DeliveryStats {
                        session_id: session_id.clone(),
                        channel_id: channel_id.clone(),
                        stats,
                    });
                }
                LinkEvent::Lost { reason } => {
                    let manager = SessionManager { inner };
                    let session_id = session_id.clone();
                    tokio::spawn(async move {
                        manager.end(&session_id, EndCause::Lost(reason)).await;
                    });
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use intercom_core::audio::AudioSource;
    use intercom_store::SpeakerRepo;
    use intercom_transport::mock::MockConnector;

    use crate::mock::StaticFetcher;

    struct Fixture {
        db: Database,
        channel: ChannelId,
        speaker: SpeakerId,
        connector: Arc<MockConnector>,
        manager: SessionManager,
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig {
            frame_ms: 10,
            ..EngineConfig::default()
        })
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let db = Database::in_memory().unwrap();
        let channel = ChannelRepo::new(db.clone())
            .create("Hall", GainSet::default(), 8_000, 1)
            .unwrap()
            .id;
        let speaker = SpeakerRepo::new(db.clone()).create("Hall left", None).unwrap().id;
        let connector = Arc::new(MockConnector::new());
        let manager = SessionManager::new(
            db.clone(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(StaticFetcher::new()),
            config,
            Arc::new(ControlMetrics::new()),
        );
        Fixture {
            db,
            channel,
            speaker,
            connector,
            manager,
        }
    }

    impl Fixture {
        fn request(&self) -> OpenRequest {
            OpenRequest {
                channel_id: self.channel.clone(),
                speaker_ids: vec![self.speaker.clone()],
                ..OpenRequest::default()
            }
        }
    }

    async fn wait_for_lost(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::ConnectionStatus { status, .. }) = events.recv().await {
                    if status == ConnectionStatus::Lost {
                        return;
                    }
                }
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn open_sends_connect_with_targets() {
        let f = fixture();
        let opened = f.manager.open(f.request()).await.unwrap();
        assert_eq!(opened.speaker_ids, vec![f.speaker.clone()]);

        let remote = f.connector.last_remote().unwrap();
        let first = remote.sent().into_iter().next().unwrap();
        assert_eq!(first.type_name(), "connect");
        assert_eq!(f.manager.summary(&opened.session_id).unwrap().state, SessionState::Open);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn second_open_on_channel_is_rejected() {
        let f = fixture();
        let first = f.manager.open(f.request()).await.unwrap();
        let err = f.manager.open(f.request()).await.unwrap_err();
        assert_eq!(err.error_code(), "SESSION_ALREADY_OPEN");
        assert_eq!(f.manager.list().len(), 1);

        f.manager.close(&first.session_id).await.unwrap();
        let again = f.manager.open(f.request()).await.unwrap();
        assert_ne!(again.session_id, first.session_id);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn unknown_channel_and_speaker() {
        let f = fixture();
        let err = f
            .manager
            .open(OpenRequest {
                channel_id: ChannelId::from_raw("chan_missing"),
                ..f.request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CHANNEL_NOT_FOUND");

        let err = f
            .manager
            .open(OpenRequest {
                speaker_ids: vec![SpeakerId::from_raw("spk_missing")],
                ..f.request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMS");
        assert_eq!(f.connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn channel_without_targets_is_rejected() {
        let f = fixture();
        let err = f
            .manager
            .open(OpenRequest {
                speaker_ids: vec![],
                ..f.request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn connect_failure_reports_transport_error() {
        let f = fixture();
        let mut events = f.manager.subscribe();
        f.connector.fail_next_connects(2);
        let err = f.manager.open(f.request()).await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
        assert_eq!(f.connector.connect_attempts(), 2);
        assert!(f.manager.list().is_empty());

        match events.recv().await.unwrap() {
            SessionEvent::ConnectionStatus { status, .. } => {
                assert_eq!(status, ConnectionStatus::Failed)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.manager.metrics().snapshot().open_failures, 1);
    }

    #[tokio::test]
    async fn one_retry_recovers_open() {
        let f = fixture();
        f.connector.fail_next_connects(1);
        assert!(f.manager.open(f.request()).await.is_ok());
        assert_eq!(f.connector.connect_attempts(), 2);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn close_twice_succeeds() {
        let f = fixture();
        let opened = f.manager.open(f.request()).await.unwrap();
        assert!(f.manager.close(&opened.session_id).await.unwrap());
        assert!(!f.manager.close(&opened.session_id).await.unwrap());
        assert!(!f
            .manager
            .close(&SessionId::from_raw("bcast_never"))
            .await
            .unwrap());

        let remote = f.connector.last_remote().unwrap();
        assert_eq!(remote.count_of("disconnect"), 1);
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn operations_on_closed_session_fail() {
        let f = fixture();
        let opened = f.manager.open(f.request()).await.unwrap();
        f.manager.close(&opened.session_id).await.unwrap();
        let err = f
            .manager
            .play(&opened.session_id, PlaylistKind::Media, vec![ContentId::from_raw("x")], false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
        assert!(f.manager.set_loop(&opened.session_id, true).is_err());
    }

    #[tokio::test]
    async fn session_seeded_from_channel_defaults() {
        let f = fixture();
        ChannelRepo::new(f.db.clone())
            .set_default_gain(&f.channel, AudioSource::Tts, 0.3)
            .unwrap();
        let opened = f.manager.open(f.request()).await.unwrap();
        let summary = f.manager.summary(&opened.session_id).unwrap();
        assert!((summary.gains.tts - 0.3).abs() < 1e-6);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn lost_connection_closes_session() {
        let f = fixture();
        let mut events = f.manager.subscribe();
        let opened = f.manager.open(f.request()).await.unwrap();
        f.connector.last_remote().unwrap().drop_connection();

        assert!(wait_for_lost(&mut events).await);
        assert!(f.manager.summary(&opened.session_id).is_err());
        assert_eq!(f.manager.metrics().snapshot().sessions_lost, 1);

        // The channel is free again.
        f.manager.open(f.request()).await.unwrap();
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn stalled_send_times_out_and_frees_the_channel() {
        let f = fixture_with(EngineConfig {
            frame_ms: 10,
            link: LinkConfig {
                send_timeout: Duration::from_millis(50),
                ..LinkConfig::default()
            },
            ..EngineConfig::default()
        });
        let mut events = f.manager.subscribe();
        let opened = f.manager.open(f.request()).await.unwrap();
        f.connector.last_remote().unwrap().stall_sends(true);

        assert!(wait_for_lost(&mut events).await);
        assert_eq!(
            f.manager.summary(&opened.session_id).unwrap_err().error_code(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(f.manager.metrics().snapshot().sessions_lost, 1);

        let again = f.manager.open(f.request()).await.unwrap();
        assert_ne!(again.session_id, opened.session_id);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn concurrent_opens_on_one_channel_admit_one() {
        let f = fixture();
        let (a, b) = tokio::join!(f.manager.open(f.request()), f.manager.open(f.request()));

        let (winner, loser) = match (a, b) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            (a, b) => panic!("expected exactly one open, got {a:?} and {b:?}"),
        };
        assert_eq!(loser.error_code(), "SESSION_ALREADY_OPEN");
        assert_eq!(f.manager.list().len(), 1);
        assert_eq!(f.manager.session_for_channel(&f.channel), Some(winner.session_id));
        assert_eq!(f.connector.connect_attempts(), 1);
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn close_racing_open_leaves_registry_consistent() {
        let f = fixture();
        let first = f.manager.open(f.request()).await.unwrap();

        let (closed, reopened) = tokio::join!(
            f.manager.close(&first.session_id),
            f.manager.open(f.request())
        );
        assert!(closed.unwrap());

        match reopened {
            Ok(second) => {
                assert_eq!(f.manager.list().len(), 1);
                assert_eq!(f.manager.session_for_channel(&f.channel), Some(second.session_id));
            }
            Err(e) => {
                assert_eq!(e.error_code(), "SESSION_ALREADY_OPEN");
                assert!(f.manager.list().is_empty());
                assert!(f.manager.session_for_channel(&f.channel).is_none());
            }
        }
        assert!(f.manager.summary(&first.session_id).is_err());
        f.manager.close_all().await;
    }

    #[tokio::test]
    async fn failed_open_leaves_membership_untouched() {
        let f = fixture();
        f.connector.fail_next_connects(2);
        let err = f.manager.open(f.request()).await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
        assert!(f.manager.resolver().resolve(&f.channel).unwrap().is_empty());

        let opened = f.manager.open(f.request()).await.unwrap();
        assert_eq!(opened.speaker_ids, vec![f.speaker.clone()]);
        assert_eq!(f.manager.resolver().resolve(&f.channel).unwrap(), vec![f.speaker.clone()]);
        f.manager.close_all().await;
    }
}
