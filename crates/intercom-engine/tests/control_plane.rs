//! End-to-end behaviour of the control plane against the in-memory
//! connector: what the far end actually receives.

use std::sync::Arc;
use std::time::Duration;

use intercom_core::audio::{decode_pcm16, AudioSource, GainSet};
use intercom_core::ids::{ChannelId, ContentId, SessionId, SpeakerId};
use intercom_core::playlist::{PlaylistKind, SequencerStatus};
use intercom_engine::mock::StaticFetcher;
use intercom_engine::{
    EngineConfig, OpenRequest, SessionManager, VolumeDirective, VolumeRouter,
};
use intercom_store::{ChannelRepo, Database, GroupRepo, MembershipRepo, SpeakerRepo};
use intercom_telemetry::ControlMetrics;
use intercom_transport::mock::{MockConnector, MockRemote};
use intercom_transport::{Connector, Envelope};

struct Plane {
    db: Database,
    channel: ChannelId,
    connector: Arc<MockConnector>,
    manager: SessionManager,
    router: VolumeRouter,
}

/// 1 kHz mono with 10 ms frames: ten samples per frame.
fn plane() -> Plane {
    let db = Database::in_memory().unwrap();
    let channel = ChannelRepo::new(db.clone())
        .create("Concourse", GainSet::default(), 1_000, 1)
        .unwrap()
        .id;
    let fetcher = StaticFetcher::new()
        .with_constant("tone", "Tone", 0.25, 100_000)
        .with_constant("chime", "Chime", 0.5, 100_000)
        .with_constant("short", "Short", 0.1, 30);
    let connector = Arc::new(MockConnector::new());
    let manager = SessionManager::new(
        db.clone(),
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::new(fetcher),
        EngineConfig {
            frame_ms: 10,
            ..EngineConfig::default()
        },
        Arc::new(ControlMetrics::new()),
    );
    Plane {
        router: VolumeRouter::new(manager.clone()),
        db,
        channel,
        connector,
        manager,
    }
}

impl Plane {
    fn speaker(&self, name: &str) -> SpeakerId {
        SpeakerRepo::new(self.db.clone()).create(name, None).unwrap().id
    }

    async fn open(&self) -> (intercom_engine::OpenedSession, MockRemote) {
        let speaker = self.speaker("Gate 1");
        let opened = self
            .manager
            .open(OpenRequest {
                channel_id: self.channel.clone(),
                speaker_ids: vec![speaker],
                ..OpenRequest::default()
            })
            .await
            .unwrap();
        let remote = self.connector.remote_for(&self.channel).unwrap();
        (opened, remote)
    }

    async fn set(&self, session: &SessionId, source: AudioSource, volume: f32) {
        let outcome = self
            .router
            .set_volume(VolumeDirective {
                source,
                volume,
                channel_id: self.channel.clone(),
                session_id: Some(session.clone()),
            })
            .await
            .unwrap();
        assert!(outcome.applied_live);
    }
}

fn audio_frames(remote: &MockRemote) -> Vec<Vec<f32>> {
    remote
        .sent()
        .iter()
        .filter_map(|e| e.audio_payload().ok().flatten())
        .map(|bytes| decode_pcm16(&bytes))
        .collect()
}

/// The newest frame, after letting a few ticks pass.
async fn latest_frame(remote: &MockRemote) -> Vec<f32> {
    tokio::time::sleep(Duration::from_millis(80)).await;
    audio_frames(remote).pop().unwrap()
}

fn all_near(frame: &[f32], value: f32) -> bool {
    !frame.is_empty() && frame.iter().all(|s| (s - value).abs() < 1e-3)
}

#[tokio::test]
async fn master_gain_scales_the_mix() {
    let p = plane();
    let (opened, remote) = p.open().await;
    p.manager
        .play(&opened.session_id, PlaylistKind::Media, vec![ContentId::from_raw("tone")], false)
        .await
        .unwrap();
    p.manager
        .play(&opened.session_id, PlaylistKind::Tts, vec![ContentId::from_raw("chime")], false)
        .await
        .unwrap();

    p.set(&opened.session_id, AudioSource::Master, 0.0).await;
    let silent = latest_frame(&remote).await;
    assert!(all_near(&silent, 0.0), "expected silence, got {silent:?}");

    p.set(&opened.session_id, AudioSource::Master, 1.0).await;
    let full = latest_frame(&remote).await;
    assert!(all_near(&full, 0.75), "expected unattenuated sum, got {full:?}");

    p.set(&opened.session_id, AudioSource::Media, 0.0).await;
    let tts_only = latest_frame(&remote).await;
    assert!(all_near(&tts_only, 0.5), "expected tts only, got {tts_only:?}");

    p.manager.close_all().await;
}

#[tokio::test]
async fn directive_without_session_id_does_not_touch_the_mix() {
    let p = plane();
    let (opened, remote) = p.open().await;
    p.manager
        .play(&opened.session_id, PlaylistKind::Media, vec![ContentId::from_raw("tone")], false)
        .await
        .unwrap();

    let outcome = p
        .router
        .set_volume(VolumeDirective {
            source: AudioSource::Master,
            volume: 0.0,
            channel_id: p.channel.clone(),
            session_id: None,
        })
        .await
        .unwrap();
    assert!(!outcome.applied_live);

    let frame = latest_frame(&remote).await;
    assert!(all_near(&frame, 0.25), "live mix changed: {frame:?}");
    let stored = ChannelRepo::new(p.db.clone()).get(&p.channel).unwrap().gains;
    assert_eq!(stored.master, 0.0);
    p.manager.close_all().await;
}

#[tokio::test]
async fn frames_are_tagged_with_the_session() {
    let p = plane();
    let (opened, remote) = p.open().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    p.manager.close(&opened.session_id).await.unwrap();

    let sent = remote.sent();
    assert_eq!(sent.first().map(Envelope::type_name), Some("connect"));
    assert_eq!(sent.last().map(Envelope::type_name), Some("disconnect"));
    assert!(sent.iter().filter(|e| e.type_name() == "audio").count() > 0);
    for envelope in &sent {
        if let Envelope::Audio { session_id, .. } = envelope {
            assert_eq!(session_id, &opened.session_id);
        }
    }
    assert!(p.manager.metrics().snapshot().frames_sent > 0);
}

#[tokio::test]
async fn microphone_input_is_mixed() {
    let p = plane();
    let (opened, remote) = p.open().await;
    p.set(&opened.session_id, AudioSource::Microphone, 0.5).await;

    let (mic, format) = p.manager.microphone_sender(&opened.session_id).unwrap();
    assert_eq!(format.samples_per_frame(), 10);
    mic.send(vec![0.8; 10]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let frames = audio_frames(&remote);
    assert!(frames.iter().any(|f| all_near(f, 0.4)));
    p.manager.close_all().await;
}

#[tokio::test]
async fn targets_combine_selection_and_groups() {
    let p = plane();
    let (s1, s2, s3) = (p.speaker("S1"), p.speaker("S2"), p.speaker("S3"));
    let groups = GroupRepo::new(p.db.clone());
    let membership = MembershipRepo::new(p.db.clone());
    let g = groups.create("Platform").unwrap().id;
    membership.map_speaker_to_group(&s3, &g).unwrap();
    membership.map_group_to_channel(&g, &p.channel).unwrap();

    let opened = p
        .manager
        .open(OpenRequest {
            channel_id: p.channel.clone(),
            speaker_ids: vec![s1.clone(), s2.clone()],
            ..OpenRequest::default()
        })
        .await
        .unwrap();

    let mut expected = vec![s1, s2, s3];
    expected.sort();
    assert_eq!(opened.speaker_ids, expected);

    let remote = p.connector.last_remote().unwrap();
    match remote.sent().first() {
        Some(Envelope::Connect { speaker_ids, .. }) => assert_eq!(speaker_ids, &expected),
        other => panic!("expected connect first, got {other:?}"),
    }
    p.manager.close_all().await;
}

#[tokio::test]
async fn playback_commands_through_the_manager() {
    let p = plane();
    let (opened, _remote) = p.open().await;
    let id = &opened.session_id;

    let outcome = p
        .manager
        .play(
            id,
            PlaylistKind::Media,
            vec![ContentId::from_raw("tone"), ContentId::from_raw("chime")],
            false,
        )
        .await
        .unwrap();
    assert_eq!(outcome.order.len(), 2);
    assert!(outcome.playback_handle.starts_with(id.as_str()));

    p.manager.pause(id, PlaylistKind::Media).await.unwrap();
    let pos = p.manager.seek(id, PlaylistKind::Media, 12.5).await.unwrap();
    assert!((pos - 12.5).abs() < 1e-9);
    let np = p.manager.now_playing(id, PlaylistKind::Media).unwrap();
    assert_eq!(np.status, SequencerStatus::Paused);
    assert_eq!(np.current_item_name.as_deref(), Some("Tone"));
    assert!((np.total_duration - 100.0).abs() < 1e-9);

    let next = p.manager.skip_next(id, PlaylistKind::Media).await.unwrap();
    assert_eq!(next, Some(ContentId::from_raw("chime")));
    assert_eq!(
        p.manager.now_playing(id, PlaylistKind::Media).unwrap().status,
        SequencerStatus::Paused
    );
    p.manager.resume(id, PlaylistKind::Media).await.unwrap();

    assert_eq!(p.manager.skip_next(id, PlaylistKind::Media).await.unwrap(), None);
    assert_eq!(
        p.manager.now_playing(id, PlaylistKind::Media).unwrap().status,
        SequencerStatus::Stopped
    );
    assert_eq!(
        p.manager.now_playing(id, PlaylistKind::Tts).unwrap().status,
        SequencerStatus::Idle
    );
    assert!(p.manager.metrics().snapshot().playback_commands >= 6);
    p.manager.close_all().await;
}

#[tokio::test]
async fn looping_playlist_restarts_after_the_last_item() {
    let p = plane();
    let (opened, _remote) = p.open().await;
    let id = &opened.session_id;
    p.manager.set_loop(id, true).unwrap();
    p.manager
        .play(id, PlaylistKind::Tts, vec![ContentId::from_raw("short")], false)
        .await
        .unwrap();

    // Three frames exhaust the item; the loop keeps it playing.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let np = p.manager.now_playing(id, PlaylistKind::Tts).unwrap();
    assert_eq!(np.status, SequencerStatus::Playing);
    assert_eq!(np.item_id, Some(ContentId::from_raw("short")));

    p.manager.set_loop(id, false).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        p.manager.now_playing(id, PlaylistKind::Tts).unwrap().status,
        SequencerStatus::Stopped
    );
    p.manager.close_all().await;
}

#[tokio::test]
async fn delivery_stats_are_forwarded() {
    let p = plane();
    let mut events = p.manager.subscribe();
    let (_opened, remote) = p.open().await;
    remote.inject_status(intercom_core::events::DeliveryStats {
        packet_count: 7,
        total_bytes: 140,
        duration_seconds: 0.07,
    });

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(intercom_core::events::SessionEvent::DeliveryStats { stats, .. }) =
                events.recv().await
            {
                return stats;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(found.packet_count, 7);
    p.manager.close_all().await;
}
