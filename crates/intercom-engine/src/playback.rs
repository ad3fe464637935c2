//! Playback coordinator: the TTS and media decks of one session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use intercom_core::playlist::PlaylistKind;

use crate::deck::{spawn_advancer, Deck, DeckContext};

pub struct PlaybackCoordinator {
    tts: Arc<Deck>,
    media: Arc<Deck>,
    looping: Arc<AtomicBool>,
    cancel: CancellationToken,
    advancers: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackCoordinator {
    /// Build both decks and start their end-of-item handlers. The loop flag
    /// in `ctx` is shared by both decks.
    pub fn start(ctx: DeckContext, loop_playback: bool) -> Self {
        ctx.looping.store(loop_playback, Ordering::SeqCst);
        let looping = Arc::clone(&ctx.looping);
        let cancel = CancellationToken::new();

        let (tts, tts_notices) = Deck::new(PlaylistKind::Tts, ctx.clone());
        let (media, media_notices) = Deck::new(PlaylistKind::Media, ctx);
        let advancers = vec![
            spawn_advancer(Arc::clone(&tts), tts_notices, cancel.clone()),
            spawn_advancer(Arc::clone(&media), media_notices, cancel.clone()),
        ];

        Self {
            tts,
            media,
            looping,
            cancel,
            advancers: Mutex::new(advancers),
        }
    }

    pub fn deck(&self, kind: PlaylistKind) -> &Arc<Deck> {
        match kind {
            PlaylistKind::Tts => &self.tts,
            PlaylistKind::Media => &self.media,
        }
    }

    pub fn set_loop(&self, enabled: bool) {
        self.looping.store(enabled, Ordering::SeqCst);
        info!(enabled, "loop playback toggled");
    }

    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// Fill the per-source buffers for one frame. Sources with nothing to
    /// play leave their buffer as it was.
    pub fn pull(&self, tts: &mut [f32], media: &mut [f32]) {
        self.tts.pull(tts);
        self.media.pull(media);
    }

    /// Stop both decks and their background handlers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for handle in self.advancers.lock().drain(..) {
            handle.abort();
        }
        self.tts.halt();
        self.media.halt();
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use intercom_core::audio::FrameFormat;
    use intercom_core::ids::{ChannelId, ContentId, SessionId};
    use intercom_core::playlist::SequencerStatus;
    use tokio::sync::broadcast;

    use crate::mock::StaticFetcher;

    fn coordinator(loop_playback: bool) -> PlaybackCoordinator {
        let fetcher = StaticFetcher::new()
            .with_constant("speech", "Announcement", 0.5, 40)
            .with_constant("song", "Anthem", 0.25, 40);
        let (events, _) = broadcast::channel(16);
        PlaybackCoordinator::start(
            DeckContext {
                session_id: SessionId::from_raw("bcast_p"),
                channel_id: ChannelId::from_raw("chan_p"),
                format: FrameFormat {
                    sample_rate: 1000,
                    channels: 1,
                    frame_ms: 10,
                },
                looping: Arc::new(AtomicBool::new(false)),
                fetcher: Arc::new(fetcher),
                fetch_timeout: Duration::from_millis(200),
                events,
            },
            loop_playback,
        )
    }

    #[tokio::test]
    async fn decks_are_independent() {
        let pc = coordinator(false);
        pc.deck(PlaylistKind::Tts)
            .play(vec![ContentId::from_raw("speech")], false)
            .await
            .unwrap();

        let (mut tts, mut media) = ([0.0f32; 10], [0.0f32; 10]);
        pc.pull(&mut tts, &mut media);
        assert!(tts.iter().all(|s| *s == 0.5));
        assert!(media.iter().all(|s| *s == 0.0));
        assert_eq!(pc.deck(PlaylistKind::Media).status(), SequencerStatus::Idle);
    }

    #[tokio::test]
    async fn loop_flag_is_shared() {
        let pc = coordinator(true);
        assert!(pc.looping());
        pc.set_loop(false);
        assert!(!pc.looping());
    }

    #[tokio::test]
    async fn shutdown_stops_both_decks() {
        let pc = coordinator(false);
        for (kind, id) in [(PlaylistKind::Tts, "speech"), (PlaylistKind::Media, "song")] {
            pc.deck(kind)
                .play(vec![ContentId::from_raw(id)], false)
                .await
                .unwrap();
        }
        pc.shutdown();
        assert_eq!(pc.deck(PlaylistKind::Tts).status(), SequencerStatus::Stopped);
        assert_eq!(pc.deck(PlaylistKind::Media).status(), SequencerStatus::Stopped);
    }
}
