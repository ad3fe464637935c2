//! One playlist's runtime: the sequencer plus the item currently loaded.
//!
//! Commands serialize on the sequencer lock, which may be held across a
//! content fetch. The mixing path never takes that lock: it reads a
//! [`Snapshot`] (status and item, swapped as one value) and a sample cursor.
//! Every published transition bumps the snapshot generation, and stale
//! end-of-item notices are recognised by their generation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use intercom_core::audio::FrameFormat;
use intercom_core::events::SessionEvent;
use intercom_core::ids::{ChannelId, ContentId, SessionId};
use intercom_core::playlist::{PlaylistKind, SequencerStatus};

use crate::error::ControlError;
use crate::fetch::{ContentFetcher, LoadedItem};
use crate::sequencer::Sequencer;

/// Everything a deck needs from its session.
#[derive(Clone)]
pub struct DeckContext {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    pub format: FrameFormat,
    pub looping: Arc<AtomicBool>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub fetch_timeout: Duration,
    pub events: broadcast::Sender<SessionEvent>,
}

#[derive(Debug)]
struct Snapshot {
    status: SequencerStatus,
    item: Option<Arc<LoadedItem>>,
    generation: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOutcome {
    pub playback_handle: String,
    pub current: ContentId,
    pub order: Vec<ContentId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub playlist: PlaylistKind,
    pub status: SequencerStatus,
    pub item_id: Option<ContentId>,
    pub current_item_name: Option<String>,
    pub current_position: f64,
    pub total_duration: f64,
}

pub struct Deck {
    kind: PlaylistKind,
    ctx: DeckContext,
    sequencer: Mutex<Sequencer>,
    now: ArcSwap<Snapshot>,
    generation: AtomicU64,
    cursor: AtomicU64,
    /// Generation whose end has already been reported.
    end_reported: AtomicU64,
    advance_tx: mpsc::UnboundedSender<u64>,
}

impl Deck {
    pub fn new(kind: PlaylistKind, ctx: DeckContext) -> (Arc<Self>, mpsc::UnboundedReceiver<u64>) {
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();
        let deck = Arc::new(Self {
            kind,
            ctx,
            sequencer: Mutex::new(Sequencer::new()),
            now: ArcSwap::from_pointee(Snapshot {
                status: SequencerStatus::Idle,
                item: None,
                generation: 0,
            }),
            generation: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            end_reported: AtomicU64::new(0),
            advance_tx,
        });
        (deck, advance_rx)
    }

    pub fn kind(&self) -> PlaylistKind {
        self.kind
    }

    pub fn status(&self) -> SequencerStatus {
        self.now.load().status
    }

    // ─── Mixing path ─────────────────────────────────────────────────────

    /// Copy the next samples of the current item into `out`. Returns how
    /// many were written; the rest of `out` is left untouched. Never blocks.
    pub fn pull(&self, out: &mut [f32]) -> usize {
        let snap = self.now.load();
        if snap.status != SequencerStatus::Playing {
            return 0;
        }
        let Some(item) = snap.item.as_ref() else {
            return 0;
        };

        let len = item.samples.len() as u64;
        let start = self.cursor.load(Ordering::SeqCst).min(len);
        let take = (out.len() as u64).min(len - start);
        let (from, to) = (start as usize, (start + take) as usize);
        out[..to - from].copy_from_slice(&item.samples[from..to]);

        // A seek landing meanwhile keeps its position.
        let _ = self
            .cursor
            .compare_exchange(start, start + take, Ordering::SeqCst, Ordering::SeqCst);

        if start + take >= len
            && self.end_reported.swap(snap.generation, Ordering::SeqCst) != snap.generation
        {
            let _ = self.advance_tx.send(snap.generation);
        }
        to - from
    }

    // ─── Control path ────────────────────────────────────────────────────

    pub async fn play(&self, ids: Vec<ContentId>, shuffle: bool) -> Result<PlayOutcome, ControlError> {
        let mut seq = self.sequencer.lock().await;
        let first = {
            let mut rng = rand::thread_rng();
            seq.play(ids, shuffle, &mut rng)
                .map_err(|e| self.fail("play", e.to_string()))?
                .clone()
        };

        match self.load(&first).await {
            Ok(item) => {
                let generation = self.publish(SequencerStatus::Playing, Some(item), Some(0));
                self.emit_playback(SequencerStatus::Playing, Some(first.clone()));
                info!(
                    session_id = %self.ctx.session_id,
                    playlist = %self.kind,
                    items = seq.order().len(),
                    shuffle,
                    "playback started"
                );
                Ok(PlayOutcome {
                    playback_handle: format!("{}:{}:{}", self.ctx.session_id, self.kind, generation),
                    current: first,
                    order: seq.order().to_vec(),
                })
            }
            Err(reason) => {
                seq.stop();
                self.publish(SequencerStatus::Stopped, None, Some(0));
                self.emit_error(Some(first.clone()), reason.clone());
                Err(self.fail("play", format!("fetch {first}: {reason}")))
            }
        }
    }

    pub async fn stop(&self) {
        let mut seq = self.sequencer.lock().await;
        seq.stop();
        self.publish(SequencerStatus::Stopped, None, Some(0));
        self.emit_playback(SequencerStatus::Stopped, None);
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        let mut seq = self.sequencer.lock().await;
        seq.pause().map_err(|e| self.fail("pause", e.to_string()))?;
        let item = self.now.load().item.clone();
        self.publish(SequencerStatus::Paused, item, None);
        self.emit_playback(SequencerStatus::Paused, seq.current().cloned());
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        let mut seq = self.sequencer.lock().await;
        seq.resume().map_err(|e| self.fail("resume", e.to_string()))?;
        let item = self.now.load().item.clone();
        self.publish(SequencerStatus::Playing, item, None);
        self.emit_playback(SequencerStatus::Playing, seq.current().cloned());
        Ok(())
    }

    /// Reposition within the current item. Returns the new position in
    /// seconds.
    pub async fn seek(&self, seconds: f64) -> Result<f64, ControlError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ControlError::validation(
                "seek",
                format!("offset must be a non-negative number of seconds, got {seconds}"),
            ));
        }
        let seq = self.sequencer.lock().await;
        seq.check_seek().map_err(|e| self.fail("seek", e.to_string()))?;

        let snap = self.now.load_full();
        let Some(item) = snap.item.clone() else {
            return Err(self.fail("seek", "no item loaded".into()));
        };
        let total = self.ctx.format.seconds(item.samples.len() as u64);
        if seconds > total {
            return Err(self.fail(
                "seek",
                format!("offset {seconds:.3}s is past the end of the item ({total:.3}s)"),
            ));
        }
        let offset = self
            .ctx
            .format
            .sample_offset(seconds)
            .min(item.samples.len() as u64);
        self.publish(snap.status, Some(item), Some(offset));
        debug!(session_id = %self.ctx.session_id, playlist = %self.kind, seconds, "seek");
        Ok(self.ctx.format.seconds(offset))
    }

    /// Skip to the next item. `None` means the order was exhausted and the
    /// deck stopped.
    pub async fn skip_next(&self) -> Result<Option<ContentId>, ControlError> {
        let mut seq = self.sequencer.lock().await;
        let looping = self.ctx.looping.load(Ordering::SeqCst);
        let next = seq
            .skip_next(looping)
            .map_err(|e| self.fail("skip", e.to_string()))?
            .cloned();

        let Some(id) = next else {
            self.publish(SequencerStatus::Stopped, None, Some(0));
            self.emit_playback(SequencerStatus::Stopped, None);
            return Ok(None);
        };

        match self.load(&id).await {
            Ok(item) => {
                let status = seq.status();
                self.publish(status, Some(item), Some(0));
                self.emit_playback(status, Some(id.clone()));
                Ok(Some(id))
            }
            Err(reason) => {
                seq.stop();
                self.publish(SequencerStatus::Stopped, None, Some(0));
                self.emit_error(Some(id.clone()), reason.clone());
                Err(self.fail("skip", format!("fetch {id}: {reason}")))
            }
        }
    }

    pub fn now_playing(&self) -> NowPlaying {
        let snap = self.now.load();
        match snap.item.as_ref().filter(|_| snap.status.has_position()) {
            Some(item) => {
                let len = item.samples.len() as u64;
                let cursor = self.cursor.load(Ordering::SeqCst).min(len);
                NowPlaying {
                    playlist: self.kind,
                    status: snap.status,
                    item_id: Some(item.id.clone()),
                    current_item_name: Some(item.name.clone()),
                    current_position: self.ctx.format.seconds(cursor),
                    total_duration: self.ctx.format.seconds(len),
                }
            }
            None => NowPlaying {
                playlist: self.kind,
                status: snap.status,
                item_id: None,
                current_item_name: None,
                current_position: 0.0,
                total_duration: 0.0,
            },
        }
    }

    /// End-of-item transition, driven by the mixing path's notice.
    async fn auto_advance(&self, generation: u64) {
        let mut seq = self.sequencer.lock().await;
        if self.now.load().generation != generation {
            return;
        }

        let mut failures = 0;
        loop {
            let looping = self.ctx.looping.load(Ordering::SeqCst);
            let Some(id) = seq.advance(looping).cloned() else {
                self.publish(SequencerStatus::Stopped, None, Some(0));
                self.emit_playback(SequencerStatus::Stopped, None);
                debug!(session_id = %self.ctx.session_id, playlist = %self.kind, "playlist finished");
                return;
            };
            match self.load(&id).await {
                Ok(item) => {
                    self.publish(SequencerStatus::Playing, Some(item), Some(0));
                    self.emit_playback(SequencerStatus::Playing, Some(id));
                    return;
                }
                Err(reason) => {
                    warn!(
                        session_id = %self.ctx.session_id,
                        playlist = %self.kind,
                        content_id = %id,
                        reason = %reason,
                        "skipping unplayable item"
                    );
                    self.emit_error(Some(id), reason);
                    failures += 1;
                    if failures >= seq.order().len() {
                        seq.stop();
                        self.publish(SequencerStatus::Stopped, None, Some(0));
                        self.emit_playback(SequencerStatus::Stopped, None);
                        return;
                    }
                }
            }
        }
    }

    /// Stop without waiting for in-flight commands. Used at session close.
    pub(crate) fn halt(&self) {
        if let Ok(mut seq) = self.sequencer.try_lock() {
            seq.stop();
        }
        let was_active = self.status().has_position();
        self.publish(SequencerStatus::Stopped, None, Some(0));
        if was_active {
            self.emit_playback(SequencerStatus::Stopped, None);
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn publish(
        &self,
        status: SequencerStatus,
        item: Option<Arc<LoadedItem>>,
        cursor: Option<u64>,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cursor) = cursor {
            self.cursor.store(cursor, Ordering::SeqCst);
        }
        self.now.store(Arc::new(Snapshot {
            status,
            item,
            generation,
        }));
        generation
    }

    async fn load(&self, id: &ContentId) -> Result<Arc<LoadedItem>, String> {
        let fetch = self.ctx.fetcher.fetch(self.kind, id);
        match tokio::time::timeout(self.ctx.fetch_timeout, fetch).await {
            Ok(Ok(item)) => Ok(Arc::new(item)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "fetch timed out after {}ms",
                self.ctx.fetch_timeout.as_millis()
            )),
        }
    }

    fn fail(&self, operation: &'static str, reason: String) -> ControlError {
        ControlError::Sequencer {
            playlist: self.kind,
            session_id: self.ctx.session_id.clone(),
            operation,
            reason,
        }
    }

    fn emit_playback(&self, status: SequencerStatus, item: Option<ContentId>) {
        let _ = self.ctx.events.send(SessionEvent::Playback {
            session_id: self.ctx.session_id.clone(),
            channel_id: self.ctx.channel_id.clone(),
            playlist: self.kind,
            status,
            item,
        });
    }

    fn emit_error(&self, item: Option<ContentId>, message: String) {
        let _ = self.ctx.events.send(SessionEvent::SequencerError {
            session_id: self.ctx.session_id.clone(),
            channel_id: self.ctx.channel_id.clone(),
            playlist: self.kind,
            item,
            message,
        });
    }
}

/// Run end-of-item transitions for `deck` until cancelled.
pub(crate) fn spawn_advancer(
    deck: Arc<Deck>,
    mut notices: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let generation = tokio::select! {
                () = cancel.cancelled() => break,
                next = notices.recv() => match next {
                    Some(generation) => generation,
                    None => break,
                },
            };
            deck.auto_advance(generation).await;
        }
    })
}
