//! Per-session mix loop.
//!
//! Every frame tick: take one frame of microphone input, pull both decks,
//! mix under the current gain snapshot and queue the result on the link.
//! Nothing here waits on the control path or on the network.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use intercom_core::audio::{encode_pcm16, mix_frame, FrameFormat};
use intercom_core::ids::SessionId;
use intercom_telemetry::ControlMetrics;
use intercom_transport::{Envelope, TransportError, TransportLink};

use crate::gains::LiveGains;
use crate::playback::PlaybackCoordinator;

/// Frames of microphone input held before the oldest samples are dropped.
const MIC_BACKLOG_FRAMES: usize = 4;

/// Microphone samples waiting to be mixed. Input arrives in chunks of any
/// size; output is taken a frame at a time.
#[derive(Debug)]
pub(crate) struct MicBuffer {
    pending: VecDeque<f32>,
    capacity: usize,
}

impl MicBuffer {
    pub(crate) fn new(samples_per_frame: usize) -> Self {
        let capacity = samples_per_frame * MIC_BACKLOG_FRAMES;
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[f32]) {
        self.pending.extend(chunk.iter().copied());
        let excess = self.pending.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.pending.drain(..excess);
        }
    }

    /// Fill the front of `out`; whatever is missing stays silent.
    pub(crate) fn take(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.pending.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

pub(crate) struct MixLoop {
    pub session_id: SessionId,
    pub format: FrameFormat,
    pub gains: Arc<LiveGains>,
    pub playback: Arc<PlaybackCoordinator>,
    pub link: Arc<TransportLink>,
    pub microphone: mpsc::Receiver<Vec<f32>>,
    pub metrics: Arc<ControlMetrics>,
    pub cancel: CancellationToken,
}

impl MixLoop {
    pub(crate) async fn run(mut self) {
        let spf = self.format.samples_per_frame();
        let mut mic_buffer = MicBuffer::new(spf);
        let mut mic = vec![0.0f32; spf];
        let mut tts = vec![0.0f32; spf];
        let mut media = vec![0.0f32; spf];
        let mut out = vec![0.0f32; spf];

        let mut ticker = interval(self.format.frame_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(session_id = %self.session_id, samples_per_frame = spf, "mix loop started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Ok(chunk) = self.microphone.try_recv() {
                mic_buffer.push(&chunk);
            }
            mic.fill(0.0);
            tts.fill(0.0);
            media.fill(0.0);
            mic_buffer.take(&mut mic);
            self.playback.pull(&mut tts, &mut media);

            let gains = self.gains.snapshot();
            mix_frame(&gains, &mic, &tts, &media, &mut out);
            let frame = encode_pcm16(&out);

            let envelope = Envelope::audio(self.session_id.clone(), &frame, Utc::now());
            match self.link.send(envelope) {
                Ok(()) => self.metrics.frame_sent(frame.len()),
                Err(TransportError::QueueFull) => {
                    self.metrics.frame_dropped();
                    trace!(session_id = %self.session_id, "outbound queue full, frame dropped");
                }
                Err(e) => {
                    debug!(session_id = %self.session_id, error = %e, "link ended, mix loop stopping");
                    break;
                }
            }
        }
        debug!(session_id = %self.session_id, "mix loop stopped");
    }
}
