//! Per-session transport link.
//!
//! A writer task drains a bounded queue of outbound envelopes onto the
//! connection; a reader task turns inbound `status` messages into events and
//! notices the connection dropping. Cancellation is only observed between
//! messages, so the far end never receives a truncated envelope followed by
//! further traffic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use intercom_core::events::DeliveryStats;
use intercom_core::ids::{ChannelId, SessionId, SpeakerId};

use crate::connector::{Connection, TextSink, TextStream};
use crate::envelope::Envelope;
use crate::error::TransportError;

#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub send_timeout: Duration,
    pub close_timeout: Duration,
    pub outbound_queue: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(2000),
            close_timeout: Duration::from_millis(2000),
            outbound_queue: 64,
        }
    }
}

/// Something the far end did that the session should know about.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Status(DeliveryStats),
    /// The connection ended without an orderly `disconnect`.
    Lost { reason: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// State shared by the link handle and its two tasks.
struct Shared {
    session_id: SessionId,
    /// Set once the link is finished, by close, abort or loss.
    ended: AtomicBool,
    /// Stops both tasks immediately, without a `disconnect`.
    kill: CancellationToken,
    events: mpsc::UnboundedSender<LinkEvent>,
    counters: Counters,
}

impl Shared {
    fn report_lost(&self, reason: String) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            warn!(session_id = %self.session_id, reason = %reason, "transport connection lost");
            let _ = self.events.send(LinkEvent::Lost { reason });
        }
        self.kill.cancel();
    }
}

pub struct TransportLink {
    endpoint: String,
    outbound: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    config: LinkConfig,
}

impl TransportLink {
    /// Announce the session on a fresh connection and start the link tasks.
    /// The `connect` envelope is written before this returns.
    pub async fn establish(
        conn: Connection,
        session_id: SessionId,
        channel_id: ChannelId,
        speaker_ids: Vec<SpeakerId>,
        config: LinkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), TransportError> {
        let Connection {
            endpoint,
            mut sink,
            stream,
        } = conn;

        let hello = Envelope::Connect {
            session_id: session_id.clone(),
            channel_id,
            speaker_ids,
        }
        .encode()?;
        send_bounded(&mut sink, hello, config.send_timeout).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            session_id,
            ended: AtomicBool::new(false),
            kill: CancellationToken::new(),
            events: events_tx,
            counters: Counters::default(),
        });

        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            shutdown.clone(),
            Arc::clone(&shared),
            config.clone(),
        ));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared)));

        info!(session_id = %shared.session_id, endpoint = %endpoint, "transport link established");

        Ok((
            Self {
                endpoint,
                outbound: outbound_tx,
                shutdown,
                shared,
                writer: Mutex::new(Some(writer)),
                reader: Mutex::new(Some(reader)),
                config,
            },
            events_rx,
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    /// Queue an outbound envelope without waiting. A full queue drops the
    /// envelope and reports `QueueFull`.
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_ended() {
            return Err(TransportError::Closed);
        }
        match self.outbound.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared
                    .counters
                    .frames_dropped
                    .fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    pub fn stats(&self) -> LinkStats {
        let c = &self.shared.counters;
        LinkStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Orderly close: finish the message in flight, send `disconnect`, close
    /// the connection. Queued frames not yet written are discarded. Returns
    /// false when the link had already ended.
    pub async fn close(&self) -> bool {
        if self.shared.ended.swap(true, Ordering::SeqCst) {
            self.shared.kill.cancel();
            return false;
        }
        self.shutdown.cancel();

        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            let budget = self.config.send_timeout + self.config.close_timeout * 2;
            if tokio::time::timeout(budget, handle).await.is_err() {
                warn!(session_id = %self.shared.session_id, "writer did not finish, abandoning connection");
            }
        }
        self.shared.kill.cancel();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        debug!(session_id = %self.shared.session_id, "transport link closed");
        true
    }

    /// Drop the connection immediately without a `disconnect`.
    pub fn abort(&self) {
        self.shared.ended.store(true, Ordering::SeqCst);
        self.shared.kill.cancel();
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn send_bounded(
    sink: &mut TextSink,
    text: String,
    limit: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(limit, sink.send(text)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::SendTimeout {
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

async fn write_loop(
    mut sink: TextSink,
    mut rx: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
    shared: Arc<Shared>,
    config: LinkConfig,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            () = shared.kill.cancelled() => return,
            () = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %shared.session_id, error = %e, "dropping unencodable envelope");
                continue;
            }
        };
        let len = text.len() as u64;

        // The send itself is never raced against shutdown.
        if let Err(e) = send_bounded(&mut sink, text, config.send_timeout).await {
            shared.report_lost(e.to_string());
            return;
        }
        shared.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        shared.counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
    }

    if shared.kill.is_cancelled() {
        return;
    }

    let bye = Envelope::Disconnect {
        session_id: shared.session_id.clone(),
    };
    match bye.encode() {
        Ok(text) => {
            if let Err(e) = send_bounded(&mut sink, text, config.close_timeout).await {
                warn!(session_id = %shared.session_id, error = %e, "disconnect not delivered");
                return;
            }
        }
        Err(e) => warn!(session_id = %shared.session_id, error = %e, "disconnect not encodable"),
    }
    if tokio::time::timeout(config.close_timeout, sink.close())
        .await
        .is_err()
    {
        debug!(session_id = %shared.session_id, "close handshake timed out");
    }
}

async fn read_loop(mut stream: TextStream, shared: Arc<Shared>) {
    loop {
        let next = tokio::select! {
            () = shared.kill.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(text)) => match Envelope::decode(&text) {
                Ok(envelope) => match envelope.delivery_stats() {
                    Some(stats) => {
                        let _ = shared.events.send(LinkEvent::Status(stats));
                    }
                    None => {
                        debug!(
                            session_id = %shared.session_id,
                            kind = envelope.type_name(),
                            "ignoring inbound envelope"
                        );
                    }
                },
                Err(e) => {
                    warn!(session_id = %shared.session_id, error = %e, "undecodable inbound message");
                }
            },
            Some(Err(e)) => {
                shared.report_lost(e.to_string());
                return;
            }
            None => {
                shared.report_lost("connection closed by remote".into());
                return;
            }
        }
    }
}
