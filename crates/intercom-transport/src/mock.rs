//! In-memory connector for tests.
//!
//! Each successful connect creates a [`MockRemote`] standing in for the far
//! end: it records what was sent, can inject `status` telemetry, stall or
//! drop the connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;
use parking_lot::Mutex;

use intercom_core::events::DeliveryStats;
use intercom_core::ids::ChannelId;

use crate::connector::{Connection, Connector};
use crate::envelope::Envelope;
use crate::error::TransportError;

#[derive(Clone)]
pub struct MockRemote {
    channel_id: ChannelId,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    received: Arc<Mutex<Vec<Envelope>>>,
    closed: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
    severed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MockRemote {
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Everything the link has written so far, in order.
    pub fn sent(&self) -> Vec<Envelope> {
        let mut rx = self.outbound.lock();
        let mut received = self.received.lock();
        loop {
            match rx.try_next() {
                Ok(Some(text)) => {
                    if let Ok(envelope) = Envelope::decode(&text) {
                        received.push(envelope);
                    }
                }
                Ok(None) => {
                    self.closed.store(true, Ordering::SeqCst);
                    break;
                }
                Err(_) => break,
            }
        }
        received.clone()
    }

    pub fn count_of(&self, type_name: &str) -> usize {
        self.sent()
            .iter()
            .filter(|e| e.type_name() == type_name)
            .count()
    }

    /// Whether the link closed its sending half.
    pub fn is_closed(&self) -> bool {
        let _ = self.sent();
        self.closed.load(Ordering::SeqCst)
    }

    pub fn inject_status(&self, stats: DeliveryStats) {
        if let Ok(text) = Envelope::status(stats).encode() {
            let _ = self.inbound.unbounded_send(Ok(text));
        }
    }

    pub fn inject_raw(&self, text: &str) {
        let _ = self.inbound.unbounded_send(Ok(text.to_string()));
    }

    /// Simulate the connection dropping without a close handshake.
    pub fn drop_connection(&self) {
        self.severed.store(true, Ordering::SeqCst);
        let _ = self
            .inbound
            .unbounded_send(Err(TransportError::Receive("connection reset by peer".into())));
        self.inbound.close_channel();
    }

    /// While set, sends never complete.
    pub fn stall_sends(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockConnector {
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    remotes: Mutex<Vec<MockRemote>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` connect attempts fail with a retryable error.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn remotes(&self) -> Vec<MockRemote> {
        self.remotes.lock().clone()
    }

    pub fn last_remote(&self) -> Option<MockRemote> {
        self.remotes.lock().last().cloned()
    }

    pub fn remote_for(&self, channel_id: &ChannelId) -> Option<MockRemote> {
        self.remotes
            .lock()
            .iter()
            .rev()
            .find(|r| &r.channel_id == channel_id)
            .cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn endpoint(&self, channel_id: &ChannelId) -> String {
        format!("mock://{channel_id}")
    }

    async fn connect(&self, channel_id: &ChannelId) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect {
                endpoint: self.endpoint(channel_id),
                reason: "connection refused".into(),
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded::<String>();
        let (in_tx, in_rx) = mpsc::unbounded::<Result<String, TransportError>>();
        let severed = Arc::new(AtomicBool::new(false));
        let stalled = Arc::new(AtomicBool::new(false));

        let sink_severed = Arc::clone(&severed);
        let sink_stalled = Arc::clone(&stalled);
        let sink = out_tx
            .sink_map_err(|_| TransportError::Closed)
            .with(move |text: String| {
                let severed = sink_severed.load(Ordering::SeqCst);
                let stalled = sink_stalled.load(Ordering::SeqCst);
                async move {
                    if stalled {
                        futures::future::pending::<()>().await;
                    }
                    if severed {
                        return Err(TransportError::Send("broken pipe".into()));
                    }
                    Ok(text)
                }
            });

        let remote = MockRemote {
            channel_id: channel_id.clone(),
            outbound: Arc::new(Mutex::new(out_rx)),
            received: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            inbound: in_tx,
            severed,
            stalled,
        };
        self.remotes.lock().push(remote);

        Ok(Connection {
            endpoint: self.endpoint(channel_id),
            sink: Box::pin(sink),
            stream: Box::pin(in_rx),
        })
    }
}
