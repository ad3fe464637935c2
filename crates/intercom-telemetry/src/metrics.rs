use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
#[derive(Debug, Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge for values that go up and down.
#[derive(Debug, Default)]
struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }
    fn decrement(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Process-wide control-plane counters. Cheap to update from any task.
#[derive(Debug, Default)]
pub struct ControlMetrics {
    sessions_opened: Counter,
    sessions_closed: Counter,
    sessions_lost: Counter,
    open_failures: Counter,
    open_sessions: Gauge,
    frames_sent: Counter,
    bytes_sent: Counter,
    frames_dropped: Counter,
    volume_directives: Counter,
    playback_commands: Counter,
}

/// Point-in-time copy of [`ControlMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_lost: u64,
    pub open_failures: u64,
    pub open_sessions: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
    pub volume_directives: u64,
    pub playback_commands: u64,
}

impl ControlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_opened.increment(1);
        self.open_sessions.increment();
    }

    /// Orderly close (`lost == false`) or abnormal end.
    pub fn session_ended(&self, lost: bool) {
        if lost {
            self.sessions_lost.increment(1);
        } else {
            self.sessions_closed.increment(1);
        }
        self.open_sessions.decrement();
    }

    pub fn open_failed(&self) {
        self.open_failures.increment(1);
    }

    pub fn frame_sent(&self, bytes: usize) {
        self.frames_sent.increment(1);
        self.bytes_sent.increment(bytes as u64);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.increment(1);
    }

    pub fn volume_directive(&self) {
        self.volume_directives.increment(1);
    }

    pub fn playback_command(&self) {
        self.playback_commands.increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.get(),
            sessions_closed: self.sessions_closed.get(),
            sessions_lost: self.sessions_lost.get(),
            open_failures: self.open_failures.get(),
            open_sessions: self.open_sessions.get(),
            frames_sent: self.frames_sent.get(),
            bytes_sent: self.bytes_sent.get(),
            frames_dropped: self.frames_dropped.get(),
            volume_directives: self.volume_directives.get(),
            playback_commands: self.playback_commands.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle_counts() {
        let m = ControlMetrics::new();
        m.session_opened();
        m.session_opened();
        m.session_ended(false);
        m.session_ended(true);
        let snap = m.snapshot();
        assert_eq!(snap.sessions_opened, 2);
        assert_eq!(snap.sessions_closed, 1);
        assert_eq!(snap.sessions_lost, 1);
        assert_eq!(snap.open_sessions, 0);
    }

    #[test]
    fn open_gauge_never_underflows() {
        let m = ControlMetrics::new();
        m.session_ended(false);
        assert_eq!(m.snapshot().open_sessions, 0);
    }

    #[test]
    fn frame_bytes_accumulate() {
        let m = ControlMetrics::new();
        m.frame_sent(100);
        m.frame_sent(28);
        m.frame_dropped();
        let snap = m.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 128);
        assert_eq!(snap.frames_dropped, 1);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(ControlMetrics::new().snapshot()).unwrap();
        assert!(json.get("sessionsOpened").is_some());
        assert!(json.get("playbackCommands").is_some());
    }
}
