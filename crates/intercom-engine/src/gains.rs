use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use intercom_core::audio::{AudioSource, GainSet};

/// Live gain state of one session.
///
/// The mixing path loads one [`GainSet`] per frame; control-path writes swap
/// in a whole new set, so a frame never mixes with half an update.
#[derive(Debug)]
pub struct LiveGains {
    state: ArcSwap<GainSet>,
    version: AtomicU64,
}

impl LiveGains {
    pub fn new(initial: GainSet) -> Self {
        Self {
            state: ArcSwap::from_pointee(initial),
            version: AtomicU64::new(0),
        }
    }

    /// Replace one source's gain. Returns the set now in effect.
    pub fn set(&self, source: AudioSource, value: f32) -> GainSet {
        let previous = self.state.rcu(|current| Arc::new(current.with(source, value)));
        self.version.fetch_add(1, Ordering::AcqRel);
        previous.with(source, value)
    }

    pub fn snapshot(&self) -> GainSet {
        **self.state.load()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
