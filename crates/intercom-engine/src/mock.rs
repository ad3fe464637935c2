//! Synthetic content for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use intercom_core::ids::ContentId;
use intercom_core::playlist::PlaylistKind;

use crate::fetch::{ContentFetcher, FetchError, LoadedItem};

/// Serves registered items from memory. Items are shared by both playlists.
#[derive(Default)]
pub struct StaticFetcher {
    items: Mutex<HashMap<ContentId, (String, Arc<[f32]>)>>,
    failing: Mutex<HashSet<ContentId>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item of `samples` copies of `level`.
    pub fn with_constant(self, id: &str, name: &str, level: f32, samples: usize) -> Self {
        self.insert(id, name, vec![level; samples]);
        self
    }

    pub fn insert(&self, id: &str, name: &str, samples: Vec<f32>) {
        self.items
            .lock()
            .insert(ContentId::from_raw(id), (name.to_string(), samples.into()));
    }

    /// Make fetches of `id` fail.
    pub fn fail(&self, id: &str) {
        self.failing.lock().insert(ContentId::from_raw(id));
    }

    /// Delay every fetch, to simulate a slow content source.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, kind: PlaylistKind, id: &ContentId) -> Result<LoadedItem, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(id) {
            return Err(FetchError::Io {
                path: format!("static://{kind}/{id}"),
                reason: "simulated failure".into(),
            });
        }
        let entry = self.items.lock().get(id).cloned();
        match entry {
            Some((name, samples)) => Ok(LoadedItem {
                id: id.clone(),
                name,
                samples,
            }),
            None => Err(FetchError::NotFound(format!("{kind} item {id}"))),
        }
    }
}
