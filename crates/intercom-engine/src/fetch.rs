use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use intercom_core::audio::decode_pcm16;
use intercom_core::ids::ContentId;
use intercom_core::playlist::PlaylistKind;
use intercom_store::{ContentRepo, Database};

/// A playable item held in memory, as interleaved samples in the session's
/// channel layout.
#[derive(Debug)]
pub struct LoadedItem {
    pub id: ContentId,
    pub name: String,
    pub samples: Arc<[f32]>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("refusing file name {0}")]
    InvalidFileName(String),

    #[error("catalog: {0}")]
    Catalog(String),
}

/// Loads playlist content by id.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, kind: PlaylistKind, id: &ContentId) -> Result<LoadedItem, FetchError>;
}

/// Reads catalog rows from the store and the audio from
/// `{dir}/{file_name}` as raw little-endian PCM16.
pub struct CatalogFetcher {
    content: ContentRepo,
    media_dir: PathBuf,
    tts_dir: PathBuf,
}

impl CatalogFetcher {
    pub fn new(db: Database, media_dir: PathBuf, tts_dir: PathBuf) -> Self {
        Self {
            content: ContentRepo::new(db),
            media_dir,
            tts_dir,
        }
    }

    fn dir_for(&self, kind: PlaylistKind) -> &Path {
        match kind {
            PlaylistKind::Media => &self.media_dir,
            PlaylistKind::Tts => &self.tts_dir,
        }
    }
}

/// Only plain relative names stay inside the content directory.
fn is_plain_file_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl ContentFetcher for CatalogFetcher {
    async fn fetch(&self, kind: PlaylistKind, id: &ContentId) -> Result<LoadedItem, FetchError> {
        let row = self.content.get(kind, id).map_err(|e| {
            if e.is_not_found() {
                FetchError::NotFound(format!("{kind} item {id}"))
            } else {
                FetchError::Catalog(e.to_string())
            }
        })?;

        if !is_plain_file_name(&row.file_name) {
            return Err(FetchError::InvalidFileName(row.file_name));
        }
        let path = self.dir_for(kind).join(&row.file_name);
        let bytes = tokio::fs::read(&path).await.map_err(|e| FetchError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(playlist = %kind, content_id = %id, bytes = bytes.len(), "content loaded");

        Ok(LoadedItem {
            id: row.id,
            name: row.name,
            samples: decode_pcm16(&bytes).into(),
        })
    }
}
