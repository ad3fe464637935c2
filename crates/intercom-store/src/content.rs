use serde::{Deserialize, Serialize};
use tracing::instrument;

use intercom_core::ids::ContentId;
use intercom_core::playlist::PlaylistKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_flag, now};

/// A playable catalog entry: a media file or a rendered TTS script.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub id: ContentId,
    pub kind: PlaylistKind,
    pub name: String,
    pub file_name: String,
    pub duration_seconds: f64,
    pub is_deleted: bool,
    pub created_at: String,
}

fn table_for(kind: PlaylistKind) -> &'static str {
    match kind {
        PlaylistKind::Media => "media",
        PlaylistKind::Tts => "tts_scripts",
    }
}

fn row_to_content(row: &rusqlite::Row<'_>, kind: PlaylistKind) -> Result<ContentRow, StoreError> {
    let t = table_for(kind);
    Ok(ContentRow {
        id: ContentId::from_raw(get::<String>(row, 0, t, "id")?),
        kind,
        name: get(row, 1, t, "name")?,
        file_name: get(row, 2, t, "file_name")?,
        duration_seconds: get(row, 3, t, "duration_seconds")?,
        is_deleted: get_flag(row, 4, t, "is_deleted")?,
        created_at: get(row, 5, t, "created_at")?,
    })
}

#[derive(Clone)]
pub struct ContentRepo {
    db: Database,
}

impl ContentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(playlist = %kind, name))]
    pub fn create(
        &self,
        kind: PlaylistKind,
        name: &str,
        file_name: &str,
        duration_seconds: f64,
    ) -> Result<ContentRow, StoreError> {
        let id = ContentId::new();
        let ts = now();
        let table = table_for(kind);
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (id, name, file_name, duration_seconds, is_deleted, created_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)"
                ),
                rusqlite::params![id.as_str(), name, file_name, duration_seconds.max(0.0), ts],
            )?;
            Ok(())
        })?;
        Ok(ContentRow {
            id,
            kind,
            name: name.to_string(),
            file_name: file_name.to_string(),
            duration_seconds: duration_seconds.max(0.0),
            is_deleted: false,
            created_at: ts,
        })
    }

    #[instrument(skip(self), fields(playlist = %kind, content_id = %id))]
    pub fn get(&self, kind: PlaylistKind, id: &ContentId) -> Result<ContentRow, StoreError> {
        let table = table_for(kind);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, name, file_name, duration_seconds, is_deleted, created_at \
                 FROM {table} WHERE id = ?1 AND is_deleted = 0"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_content(row, kind),
                None => Err(StoreError::NotFound(format!("{kind} item {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(playlist = %kind, content_id = %id))]
    pub fn soft_delete(&self, kind: PlaylistKind, id: &ContentId) -> Result<(), StoreError> {
        let table = table_for(kind);
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                &format!("UPDATE {table} SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0"),
                [id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("{kind} item {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_and_tts_are_separate_catalogs() {
        let repo = ContentRepo::new(Database::in_memory().unwrap());
        let song = repo.create(PlaylistKind::Media, "Anthem", "anthem.pcm", 92.5).unwrap();
        let notice = repo.create(PlaylistKind::Tts, "Fire drill", "drill.pcm", 8.0).unwrap();

        assert_eq!(repo.get(PlaylistKind::Media, &song.id).unwrap().name, "Anthem");
        assert_eq!(repo.get(PlaylistKind::Tts, &notice.id).unwrap().file_name, "drill.pcm");
        assert!(repo.get(PlaylistKind::Tts, &song.id).unwrap_err().is_not_found());
    }

    #[test]
    fn deleted_content_is_hidden() {
        let repo = ContentRepo::new(Database::in_memory().unwrap());
        let item = repo.create(PlaylistKind::Media, "Jingle", "jingle.pcm", 3.0).unwrap();
        repo.soft_delete(PlaylistKind::Media, &item.id).unwrap();
        assert!(repo.get(PlaylistKind::Media, &item.id).is_err());
    }

    #[test]
    fn negative_duration_stored_as_zero() {
        let repo = ContentRepo::new(Database::in_memory().unwrap());
        let item = repo.create(PlaylistKind::Tts, "Odd", "odd.pcm", -4.0).unwrap();
        assert_eq!(repo.get(PlaylistKind::Tts, &item.id).unwrap().duration_seconds, 0.0);
    }
}
