use serde::{Deserialize, Serialize};
use tracing::instrument;

use intercom_core::ids::{GroupId, SpeakerId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_flag, get_opt, now};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerRow {
    pub id: SpeakerId,
    pub name: String,
    pub address: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRow {
    pub id: GroupId,
    pub name: String,
    pub is_deleted: bool,
    pub created_at: String,
}

fn row_to_speaker(row: &rusqlite::Row<'_>) -> Result<SpeakerRow, StoreError> {
    const T: &str = "speakers";
    Ok(SpeakerRow {
        id: SpeakerId::from_raw(get::<String>(row, 0, T, "id")?),
        name: get(row, 1, T, "name")?,
        address: get_opt(row, 2, T, "address")?,
        is_deleted: get_flag(row, 3, T, "is_deleted")?,
        created_at: get(row, 4, T, "created_at")?,
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> Result<GroupRow, StoreError> {
    const T: &str = "speaker_groups";
    Ok(GroupRow {
        id: GroupId::from_raw(get::<String>(row, 0, T, "id")?),
        name: get(row, 1, T, "name")?,
        is_deleted: get_flag(row, 2, T, "is_deleted")?,
        created_at: get(row, 3, T, "created_at")?,
    })
}

#[derive(Clone)]
pub struct SpeakerRepo {
    db: Database,
}

impl SpeakerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(name))]
    pub fn create(&self, name: &str, address: Option<&str>) -> Result<SpeakerRow, StoreError> {
        let id = SpeakerId::new();
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO speakers (id, name, address, is_deleted, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                rusqlite::params![id.as_str(), name, address, ts],
            )?;
            Ok(())
        })?;
        Ok(SpeakerRow {
            id,
            name: name.to_string(),
            address: address.map(str::to_string),
            is_deleted: false,
            created_at: ts,
        })
    }

    #[instrument(skip(self), fields(speaker_id = %id))]
    pub fn get(&self, id: &SpeakerId) -> Result<SpeakerRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, address, is_deleted, created_at FROM speakers \
                 WHERE id = ?1 AND is_deleted = 0",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_speaker(row),
                None => Err(StoreError::NotFound(format!("speaker {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(speaker_id = %id))]
    pub fn soft_delete(&self, id: &SpeakerId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE speakers SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![now(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("speaker {id}")));
            }
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct GroupRepo {
    db: Database,
}

impl GroupRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(name))]
    pub fn create(&self, name: &str) -> Result<GroupRow, StoreError> {
        let id = GroupId::new();
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO speaker_groups (id, name, is_deleted, created_at, updated_at) \
                 VALUES (?1, ?2, 0, ?3, ?3)",
                rusqlite::params![id.as_str(), name, ts],
            )?;
            Ok(())
        })?;
        Ok(GroupRow {
            id,
            name: name.to_string(),
            is_deleted: false,
            created_at: ts,
        })
    }

    #[instrument(skip(self), fields(group_id = %id))]
    pub fn get(&self, id: &GroupId) -> Result<GroupRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, is_deleted, created_at FROM speaker_groups \
                 WHERE id = ?1 AND is_deleted = 0",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_group(row),
                None => Err(StoreError::NotFound(format!("group {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(group_id = %id))]
    pub fn soft_delete(&self, id: &GroupId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE speaker_groups SET is_deleted = 1, updated_at = ?1 \
                 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![now(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("group {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_create_get_delete() {
        let repo = SpeakerRepo::new(Database::in_memory().unwrap());
        let spk = repo.create("Lobby north", Some("10.0.0.21")).unwrap();
        assert!(spk.id.as_str().starts_with("spk_"));

        let fetched = repo.get(&spk.id).unwrap();
        assert_eq!(fetched.address.as_deref(), Some("10.0.0.21"));

        repo.soft_delete(&spk.id).unwrap();
        assert!(repo.get(&spk.id).unwrap_err().is_not_found());
    }

    #[test]
    fn speaker_without_address() {
        let repo = SpeakerRepo::new(Database::in_memory().unwrap());
        let spk = repo.create("Annex", None).unwrap();
        assert!(repo.get(&spk.id).unwrap().address.is_none());
    }

    #[test]
    fn group_create_get_delete() {
        let repo = GroupRepo::new(Database::in_memory().unwrap());
        let grp = repo.create("Ground floor").unwrap();
        assert!(grp.id.as_str().starts_with("grp_"));
        assert_eq!(repo.get(&grp.id).unwrap().name, "Ground floor");

        repo.soft_delete(&grp.id).unwrap();
        assert!(repo.get(&grp.id).unwrap_err().is_not_found());
        assert!(repo.soft_delete(&grp.id).is_err());
    }
}
