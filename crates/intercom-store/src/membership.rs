//! Speaker membership mapping rows.
//!
//! Three tables associate speakers with channels, speakers with groups and
//! groups with channels. Rows are never removed: retraction clears
//! `is_current`, and re-adding a retracted pair revives the same row.
//! A row counts only while `is_current = 1 AND is_deleted = 0` and the
//! entities on both ends are not soft-deleted.

use rusqlite::Connection;
use tracing::{debug, instrument};

use intercom_core::ids::{ChannelId, GroupId, SpeakerId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, now};

struct MapTable {
    table: &'static str,
    left: &'static str,
    right: &'static str,
}

const SPEAKER_CHANNEL: MapTable = MapTable {
    table: "speaker_channel_map",
    left: "speaker_id",
    right: "channel_id",
};

const SPEAKER_GROUP: MapTable = MapTable {
    table: "speaker_group_map",
    left: "speaker_id",
    right: "group_id",
};

const GROUP_CHANNEL: MapTable = MapTable {
    table: "group_channel_map",
    left: "group_id",
    right: "channel_id",
};

impl MapTable {
    fn upsert(&self, conn: &Connection, left: &str, right: &str) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {t} ({l}, {r}, is_current, is_deleted, created_at, updated_at) \
             VALUES (?1, ?2, 1, 0, ?3, ?3) \
             ON CONFLICT({l}, {r}) DO UPDATE SET \
                 is_current = 1, is_deleted = 0, updated_at = excluded.updated_at",
            t = self.table,
            l = self.left,
            r = self.right,
        );
        conn.execute(&sql, rusqlite::params![left, right, now()])?;
        Ok(())
    }

    fn retract(&self, conn: &Connection, left: &str, right: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {t} SET is_current = 0, updated_at = ?1 \
             WHERE {l} = ?2 AND {r} = ?3 AND is_current = 1",
            t = self.table,
            l = self.left,
            r = self.right,
        );
        let changed = conn.execute(&sql, rusqlite::params![now(), left, right])?;
        Ok(changed > 0)
    }
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    key: &str,
    table: &'static str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([key])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(get::<String>(row, 0, table, "id")?);
    }
    Ok(ids)
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, StoreError> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1 AND is_deleted = 0");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.exists([id])?)
}

#[derive(Clone)]
pub struct MembershipRepo {
    db: Database,
}

impl MembershipRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(speaker_id = %speaker, channel_id = %channel))]
    pub fn map_speaker_to_channel(
        &self,
        speaker: &SpeakerId,
        channel: &ChannelId,
    ) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| SPEAKER_CHANNEL.upsert(conn, speaker.as_str(), channel.as_str()))
    }

    #[instrument(skip(self), fields(speaker_id = %speaker, group_id = %group))]
    pub fn map_speaker_to_group(&self, speaker: &SpeakerId, group: &GroupId) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| SPEAKER_GROUP.upsert(conn, speaker.as_str(), group.as_str()))
    }

    #[instrument(skip(self), fields(group_id = %group, channel_id = %channel))]
    pub fn map_group_to_channel(&self, group: &GroupId, channel: &ChannelId) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| GROUP_CHANNEL.upsert(conn, group.as_str(), channel.as_str()))
    }

    /// Returns whether a current row was retracted.
    #[instrument(skip(self), fields(speaker_id = %speaker, channel_id = %channel))]
    pub fn retract_speaker_from_channel(
        &self,
        speaker: &SpeakerId,
        channel: &ChannelId,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| SPEAKER_CHANNEL.retract(conn, speaker.as_str(), channel.as_str()))
    }

    #[instrument(skip(self), fields(speaker_id = %speaker, group_id = %group))]
    pub fn retract_speaker_from_group(
        &self,
        speaker: &SpeakerId,
        group: &GroupId,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| SPEAKER_GROUP.retract(conn, speaker.as_str(), group.as_str()))
    }

    #[instrument(skip(self), fields(group_id = %group, channel_id = %channel))]
    pub fn retract_group_from_channel(
        &self,
        group: &GroupId,
        channel: &ChannelId,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| GROUP_CHANNEL.retract(conn, group.as_str(), channel.as_str()))
    }

    /// Speakers currently mapped straight to the channel.
    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn direct_speakers(&self, channel: &ChannelId) -> Result<Vec<SpeakerId>, StoreError> {
        self.db.with_conn(|conn| {
            let ids = collect_ids(
                conn,
                "SELECT s.id FROM speaker_channel_map m \
                 JOIN speakers s ON s.id = m.speaker_id \
                 WHERE m.channel_id = ?1 AND m.is_current = 1 AND m.is_deleted = 0 \
                   AND s.is_deleted = 0 \
                 ORDER BY s.id",
                channel.as_str(),
                "speaker_channel_map",
            )?;
            Ok(ids.into_iter().map(SpeakerId::from_raw).collect())
        })
    }

    /// Groups currently mapped to the channel.
    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn channel_groups(&self, channel: &ChannelId) -> Result<Vec<GroupId>, StoreError> {
        self.db.with_conn(|conn| {
            let ids = collect_ids(
                conn,
                "SELECT g.id FROM group_channel_map m \
                 JOIN speaker_groups g ON g.id = m.group_id \
                 WHERE m.channel_id = ?1 AND m.is_current = 1 AND m.is_deleted = 0 \
                   AND g.is_deleted = 0 \
                 ORDER BY g.id",
                channel.as_str(),
                "group_channel_map",
            )?;
            Ok(ids.into_iter().map(GroupId::from_raw).collect())
        })
    }

    /// Speakers currently in the group.
    #[instrument(skip(self), fields(group_id = %group))]
    pub fn group_speakers(&self, group: &GroupId) -> Result<Vec<SpeakerId>, StoreError> {
        self.db.with_conn(|conn| {
            let ids = collect_ids(
                conn,
                "SELECT s.id FROM speaker_group_map m \
                 JOIN speakers s ON s.id = m.speaker_id \
                 JOIN speaker_groups g ON g.id = m.group_id \
                 WHERE m.group_id = ?1 AND m.is_current = 1 AND m.is_deleted = 0 \
                   AND s.is_deleted = 0 AND g.is_deleted = 0 \
                 ORDER BY s.id",
                group.as_str(),
                "speaker_group_map",
            )?;
            Ok(ids.into_iter().map(SpeakerId::from_raw).collect())
        })
    }

    /// Speakers reached through every group currently mapped to the channel.
    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn speakers_via_groups(&self, channel: &ChannelId) -> Result<Vec<SpeakerId>, StoreError> {
        self.db.with_conn(|conn| {
            let ids = collect_ids(
                conn,
                "SELECT DISTINCT s.id FROM group_channel_map gc \
                 JOIN speaker_groups g ON g.id = gc.group_id \
                 JOIN speaker_group_map sg ON sg.group_id = g.id \
                 JOIN speakers s ON s.id = sg.speaker_id \
                 WHERE gc.channel_id = ?1 \
                   AND gc.is_current = 1 AND gc.is_deleted = 0 \
                   AND sg.is_current = 1 AND sg.is_deleted = 0 \
                   AND g.is_deleted = 0 AND s.is_deleted = 0 \
                 ORDER BY s.id",
                channel.as_str(),
                "speaker_group_map",
            )?;
            Ok(ids.into_iter().map(SpeakerId::from_raw).collect())
        })
    }

    /// Fails with `NotFound` for the first speaker that is unknown or
    /// soft-deleted. Writes nothing.
    pub fn check_speakers(&self, speakers: &[SpeakerId]) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            for speaker in speakers {
                if !exists(conn, "speakers", speaker.as_str())? {
                    return Err(StoreError::NotFound(format!("speaker {speaker}")));
                }
            }
            Ok(())
        })
    }

    /// Write a speaker selection as direct channel rows in one transaction.
    /// Every speaker must exist; nothing is written if one does not.
    #[instrument(skip(self, speakers), fields(channel_id = %channel, count = speakers.len()))]
    pub fn assign_speakers(
        &self,
        channel: &ChannelId,
        speakers: &[SpeakerId],
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !exists(&tx, "channels", channel.as_str())? {
                return Err(StoreError::NotFound(format!("channel {channel}")));
            }
            for speaker in speakers {
                if !exists(&tx, "speakers", speaker.as_str())? {
                    return Err(StoreError::NotFound(format!("speaker {speaker}")));
                }
                SPEAKER_CHANNEL.upsert(&tx, speaker.as_str(), channel.as_str())?;
            }
            tx.commit()?;
            debug!(assigned = speakers.len(), "selection persisted");
            Ok(speakers.len())
        })
    }
}
