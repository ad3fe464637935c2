use serde::{Deserialize, Serialize};
use tracing::instrument;

use intercom_core::audio::{AudioSource, FrameFormat, GainSet};
use intercom_core::ids::ChannelId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_flag, get_gain, now};

const CHANNEL_COLUMNS: &str = "id, name, microphone_volume, tts_volume, media_volume, \
    master_volume, sample_rate, channel_count, is_deleted, created_at, updated_at";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRow {
    pub id: ChannelId,
    pub name: String,
    /// Defaults a new session starts from.
    pub gains: GainSet,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ChannelRow {
    pub fn frame_format(&self, frame_ms: u32) -> FrameFormat {
        FrameFormat {
            sample_rate: self.sample_rate,
            channels: self.channel_count,
            frame_ms,
        }
    }
}

fn gain_column(source: AudioSource) -> &'static str {
    match source {
        AudioSource::Microphone => "microphone_volume",
        AudioSource::Tts => "tts_volume",
        AudioSource::Media => "media_volume",
        AudioSource::Master => "master_volume",
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> Result<ChannelRow, StoreError> {
    const T: &str = "channels";
    let sample_rate: i64 = get(row, 6, T, "sample_rate")?;
    let channel_count: i64 = get(row, 7, T, "channel_count")?;
    Ok(ChannelRow {
        id: ChannelId::from_raw(get::<String>(row, 0, T, "id")?),
        name: get(row, 1, T, "name")?,
        gains: GainSet {
            microphone: get_gain(row, 2, T, "microphone_volume")?,
            tts: get_gain(row, 3, T, "tts_volume")?,
            media: get_gain(row, 4, T, "media_volume")?,
            master: get_gain(row, 5, T, "master_volume")?,
        },
        sample_rate: u32::try_from(sample_rate).map_err(|_| StoreError::CorruptRow {
            table: T,
            column: "sample_rate",
            detail: format!("out of range: {sample_rate}"),
        })?,
        channel_count: u16::try_from(channel_count).map_err(|_| StoreError::CorruptRow {
            table: T,
            column: "channel_count",
            detail: format!("out of range: {channel_count}"),
        })?,
        is_deleted: get_flag(row, 8, T, "is_deleted")?,
        created_at: get(row, 9, T, "created_at")?,
        updated_at: get(row, 10, T, "updated_at")?,
    })
}

#[derive(Clone)]
pub struct ChannelRepo {
    db: Database,
}

impl ChannelRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, gains), fields(name))]
    pub fn create(
        &self,
        name: &str,
        gains: GainSet,
        sample_rate: u32,
        channel_count: u16,
    ) -> Result<ChannelRow, StoreError> {
        if sample_rate == 0 || channel_count == 0 {
            return Err(StoreError::Conflict(format!(
                "channel {name}: sample rate and channel count must be positive"
            )));
        }
        let gains = GainSet::default()
            .with(AudioSource::Microphone, gains.microphone)
            .with(AudioSource::Tts, gains.tts)
            .with(AudioSource::Media, gains.media)
            .with(AudioSource::Master, gains.master);
        let id = ChannelId::new();
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, microphone_volume, tts_volume, media_volume, \
                 master_volume, sample_rate, channel_count, is_deleted, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                rusqlite::params![
                    id.as_str(),
                    name,
                    gains.microphone as f64,
                    gains.tts as f64,
                    gains.media as f64,
                    gains.master as f64,
                    sample_rate,
                    channel_count,
                    ts,
                ],
            )?;
            Ok(())
        })?;

        Ok(ChannelRow {
            id,
            name: name.to_string(),
            gains,
            sample_rate,
            channel_count,
            is_deleted: false,
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    /// Fetch a live channel. Soft-deleted channels are reported as not found.
    #[instrument(skip(self), fields(channel_id = %id))]
    pub fn get(&self, id: &ChannelId) -> Result<ChannelRow, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1 AND is_deleted = 0"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_channel(row),
                None => Err(StoreError::NotFound(format!("channel {id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ChannelRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels WHERE is_deleted = 0 ORDER BY name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut channels = Vec::new();
            while let Some(row) = rows.next()? {
                channels.push(row_to_channel(row)?);
            }
            Ok(channels)
        })
    }

    /// Persist one source's default gain. The value is clamped into [0, 1].
    #[instrument(skip(self), fields(channel_id = %id, source = %source))]
    pub fn set_default_gain(
        &self,
        id: &ChannelId,
        source: AudioSource,
        value: f32,
    ) -> Result<(), StoreError> {
        let value = value.clamp(0.0, 1.0) as f64;
        let column = gain_column(source);
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE channels SET {column} = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND is_deleted = 0"
                ),
                rusqlite::params![value, now(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("channel {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(channel_id = %id))]
    pub fn soft_delete(&self, id: &ChannelId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE channels SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![now(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("channel {id}")));
            }
            Ok(())
        })
    }
}
