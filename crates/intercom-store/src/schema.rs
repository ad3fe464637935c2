/// SQL DDL for the intercom store.
/// WAL mode + foreign keys enabled at connection time.
///
/// Mapping rows are never hard-deleted: `is_current = 0` retracts a row,
/// `is_deleted = 1` soft-deletes it. Both must be clear for the row to count.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    microphone_volume REAL NOT NULL DEFAULT 1.0,
    tts_volume REAL NOT NULL DEFAULT 1.0,
    media_volume REAL NOT NULL DEFAULT 1.0,
    master_volume REAL NOT NULL DEFAULT 1.0,
    sample_rate INTEGER NOT NULL DEFAULT 48000,
    channel_count INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS speakers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS speaker_groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS speaker_channel_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    speaker_id TEXT NOT NULL REFERENCES speakers(id),
    channel_id TEXT NOT NULL REFERENCES channels(id),
    is_current INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (speaker_id, channel_id)
);

CREATE TABLE IF NOT EXISTS speaker_group_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    speaker_id TEXT NOT NULL REFERENCES speakers(id),
    group_id TEXT NOT NULL REFERENCES speaker_groups(id),
    is_current INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (speaker_id, group_id)
);

CREATE TABLE IF NOT EXISTS group_channel_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL REFERENCES speaker_groups(id),
    channel_id TEXT NOT NULL REFERENCES channels(id),
    is_current INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (group_id, channel_id)
);

CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    file_name TEXT NOT NULL,
    duration_seconds REAL NOT NULL DEFAULT 0.0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tts_scripts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    file_name TEXT NOT NULL,
    duration_seconds REAL NOT NULL DEFAULT 0.0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_speaker_channel_channel ON speaker_channel_map(channel_id);
CREATE INDEX IF NOT EXISTS idx_speaker_group_group ON speaker_group_map(group_id);
CREATE INDEX IF NOT EXISTS idx_group_channel_channel ON group_channel_map(channel_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
