//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the broadcast control plane.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntercomSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub transport: TransportSettings,
    pub audio: AudioSettings,
    pub content: ContentSettings,
    pub logging: LoggingSettings,
}

/// HTTP/WebSocket control surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per event-stream client queue depth before messages are dropped.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9190,
            max_send_queue: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: intercom_home().join("database").join("intercom.db"),
        }
    }
}

/// Outbound connection to the speaker delivery endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// A channel's endpoint is `{endpointBaseUrl}/{channelId}`.
    pub endpoint_base_url: String,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Outbound frames buffered per session before new frames are dropped.
    pub outbound_queue: usize,
    /// Reconnect attempts after a failed connect. Never more than one.
    pub reconnect_attempts: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            endpoint_base_url: "ws://127.0.0.1:9300/broadcast".to_string(),
            connect_timeout_ms: 5_000,
            send_timeout_ms: 2_000,
            close_timeout_ms: 2_000,
            outbound_queue: 64,
            reconnect_attempts: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub frame_ms: u32,
    pub fetch_timeout_ms: u64,
    /// Microphone frames buffered before the oldest input is refused.
    pub microphone_queue: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            fetch_timeout_ms: 10_000,
            microphone_queue: 32,
        }
    }
}

/// Where the raw PCM files named by the content catalog live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentSettings {
    pub media_dir: PathBuf,
    pub tts_dir: PathBuf,
}

impl Default for ContentSettings {
    fn default() -> Self {
        let home = intercom_home();
        Self {
            media_dir: home.join("media"),
            tts_dir: home.join("tts"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"intercom_transport": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: std::collections::BTreeMap::new(),
        }
    }
}

/// `~/.intercom`, falling back to `/tmp/.intercom` without a home.
pub fn intercom_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".intercom")
}
