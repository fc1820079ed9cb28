//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a
//! settings file may be partial; missing fields get their compiled
//! default during deserialization.

use serde::{Deserialize, Serialize};

/// Root settings for the wirebus server.
///
/// Loaded from a JSON file deep-merged over compiled defaults, then
/// overridden by `WIREBUS_*` environment variables.
///
/// ```json
/// {
///   "server": { "bindAddr": "127.0.0.1:9871" },
///   "heartbeat": { "intervalSecs": 10 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WirebusSettings {
    /// Socket/server settings.
    pub server: ServerSettings,
    /// Topic namespace and subscription-store settings.
    pub topics: TopicSettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Window-token signing settings.
    pub token: TokenSettings,
    /// Work-queue settings.
    pub queue: QueueSettings,
}

impl Default for WirebusSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            topics: TopicSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            token: TokenSettings::default(),
            queue: QueueSettings::default(),
        }
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Address the websocket listener binds to.
    pub bind_addr: String,
    /// Maximum buffered inbound bytes per connection before it is
    /// considered abusive and closed.
    pub max_frame_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9871".into(),
            max_frame_buffer: 1 << 20,
        }
    }
}

/// Topic namespace and subscription-store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicSettings {
    /// Prefix namespacing every broker topic, so multiple logical
    /// domains can share one broker.
    pub prefix: String,
    /// TTL in seconds for persisted per-window topic sets. Must exceed
    /// the longest expected delay between page render and socket open.
    pub store_ttl_secs: u64,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            prefix: "ws".into(),
            store_ttl_secs: 36_000,
        }
    }
}

/// Connection heartbeat settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Idle interval in seconds before a heartbeat is sent.
    pub interval_secs: u64,
    /// Sentinel string exchanged when idle; ignored by dispatch.
    pub sentinel: String,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            sentinel: "--HEARTBEAT--".into(),
        }
    }
}

/// Window-token signing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSettings {
    /// HMAC secret for signing window tokens. Deployments must override
    /// the compiled default.
    pub secret: String,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            secret: "insecure-dev-secret".into(),
        }
    }
}

/// Work-queue settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Queue used when an entry declares none, and for scheduled
    /// client-bound publishes.
    pub default_queue: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_queue: "default".into(),
        }
    }
}
