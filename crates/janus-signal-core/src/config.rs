//! Client configuration.
//!
//! Everything lives in one TOML document; every key is optional:
//!
//! ```toml
//! gateway_url = "wss://gateway.example.org/janus"
//! plugin = "janus.plugin.videoroom"
//! keepalive_interval_secs = 25
//!
//! [room]
//! audio = true
//! video = false
//! request = "join"
//! room = 1234
//! ptype = "publisher"
//! ```
//!
//! Keys under `[room]` other than `audio` and `video` are passed through
//! verbatim in the body of the join request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

/// Default gateway WebSocket endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:8188";

/// WebSocket subprotocol spoken by the gateway.
pub const DEFAULT_SUBPROTOCOL: &str = "janus-protocol";

/// Plugin attached when none is configured.
pub const DEFAULT_PLUGIN: &str = "janus.plugin.echotest";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Media capability flags and extra plugin fields for the join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomParams {
    /// Offer to send audio.
    pub audio: bool,
    /// Offer to send video.
    pub video: bool,
    /// Plugin-specific join fields (`request`, `room`, `ptype`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RoomParams {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            extra: Map::new(),
        }
    }
}

impl RoomParams {
    /// Creates params with the given capability flags.
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            extra: Map::new(),
        }
    }

    /// Builder: add a plugin-specific join field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Body of the join message: extra fields plus the capability flags.
    pub fn join_body(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("audio".to_string(), Value::Bool(self.audio));
        body.insert("video".to_string(), Value::Bool(self.video));
        Value::Object(body)
    }

    /// Body of the configure message that accompanies the local description.
    pub fn configure_body(&self) -> Value {
        json!({
            "request": "configure",
            "audio": self.audio,
            "video": self.video,
        })
    }
}

/// Configuration for the signaling client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway WebSocket URL (`ws://` or `wss://`).
    pub gateway_url: String,

    /// WebSocket subprotocol requested during the handshake.
    pub subprotocol: String,

    /// Plugin to attach to.
    pub plugin: String,

    /// Join parameters.
    pub room: RoomParams,

    /// Seconds between keepalives; 0 disables them.
    pub keepalive_interval_secs: u64,

    /// Destroy the gateway session when closing.
    pub destroy_on_close: bool,

    /// Largest accepted or emitted text frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            plugin: DEFAULT_PLUGIN.to_string(),
            room: RoomParams::default(),
            keepalive_interval_secs: 25,
            destroy_on_close: true,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given gateway URL.
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            ..Default::default()
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Builder: set the plugin.
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    /// Builder: set the join parameters.
    pub fn with_room(mut self, room: RoomParams) -> Self {
        self.room = room;
        self
    }

    /// Builder: set the keepalive interval (zero disables).
    ///
    /// Keepalives are scheduled in whole seconds; a fractional interval is
    /// rounded up so it never collapses to zero.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        let mut secs = interval.as_secs();
        if interval.subsec_nanos() > 0 {
            secs += 1;
        }
        self.keepalive_interval_secs = secs;
        self
    }

    /// Builder: set whether the session is destroyed on close.
    pub fn with_destroy_on_close(mut self, destroy: bool) -> Self {
        self.destroy_on_close = destroy;
        self
    }

    /// Returns the keepalive interval, `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin.trim().is_empty() {
            return Err(ConfigError::Invalid("plugin must not be empty".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be positive".into(),
            ));
        }
        let url = Url::parse(&self.gateway_url)
            .map_err(|e| ConfigError::Invalid(format!("gateway_url: {}", e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "gateway_url: unsupported scheme {}",
                other
            ))),
        }
    }
}
