//! Inbound gateway messages.
//!
//! The gateway's messages vary a lot by plugin, so they are kept as a parsed
//! document and read through accessors rather than forced into one schema.

use std::fmt;

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::TextCodec;
use crate::types::{GatewayError, Jsep, TrickleCandidate};

/// Top-level `janus` discriminator of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminator {
    Ack,
    Success,
    Error,
    Event,
    Trickle,
    WebrtcUp,
    Hangup,
    Detached,
    Media,
    Slowlink,
    Timeout,
}

impl Discriminator {
    /// Parses a wire discriminator. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ack" => Self::Ack,
            "success" => Self::Success,
            "error" => Self::Error,
            "event" => Self::Event,
            "trickle" => Self::Trickle,
            "webrtcup" => Self::WebrtcUp,
            "hangup" => Self::Hangup,
            "detached" => Self::Detached,
            "media" => Self::Media,
            "slowlink" => Self::Slowlink,
            "timeout" => Self::Timeout,
            _ => return None,
        })
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Success => "success",
            Self::Error => "error",
            Self::Event => "event",
            Self::Trickle => "trickle",
            Self::WebrtcUp => "webrtcup",
            Self::Hangup => "hangup",
            Self::Detached => "detached",
            Self::Media => "media",
            Self::Slowlink => "slowlink",
            Self::Timeout => "timeout",
        }
    }

    /// Returns true for messages that answer a specific transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Event)
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous, non-transactional notification about a handle or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// The PeerConnection with the gateway is up.
    WebrtcUp,
    /// The PeerConnection was closed.
    Hangup { reason: Option<String> },
    /// The plugin handle was detached.
    Detached,
    /// Media of one kind started or stopped flowing.
    Media {
        kind: Option<String>,
        receiving: Option<bool>,
    },
    /// The gateway reported packet loss.
    Slowlink { uplink: Option<bool>, lost: Option<u64> },
    /// The session expired on the gateway.
    Timeout,
}

/// A parsed inbound message. Always a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    doc: Value,
}

impl Inbound {
    /// Parses a text frame with the default codec.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        Self::parse_with(&TextCodec::default(), text)
    }

    /// Parses a text frame with the given codec.
    pub fn parse_with(codec: &TextCodec, text: &str) -> ProtocolResult<Self> {
        let doc: Value = codec.decode(text)?;
        Self::from_value(doc)
    }

    /// Wraps an already parsed document.
    pub fn from_value(doc: Value) -> ProtocolResult<Self> {
        if !doc.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(Self { doc })
    }

    /// Returns the raw discriminator string, if any.
    pub fn discriminator(&self) -> Option<&str> {
        self.doc.get("janus").and_then(Value::as_str)
    }

    /// Returns the parsed discriminator; `None` if missing or unknown.
    pub fn kind(&self) -> Option<Discriminator> {
        self.discriminator().and_then(Discriminator::parse)
    }

    /// Returns the echoed transaction id.
    pub fn transaction(&self) -> Option<&str> {
        self.doc.get("transaction").and_then(Value::as_str)
    }

    /// Returns the session the message belongs to.
    pub fn session_id(&self) -> Option<u64> {
        self.doc.get("session_id").and_then(Value::as_u64)
    }

    /// Returns the handle that emitted the message.
    pub fn sender(&self) -> Option<u64> {
        self.doc.get("sender").and_then(Value::as_u64)
    }

    /// Returns `data.id`, the identifier assigned by `create` and `attach`.
    ///
    /// Read straight from the JSON number, so the full 64-bit range survives.
    pub fn data_id(&self) -> Option<u64> {
        self.doc
            .get("data")
            .and_then(|data| data.get("id"))
            .and_then(Value::as_u64)
    }

    /// Returns the `error` object of an error envelope.
    pub fn gateway_error(&self) -> Option<GatewayError> {
        let error = self.doc.get("error")?;
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let reason = error
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(GatewayError::new(code, reason))
    }

    /// Returns the plugin's name from `plugindata.plugin`.
    pub fn plugin(&self) -> Option<&str> {
        self.doc
            .get("plugindata")
            .and_then(|p| p.get("plugin"))
            .and_then(Value::as_str)
    }

    /// Returns the plugin payload from `plugindata.data`.
    pub fn plugin_data(&self) -> Option<&Value> {
        self.doc.get("plugindata").and_then(|p| p.get("data"))
    }

    /// Returns the plugin's textual `result`.
    ///
    /// Looks in `plugindata.data` first, then in a top-level `data` object.
    pub fn plugin_result(&self) -> Option<&str> {
        self.plugin_data()
            .and_then(|data| data.get("result"))
            .or_else(|| self.doc.get("data").and_then(|data| data.get("result")))
            .and_then(Value::as_str)
    }

    /// Returns the error reported inside a plugin event, if any.
    pub fn plugin_error(&self) -> Option<GatewayError> {
        let data = self.plugin_data()?;
        let code = data.get("error_code").and_then(Value::as_i64);
        let reason = data.get("error").and_then(Value::as_str);
        match (code, reason) {
            (None, None) => None,
            (code, reason) => Some(GatewayError::new(
                code.unwrap_or_default(),
                reason.unwrap_or_default(),
            )),
        }
    }

    /// Returns the session description attached to the message.
    pub fn jsep(&self) -> ProtocolResult<Option<Jsep>> {
        match self.doc.get("jsep") {
            None | Some(Value::Null) => Ok(None),
            Some(jsep) => serde_json::from_value(jsep.clone())
                .map(Some)
                .map_err(|e| ProtocolError::invalid_field("jsep", e.to_string())),
        }
    }

    /// Returns the candidate of a `trickle` notification.
    pub fn candidate(&self) -> ProtocolResult<TrickleCandidate> {
        let candidate = self
            .doc
            .get("candidate")
            .ok_or(ProtocolError::MissingField("candidate"))?;
        serde_json::from_value(candidate.clone())
            .map_err(|e| ProtocolError::invalid_field("candidate", e.to_string()))
    }

    /// Decodes a lifecycle notification. `None` for other message kinds.
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        let str_field = |name: &str| self.doc.get(name).and_then(Value::as_str).map(String::from);
        let bool_field = |name: &str| self.doc.get(name).and_then(Value::as_bool);

        Some(match self.kind()? {
            Discriminator::WebrtcUp => Lifecycle::WebrtcUp,
            Discriminator::Hangup => Lifecycle::Hangup {
                reason: str_field("reason"),
            },
            Discriminator::Detached => Lifecycle::Detached,
            Discriminator::Media => Lifecycle::Media {
                kind: str_field("type"),
                receiving: bool_field("receiving"),
            },
            Discriminator::Slowlink => Lifecycle::Slowlink {
                uplink: bool_field("uplink"),
                lost: self.doc.get("lost").and_then(Value::as_u64),
            },
            Discriminator::Timeout => Lifecycle::Timeout,
            _ => return None,
        })
    }

    /// Returns the underlying document.
    pub fn as_value(&self) -> &Value {
        &self.doc
    }
}
