//! Ambient support shared by the janus-signal crates: tracing setup and
//! client configuration.

pub mod config;
pub mod tracing;

pub use self::config::{ClientConfig, ConfigError, RoomParams};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
