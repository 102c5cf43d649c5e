//! agentfleet-core: shared types and configuration for agentfleet.
//!
//! `fleet.toml` is parsed into a raw [`FleetConfig`] and then resolved into
//! typed settings ([`Settings`]) and per-fleet [`FleetSpec`]s. Every other
//! crate consumes the resolved form only.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{FleetConfig, Settings};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
