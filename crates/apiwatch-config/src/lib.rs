//! apiwatch-config: the monitor's configuration surface.
//!
//! A single TOML document describes the monitored endpoints, the shared
//! auth profiles they reference, the SQL data sources used for request
//! binding, and the outer collaborators (vault, event store, notifier).
//! The document is loaded once at startup and treated as immutable.

pub mod config;
pub mod duration;
pub mod error;

pub use config::*;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
