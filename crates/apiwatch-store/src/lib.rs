//! apiwatch-store: append-only log of probe outcomes.
//!
//! Backed by [redb](https://docs.rs/redb). Every probe attempt becomes one
//! immutable [`CheckEvent`]; readers derive "latest status per endpoint" and
//! "trend over a lookback window" from the same log.
//!
//! # Layout
//!
//! Events are JSON-serialized into redb's `&[u8]` value columns under the
//! composite key `{endpoint}\0{checked_at_ms:020}`. The zero-padded timestamp
//! keeps one endpoint's events contiguous and time-ordered, and makes a
//! repeated append of the same attempt an idempotent overwrite.
//!
//! The `EventStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across endpoint loops.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::EventStore;
pub use types::*;
