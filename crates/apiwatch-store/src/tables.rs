//! redb table definitions for the event store.

use redb::TableDefinition;

pub const EVENTS_TABLE: &str = "check_events";
pub const LATEST_TABLE: &str = "latest_events";

/// Every check event, keyed by `{endpoint}\0{checked_at_ms:020}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new(EVENTS_TABLE);

/// Most recent event per endpoint, keyed by endpoint name.
pub const LATEST: TableDefinition<&str, &[u8]> = TableDefinition::new(LATEST_TABLE);
