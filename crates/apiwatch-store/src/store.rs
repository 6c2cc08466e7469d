//! EventStore: redb-backed persistence for check events.
//!
//! Appends are single write transactions that insert into the event log and
//! refresh the per-endpoint latest row together, so a reader never sees one
//! without the other. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Build a closure mapping any `Display` error into a `StoreError` variant,
/// filling the given context fields and the error text as `message`.
macro_rules! map_err {
    ($variant:ident { $($field:ident : $value:expr),* $(,)? }) => {
        |e| StoreError::$variant {
            $($field: $value,)*
            message: e.to_string(),
        }
    };
}

/// Event keys embed a NUL separator; errors show it as `@`.
fn shown(key: &str) -> String {
    key.replace(KEY_SEPARATOR, "@")
}

/// Thread-safe event store backed by redb.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    /// Open (or create) a persistent event store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path)
            .map_err(map_err!(Open { location: path.display().to_string() }))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "event store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory event store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open { location: "memory".to_string() }))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory event store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(map_err!(Transaction { operation: "setup" }))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(EVENTS)
            .map_err(map_err!(Table { table: EVENTS_TABLE }))?;
        txn.open_table(LATEST)
            .map_err(map_err!(Table { table: LATEST_TABLE }))?;
        txn.commit()
            .map_err(map_err!(Transaction { operation: "setup" }))?;
        Ok(())
    }

    /// Append one event. Re-appending an event with the same endpoint and
    /// timestamp overwrites it.
    pub fn append(&self, event: &CheckEvent) -> StoreResult<()> {
        let key = event.table_key();
        let name = event.endpoint_name.as_str();
        let value = serde_json::to_vec(event)
            .map_err(map_err!(Encode { endpoint: name.to_string() }))?;
        let txn = self
            .db
            .begin_write()
            .map_err(map_err!(Transaction { operation: "append" }))?;
        {
            let mut events = txn
                .open_table(EVENTS)
                .map_err(map_err!(Table { table: EVENTS_TABLE }))?;
            events
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write { table: EVENTS_TABLE, key: shown(&key) }))?;

            let mut latest = txn
                .open_table(LATEST)
                .map_err(map_err!(Table { table: LATEST_TABLE }))?;
            let newer = match latest
                .get(name)
                .map_err(map_err!(Read { table: LATEST_TABLE, key: name.to_string() }))?
            {
                Some(guard) => {
                    let current: CheckEvent = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Decode { table: LATEST_TABLE, key: name.to_string() }))?;
                    current.checked_at_ms <= event.checked_at_ms
                }
                None => true,
            };
            if newer {
                latest
                    .insert(name, value.as_slice())
                    .map_err(map_err!(Write { table: LATEST_TABLE, key: name.to_string() }))?;
            }
        }
        txn.commit()
            .map_err(map_err!(Transaction { operation: "append" }))?;
        debug!(endpoint = %name, at = event.checked_at_ms, "check event stored");
        Ok(())
    }

    /// Latest event of every endpoint, ordered by environment then name.
    pub fn latest(&self) -> StoreResult<Vec<CheckEvent>> {
        let txn = self
            .db
            .begin_read()
            .map_err(map_err!(Transaction { operation: "latest" }))?;
        let table = txn
            .open_table(LATEST)
            .map_err(map_err!(Table { table: LATEST_TABLE }))?;
        let mut results = Vec::new();
        for entry in table
            .iter()
            .map_err(map_err!(Read { table: LATEST_TABLE, key: "*".to_string() }))?
        {
            let (key, value) =
                entry.map_err(map_err!(Read { table: LATEST_TABLE, key: "*".to_string() }))?;
            let event: CheckEvent = serde_json::from_slice(value.value())
                .map_err(map_err!(Decode { table: LATEST_TABLE, key: key.value().to_string() }))?;
            results.push(event);
        }
        results.sort_by(|a, b| {
            a.environment
                .cmp(&b.environment)
                .then_with(|| a.endpoint_name.cmp(&b.endpoint_name))
        });
        Ok(results)
    }

    /// Distinct environments that have at least one recorded event.
    pub fn environments(&self) -> StoreResult<Vec<String>> {
        let mut envs: Vec<String> = self
            .latest()?
            .into_iter()
            .map(|event| event.environment)
            .collect();
        envs.sort();
        envs.dedup();
        Ok(envs)
    }

    /// All events of one endpoint, oldest first, checked at or after `since_ms`.
    pub fn events_since(&self, endpoint: &str, since_ms: u64) -> StoreResult<Vec<CheckEvent>> {
        let start = event_key(endpoint, since_ms);
        let end = format!("{endpoint}{}", char::from(KEY_SEPARATOR as u8 + 1));
        let txn = self
            .db
            .begin_read()
            .map_err(map_err!(Transaction { operation: "events_since" }))?;
        let table = txn
            .open_table(EVENTS)
            .map_err(map_err!(Table { table: EVENTS_TABLE }))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read { table: EVENTS_TABLE, key: shown(&start) }))?
        {
            let (key, value) =
                entry.map_err(map_err!(Read { table: EVENTS_TABLE, key: shown(&start) }))?;
            let event: CheckEvent = serde_json::from_slice(value.value())
                .map_err(map_err!(Decode { table: EVENTS_TABLE, key: shown(key.value()) }))?;
            results.push(event);
        }
        Ok(results)
    }

    /// Latency/success trend for one endpoint in one environment.
    pub fn trend(
        &self,
        endpoint: &str,
        environment: &str,
        since_ms: u64,
    ) -> StoreResult<Vec<TrendPoint>> {
        Ok(self
            .events_since(endpoint, since_ms)?
            .iter()
            .filter(|event| event.environment == environment)
            .map(TrendPoint::from)
            .collect())
    }

    /// Total number of stored events.
    pub fn count(&self) -> StoreResult<u64> {
        let txn = self
            .db
            .begin_read()
            .map_err(map_err!(Transaction { operation: "count" }))?;
        let table = txn
            .open_table(EVENTS)
            .map_err(map_err!(Table { table: EVENTS_TABLE }))?;
        table
            .len()
            .map_err(map_err!(Read { table: EVENTS_TABLE, key: "*".to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, env: &str, at: u64, ok: bool) -> CheckEvent {
        CheckEvent {
            endpoint_name: name.to_string(),
            environment: env.to_string(),
            url: format!("https://api.example.com/{name}"),
            http_method: "GET".to_string(),
            checked_at_ms: at,
            is_success: ok,
            http_status: if ok { Some(200) } else { Some(503) },
            reason: if ok { "OK" } else { "BadStatus" }.to_string(),
            details: (!ok).then(|| "Got 503".to_string()),
            latency_ms: 40 + at % 10,
            json_pointer: None,
            expected_value: None,
        }
    }

    #[test]
    fn append_and_count() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&event("orders", "Prod", 1_000, true)).unwrap();
        store.append(&event("orders", "Prod", 2_000, false)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn append_same_timestamp_is_idempotent() {
        let store = EventStore::open_in_memory().unwrap();
        let e = event("orders", "Prod", 1_000, true);
        store.append(&e).unwrap();
        store.append(&e).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn latest_tracks_newest_event() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&event("orders", "Prod", 2_000, false)).unwrap();
        // An older event arriving late does not displace the newer one.
        store.append(&event("orders", "Prod", 1_000, true)).unwrap();
        store.append(&event("billing", "Prod", 1_500, true)).unwrap();
        store.append(&event("auth", "Dev", 1_500, true)).unwrap();

        let latest = store.latest().unwrap();
        let names: Vec<&str> = latest.iter().map(|e| e.endpoint_name.as_str()).collect();
        assert_eq!(names, vec!["auth", "billing", "orders"]);
        assert_eq!(latest[2].checked_at_ms, 2_000);
        assert!(!latest[2].is_success);
    }

    #[test]
    fn environments_are_distinct_and_sorted() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&event("a", "Prod", 1, true)).unwrap();
        store.append(&event("b", "Dev", 1, true)).unwrap();
        store.append(&event("c", "Prod", 1, true)).unwrap();
        assert_eq!(store.environments().unwrap(), vec!["Dev", "Prod"]);
    }

    #[test]
    fn trend_respects_window_environment_and_endpoint() {
        let store = EventStore::open_in_memory().unwrap();
        for at in [1_000, 2_000, 3_000, 4_000] {
            store.append(&event("orders", "Prod", at, at != 3_000)).unwrap();
        }
        store.append(&event("orders", "Dev", 3_500, true)).unwrap();
        store.append(&event("orders-v2", "Prod", 3_500, true)).unwrap();

        let trend = store.trend("orders", "Prod", 2_000).unwrap();
        let times: Vec<u64> = trend.iter().map(|p| p.checked_at_ms).collect();
        assert_eq!(times, vec![2_000, 3_000, 4_000]);
        assert!(!trend[1].is_success);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.redb");
        {
            let store = EventStore::open(&path).unwrap();
            store.append(&event("orders", "Prod", 1_000, true)).unwrap();
        }
        let store = EventStore::open(&path).unwrap();
        assert_eq!(store.latest().unwrap().len(), 1);
    }

    #[test]
    fn open_error_names_the_location() {
        let dir = tempfile::tempdir().unwrap();
        let err = EventStore::open(dir.path()).err().expect("a directory is not a store");
        assert!(matches!(err, StoreError::Open { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn corrupt_row_names_table_and_key() {
        let store = EventStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut latest = txn.open_table(LATEST).unwrap();
            latest.insert("orders", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.latest().unwrap_err();
        assert!(matches!(err, StoreError::Decode { table: LATEST_TABLE, .. }));
        let message = err.to_string();
        assert!(message.contains("latest_events"), "{message}");
        assert!(message.contains("'orders'"), "{message}");
    }

    #[test]
    fn event_keys_are_shown_without_separator() {
        assert_eq!(shown(&event_key("orders", 7)), "orders@00000000000000000007");
    }
}
