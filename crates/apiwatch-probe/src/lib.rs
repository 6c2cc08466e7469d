//! apiwatch-probe: the monitoring engine.
//!
//! Probes HTTP endpoints on their own schedules, classifies every attempt
//! against the endpoint's success rule, records the outcome, and alerts on
//! failures.
//!
//! # Architecture
//!
//! ```text
//! Monitor
//!   └── Per-endpoint background task
//!       ├── Probe::check()  (HttpChecker)
//!       │   ├── DataBinder::bind()      → URL / body / headers
//!       │   │   └── ScalarQuery          (SqlDataSources)
//!       │   ├── AuthResolver             → credential header
//!       │   ├── send_with_retry()        → response
//!       │   └── evaluate()               → status → latency → JSON pointer
//!       ├── Notifier (failures only, best-effort)
//!       └── ResultSink (StoreSink / SqlResultSink / FanoutSink)
//! ```
//!
//! # Fault containment
//!
//! Every attempt yields exactly one [`CheckResult`]. Probe errors and
//! panics become `Exception` results at the loop boundary; sink and
//! notifier errors are logged and the loop carries on.

pub mod binder;
pub mod checker;
pub mod datasource;
pub mod error;
pub mod evaluate;
pub mod monitor;
pub mod notify;
pub mod result;
pub mod sink;
pub mod transport;

pub use binder::{BoundRequest, DataBinder, ScalarQuery, TokenMap};
pub use checker::{HttpChecker, Probe};
pub use datasource::SqlDataSources;
pub use error::{ProbeError, ProbeResult};
pub use evaluate::{Observation, Verdict, evaluate};
pub use monitor::{Monitor, next_delay};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use result::{CheckResult, Reason, epoch_ms};
pub use sink::{FanoutSink, ResultSink, SqlResultSink, StoreSink, check_event};
pub use transport::RetryPolicy;
