//! Endpoint monitor: one background task per configured endpoint.
//!
//! Each task runs its checks strictly one after another. A cycle probes,
//! alerts on failure, records the outcome, then sleeps for the configured
//! interval minus the time the cycle took, plus a little jitter. Shutdown
//! interrupts both the sleep and an in-flight probe.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use apiwatch_config::{EndpointConfig, MIN_INTERVAL};

use crate::checker::Probe;
use crate::notify::Notifier;
use crate::result::{CheckResult, epoch_ms};
use crate::sink::ResultSink;

/// Default jitter bounds in milliseconds.
pub const DEFAULT_JITTER_MS: Range<u64> = 250..1000;

/// Delay before the next cycle. Never negative; a cycle that overran its
/// interval is followed immediately by the next one.
pub fn next_delay(interval: Duration, elapsed: Duration, jitter: Duration) -> Duration {
    (interval.max(MIN_INTERVAL) + jitter).saturating_sub(elapsed)
}

fn draw_jitter(range: &Range<u64>) -> Duration {
    if range.is_empty() {
        return Duration::from_millis(range.start);
    }
    Duration::from_millis(rand::rng().random_range(range.clone()))
}

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// What every endpoint task shares.
#[derive(Clone)]
struct Collaborators {
    probe: Arc<dyn Probe>,
    sink: Arc<dyn ResultSink>,
    notifier: Arc<dyn Notifier>,
    jitter: Range<u64>,
}

pub struct Monitor {
    deps: Collaborators,
    /// Endpoint name → running task.
    slots: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl Monitor {
    pub fn new(
        probe: Arc<dyn Probe>,
        sink: Arc<dyn ResultSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            deps: Collaborators {
                probe,
                sink,
                notifier,
                jitter: DEFAULT_JITTER_MS,
            },
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Jitter bounds in milliseconds. An empty range means a fixed `start`.
    pub fn with_jitter(mut self, jitter_ms: Range<u64>) -> Self {
        self.deps.jitter = jitter_ms;
        self
    }

    /// Start the loop for an endpoint, replacing any loop of the same name.
    pub async fn start(&self, endpoint: EndpointConfig) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = endpoint.name.clone();
        let interval = endpoint.interval();
        let deps = self.deps.clone();

        let handle = tokio::spawn(run_endpoint_loop(Arc::new(endpoint), deps, shutdown_rx));

        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            name.clone(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(endpoint = %name, interval_s = interval.as_secs(), "endpoint monitor started");
    }

    pub async fn stop(&self, name: &str) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.remove(name) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(endpoint = %name, "endpoint monitor stopped");
        }
    }

    pub async fn stop_all(&self) {
        let mut slots = self.slots.write().await;
        for (name, slot) in slots.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(endpoint = %name, "endpoint monitor stopped");
        }
        info!("all endpoint monitors stopped");
    }

    /// Names of endpoints with a running loop, sorted.
    pub async fn active_endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_monitoring(&self, name: &str) -> bool {
        self.slots.read().await.contains_key(name)
    }

    /// Monitor `endpoints` until `shutdown` flips, then stop every loop.
    /// With no endpoints this idles until shutdown.
    pub async fn run(&self, endpoints: Vec<EndpointConfig>, mut shutdown: watch::Receiver<bool>) {
        if endpoints.is_empty() {
            warn!("no endpoints configured, idling");
        }
        for endpoint in endpoints {
            self.start(endpoint).await;
        }

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        self.stop_all().await;
    }
}

async fn run_endpoint_loop(
    endpoint: Arc<EndpointConfig>,
    deps: Collaborators,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = endpoint.interval();
    debug!(endpoint = %endpoint.name, "endpoint loop starting");

    loop {
        let cycle_start = Instant::now();
        let checked_at_ms = epoch_ms();

        let probe = deps.probe.clone();
        let target = endpoint.clone();
        let mut attempt = tokio::spawn(async move { probe.check(&target).await });

        let outcome = tokio::select! {
            outcome = &mut attempt => outcome,
            _ = shutdown.changed() => {
                attempt.abort();
                break;
            }
        };

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CheckResult::exception(&endpoint.name, e.to_string()),
            Err(e) => CheckResult::exception(&endpoint.name, format!("probe task failed: {e}")),
        };
        result.checked_at_ms = checked_at_ms;

        report(&endpoint, &result, &deps).await;

        let delay = next_delay(interval, cycle_start.elapsed(), draw_jitter(&deps.jitter));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(endpoint = %endpoint.name, "endpoint loop shutting down");
}

/// Alert and record one result. Failures here are logged, never raised.
async fn report(endpoint: &EndpointConfig, result: &CheckResult, deps: &Collaborators) {
    if result.is_success() {
        info!(
            endpoint = %endpoint.name,
            elapsed_ms = result.elapsed_ms(),
            status = result.status,
            "check ok"
        );
    } else {
        warn!(
            endpoint = %endpoint.name,
            reason = %result.reason,
            details = %result.details,
            elapsed_ms = result.elapsed_ms(),
            "check failed"
        );
        if let Err(e) = deps.notifier.notify_failure(result).await {
            warn!(endpoint = %endpoint.name, error = %e, "failure notification not delivered");
        }
    }

    if let Err(e) = deps
        .sink
        .record(endpoint, result, result.persisted_status())
        .await
    {
        error!(endpoint = %endpoint.name, error = %e, "failed to record check result");
    }
}
