//! Plain-text rendering for the CLI.

use std::fmt::Write;

use apiwatch_probe::CheckResult;
use apiwatch_store::{CheckEvent, TrendPoint};

fn status_text(status: Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn result_line(result: &CheckResult) -> String {
    let mut line = format!(
        "{} {} status={} elapsed={}ms",
        result.endpoint,
        result.reason,
        status_text(result.status),
        result.elapsed_ms()
    );
    if !result.details.is_empty() {
        let _ = write!(line, " details={}", result.details);
    }
    line
}

/// One row per endpoint, grouped by environment.
pub fn latest_table(events: &[CheckEvent]) -> String {
    if events.is_empty() {
        return "no events recorded\n".to_string();
    }
    let name_width = events
        .iter()
        .map(|e| e.endpoint_name.len())
        .max()
        .unwrap_or(0)
        .max("ENDPOINT".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<name_width$} {:<6} {:<12} {:>7} {:>8}  CHECKED_AT_MS",
        "ENVIRONMENT", "ENDPOINT", "OK", "REASON", "STATUS", "LATENCY"
    );
    for e in events {
        let _ = writeln!(
            out,
            "{:<12} {:<name_width$} {:<6} {:<12} {:>7} {:>6}ms  {}",
            e.environment,
            e.endpoint_name,
            if e.is_success { "yes" } else { "no" },
            e.reason,
            status_text(e.http_status),
            e.latency_ms,
            e.checked_at_ms
        );
    }
    out
}

/// Trend points plus a success-rate summary line.
pub fn trend_table(points: &[TrendPoint]) -> String {
    if points.is_empty() {
        return "no events in range\n".to_string();
    }
    let mut out = String::new();
    for p in points {
        let _ = writeln!(
            out,
            "{}  {:>6}ms  {}",
            p.checked_at_ms,
            p.latency_ms,
            if p.is_success { "ok" } else { "FAIL" }
        );
    }
    let ok = points.iter().filter(|p| p.is_success).count();
    let avg = points.iter().map(|p| p.latency_ms).sum::<u64>() / points.len() as u64;
    let _ = writeln!(
        out,
        "{ok}/{} successful, average latency {avg}ms",
        points.len()
    );
    out
}
