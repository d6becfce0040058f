#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Metrics for the experiment miner.
//!
//! Two sinks live here:
//! - [`csv_log`]: the per-session, append-only CSV file every iteration is
//!   written to.
//! - A small Prometheus registry mirroring the same numbers for live scraping:
//!   - `miner_hash_rate`: rate of the most recent iteration (iterations/s)
//!   - `miner_iterations_total`: iterations completed (all sessions)
//!   - `miner_active_sessions`: sessions currently running (0 or 1)
//!   - `miner_log_write_errors_total`: CSV rows that failed to write
//!
//! Optionally runs a Warp-based HTTP endpoint (`/metrics`) when the
//! `http-exporter` feature is enabled.

pub mod csv_log;

pub use csv_log::{CsvLog, MetricRecord, CSV_HEADER, DATA_DIR_NAME};

use once_cell::sync::Lazy;
use prometheus::{Gauge, IntCounter, IntGauge, Registry};

#[cfg(feature = "http-exporter")]
use {
    anyhow::Result,
    prometheus::{Encoder, TextEncoder},
    std::net::SocketAddr,
    warp::Filter,
};

#[cfg(not(feature = "http-exporter"))]
use anyhow::Result;

// ---------------------------------------------------------------------------
// Global Registry
// ---------------------------------------------------------------------------

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HASH_RATE: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new(
        "miner_hash_rate",
        "Rate of the most recent iteration in iterations per second",
    )
    .expect("create miner_hash_rate");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("register miner_hash_rate");
    g
});

static ITERATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("miner_iterations_total", "Total work loop iterations")
        .expect("create miner_iterations_total");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("register miner_iterations_total");
    c
});

static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("miner_active_sessions", "Number of running sessions")
        .expect("create miner_active_sessions");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("register miner_active_sessions");
    g
});

static LOG_WRITE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "miner_log_write_errors_total",
        "CSV rows that could not be written",
    )
    .expect("create miner_log_write_errors_total");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("register miner_log_write_errors_total");
    c
});

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Record one completed iteration and its rate.
pub fn record_iteration(rate: f64) {
    ITERATIONS_TOTAL.inc();
    HASH_RATE.set(rate);
}

/// Count a CSV row that was skipped because the write failed.
pub fn inc_log_write_errors() {
    LOG_WRITE_ERRORS.inc();
}

/// Set the number of active sessions (0 or 1).
pub fn set_active_sessions(n: i64) {
    ACTIVE_SESSIONS.set(n);
}

/// Current value of `miner_iterations_total`.
pub fn iterations_total() -> u64 {
    ITERATIONS_TOTAL.get()
}

/// Current value of `miner_hash_rate`.
pub fn hash_rate() -> f64 {
    HASH_RATE.get()
}

/// Encode all registered metrics in the Prometheus text format.
pub fn gather_text() -> String {
    use prometheus::Encoder as _;

    // Touch every metric so an idle process still exports the full set.
    Lazy::force(&HASH_RATE);
    Lazy::force(&ITERATIONS_TOTAL);
    Lazy::force(&ACTIVE_SESSIONS);
    Lazy::force(&LOG_WRITE_ERRORS);

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::with_capacity(1024);
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        log::warn!("metrics: failed to encode registry: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// HTTP Exporter
// ---------------------------------------------------------------------------

/// Start the Prometheus HTTP exporter on `0.0.0.0:port`.
///
/// Spawns the exporter as a background task and returns immediately.
/// Serves plaintext metrics at `GET /metrics`.
#[cfg(feature = "http-exporter")]
pub async fn start_http_exporter(port: u16) -> Result<()> {
    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        let encoder = TextEncoder::new();
        let body = gather_text();
        warp::http::Response::builder()
            .header("Content-Type", encoder.format_type())
            .body(body)
    });

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tokio::spawn(async move {
        warp::serve(metrics_route).run(addr).await;
    });
    log::info!("metrics exporter listening on {addr}");

    Ok(())
}

/// No-op when HTTP exporter feature is disabled.
#[cfg(not(feature = "http-exporter"))]
pub async fn start_http_exporter(_port: u16) -> Result<()> {
    log::warn!(
        "metrics::start_http_exporter called but 'http-exporter' feature is disabled; ignoring"
    );
    Ok(())
}
