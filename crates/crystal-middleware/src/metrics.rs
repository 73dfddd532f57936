//! Filter layer metrics for Prometheus
//!
//! Tracks request outcomes per tier, filter executions, filter gateway
//! latency and metadata persistence failures.

use crystal_common::{ExecutionMode, ScheduledFilter, Tier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// What the layer did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// Handed downstream untouched (not an object, no chain, verb not handled)
    Passthrough,
    /// Filter or dependency container, or account without filters enabled
    Bypassed,
    /// At least one filter was scheduled
    Filtered,
    /// Answered with a generic 500
    Failed,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Passthrough => "passthrough",
            RequestOutcome::Bypassed => "bypassed",
            RequestOutcome::Filtered => "filtered",
            RequestOutcome::Failed => "failed",
        }
    }
}

/// Per-tier filter gateway call metrics
#[derive(Debug, Default)]
struct GatewayCallMetrics {
    calls_total: AtomicU64,
    calls_failed: AtomicU64,
    /// Payload bytes handed to the gateway
    bytes_in_total: AtomicU64,
    latency_sum_us: AtomicU64,
    /// Cumulative buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s, 40s
    latency_buckets: [AtomicU64; 12],
}

const LATENCY_BUCKET_BOUNDARIES_MS: [u64; 12] =
    [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000, 40000];

impl GatewayCallMetrics {
    fn record(&self, success: bool, bytes_in: u64, latency_us: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_in_total.fetch_add(bytes_in, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let latency_ms = latency_us / 1000;
        for (i, &boundary) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
            if latency_ms <= boundary {
                self.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Filter layer metrics collector
#[derive(Debug)]
pub struct FilterMetrics {
    requests: RwLock<HashMap<(Tier, RequestOutcome), AtomicU64>>,
    /// Filter runs keyed by filter name and mode
    executions: RwLock<HashMap<(String, ExecutionMode), AtomicU64>>,
    gateway: RwLock<HashMap<Tier, GatewayCallMetrics>>,
    metadata_write_failures: AtomicU64,
    admissions: RwLock<HashMap<String, AtomicU64>>,
    start_time: Instant,
}

impl FilterMetrics {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            gateway: RwLock::new(HashMap::new()),
            metadata_write_failures: AtomicU64::new(0),
            admissions: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record how a request was handled
    pub fn record_request(&self, tier: Tier, outcome: RequestOutcome) {
        increment(&self.requests, (tier, outcome));
    }

    /// Record one filter gateway call and the filters it ran
    pub fn record_execution(
        &self,
        tier: Tier,
        filters: &[ScheduledFilter],
        success: bool,
        bytes_in: u64,
        latency_us: u64,
    ) {
        self.gateway
            .write()
            .entry(tier)
            .or_default()
            .record(success, bytes_in, latency_us);

        if success {
            for filter in filters {
                increment(&self.executions, (filter.name().to_string(), filter.mode));
            }
        }
    }

    /// Record a failed extended metadata write
    pub fn record_metadata_write_failure(&self) {
        self.metadata_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admission control registration
    pub fn record_admission(&self, account: &str) {
        increment(&self.admissions, account.to_string());
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(4 * 1024);

        let _ = writeln!(output, "# HELP crystal_uptime_seconds Filter layer uptime in seconds");
        let _ = writeln!(output, "# TYPE crystal_uptime_seconds counter");
        let _ = writeln!(output, "crystal_uptime_seconds {}", self.start_time.elapsed().as_secs());

        let _ = writeln!(
            output,
            "# HELP crystal_requests_total Requests seen by the filter layer by outcome"
        );
        let _ = writeln!(output, "# TYPE crystal_requests_total counter");
        for ((tier, outcome), count) in self.requests.read().iter() {
            let _ = writeln!(
                output,
                "crystal_requests_total{{tier=\"{}\",outcome=\"{}\"}} {}",
                tier,
                outcome.as_str(),
                count.load(Ordering::Relaxed)
            );
        }

        let executions = self.executions.read();
        if !executions.is_empty() {
            let _ = writeln!(
                output,
                "# HELP crystal_filter_executions_total Filters applied by name and mode"
            );
            let _ = writeln!(output, "# TYPE crystal_filter_executions_total counter");
            for ((filter, mode), count) in executions.iter() {
                let mode = match mode {
                    ExecutionMode::Forward => "forward",
                    ExecutionMode::Reverse => "reverse",
                };
                let _ = writeln!(
                    output,
                    "crystal_filter_executions_total{{filter=\"{}\",mode=\"{}\"}} {}",
                    filter,
                    mode,
                    count.load(Ordering::Relaxed)
                );
            }
        }

        let gateway = self.gateway.read();
        if !gateway.is_empty() {
            let _ = writeln!(output, "# HELP crystal_gateway_calls_total Filter gateway calls");
            let _ = writeln!(output, "# TYPE crystal_gateway_calls_total counter");
            for (tier, m) in gateway.iter() {
                let total = m.calls_total.load(Ordering::Relaxed);
                let failed = m.calls_failed.load(Ordering::Relaxed);
                let _ = writeln!(
                    output,
                    "crystal_gateway_calls_total{{tier=\"{}\",status=\"success\"}} {}",
                    tier,
                    total - failed
                );
                let _ = writeln!(
                    output,
                    "crystal_gateway_calls_total{{tier=\"{}\",status=\"error\"}} {}",
                    tier, failed
                );
            }

            let _ = writeln!(
                output,
                "# HELP crystal_gateway_bytes_total Payload bytes sent to the filter gateway"
            );
            let _ = writeln!(output, "# TYPE crystal_gateway_bytes_total counter");
            for (tier, m) in gateway.iter() {
                let _ = writeln!(
                    output,
                    "crystal_gateway_bytes_total{{tier=\"{}\"}} {}",
                    tier,
                    m.bytes_in_total.load(Ordering::Relaxed)
                );
            }

            let _ = writeln!(
                output,
                "# HELP crystal_gateway_duration_seconds Filter gateway call latency"
            );
            let _ = writeln!(output, "# TYPE crystal_gateway_duration_seconds histogram");
            for (tier, m) in gateway.iter() {
                for (i, &boundary) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
                    let _ = writeln!(
                        output,
                        "crystal_gateway_duration_seconds_bucket{{tier=\"{}\",le=\"{}\"}} {}",
                        tier,
                        boundary as f64 / 1000.0,
                        m.latency_buckets[i].load(Ordering::Relaxed)
                    );
                }
                let total = m.calls_total.load(Ordering::Relaxed);
                let _ = writeln!(
                    output,
                    "crystal_gateway_duration_seconds_bucket{{tier=\"{}\",le=\"+Inf\"}} {}",
                    tier, total
                );
                let _ = writeln!(
                    output,
                    "crystal_gateway_duration_seconds_sum{{tier=\"{}\"}} {:.6}",
                    tier,
                    m.latency_sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
                );
                let _ = writeln!(
                    output,
                    "crystal_gateway_duration_seconds_count{{tier=\"{}\"}} {}",
                    tier, total
                );
            }
        }

        let _ = writeln!(
            output,
            "# HELP crystal_metadata_write_failures_total Extended metadata writes that failed after a PUT"
        );
        let _ = writeln!(output, "# TYPE crystal_metadata_write_failures_total counter");
        let _ = writeln!(
            output,
            "crystal_metadata_write_failures_total {}",
            self.metadata_write_failures.load(Ordering::Relaxed)
        );

        let admissions = self.admissions.read();
        if !admissions.is_empty() {
            let _ = writeln!(
                output,
                "# HELP crystal_admissions_total Writes registered with admission control"
            );
            let _ = writeln!(output, "# TYPE crystal_admissions_total counter");
            for (account, count) in admissions.iter() {
                let _ = writeln!(
                    output,
                    "crystal_admissions_total{{account=\"{}\"}} {}",
                    account,
                    count.load(Ordering::Relaxed)
                );
            }
        }

        output
    }
}

impl Default for FilterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment<K: Eq + std::hash::Hash>(map: &RwLock<HashMap<K, AtomicU64>>, key: K) {
    if let Some(counter) = map.read().get(&key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.write()
        .entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

/// Global filter metrics instance
static FILTER_METRICS: OnceLock<FilterMetrics> = OnceLock::new();

/// Get the global filter metrics instance
pub fn filter_metrics() -> &'static FilterMetrics {
    FILTER_METRICS.get_or_init(FilterMetrics::new)
}
