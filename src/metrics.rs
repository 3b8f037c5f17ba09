//! Process-wide counters exposed in Prometheus text format on `/metrics`.
//! All fields are atomics so handlers never contend on a lock.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Fixed upper bounds (ms) for the provider latency histogram.
const LATENCY_BUCKETS_MS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 15000, 30000, 60000, 120000];

/// Terminal state of one `/analyze` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    TransformError,
    ProviderError,
    Timeout,
    InvalidResponse,
}

impl Outcome {
    const ALL: [Outcome; 6] = [
        Outcome::Success,
        Outcome::ClientError,
        Outcome::TransformError,
        Outcome::ProviderError,
        Outcome::Timeout,
        Outcome::InvalidResponse,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::TransformError => "transform_error",
            Outcome::ProviderError => "provider_error",
            Outcome::Timeout => "timeout",
            Outcome::InvalidResponse => "invalid_response",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub struct Metrics {
    outcomes: [AtomicU64; 6],
    latency_counts: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    start_epoch: f64,
    start_instant: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let start_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            outcomes: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            start_epoch,
            start_instant: Instant::now(),
        }
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.outcomes[outcome.index()].load(Ordering::Relaxed)
    }

    /// Record one provider round trip (successful or not).
    pub fn observe_provider_latency(&self, ms: u64) {
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        // first bucket >= value; larger values only land in +Inf
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| ms <= *ub) {
            self.latency_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        writeln!(
            &mut buf,
            "# HELP fitcheck_analyze_requests_total Analyze requests by outcome\n# TYPE fitcheck_analyze_requests_total counter"
        )
        .ok();
        for outcome in Outcome::ALL {
            writeln!(
                &mut buf,
                "fitcheck_analyze_requests_total{{outcome=\"{}\"}} {}",
                outcome.label(),
                self.outcome_count(outcome)
            )
            .ok();
        }

        writeln!(
            &mut buf,
            "# HELP fitcheck_provider_latency_ms Provider round-trip latency histogram milliseconds\n# TYPE fitcheck_provider_latency_ms histogram"
        )
        .ok();
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.latency_counts[i].load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "fitcheck_provider_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let count = self.latency_count.load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "fitcheck_provider_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "fitcheck_provider_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "fitcheck_provider_latency_ms_count {}", count).ok();

        writeln!(
            &mut buf,
            "# HELP fitcheck_build_info Build information\n# TYPE fitcheck_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "fitcheck_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP fitcheck_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE fitcheck_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "fitcheck_process_start_time_seconds {}",
            self.start_epoch
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP fitcheck_process_uptime_seconds Process uptime seconds\n# TYPE fitcheck_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "fitcheck_process_uptime_seconds {}",
            self.start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}
