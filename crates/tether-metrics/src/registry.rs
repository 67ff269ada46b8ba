use crate::snapshot::{MeasurerSide, MethodMetrics, MetricsSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Call counters and latency bounds for one method, or for all of them.
///
/// All fields are atomics updated with `Ordering::Relaxed`; a snapshot taken
/// while calls are being recorded may be off by the calls in flight.
#[derive(Debug)]
struct CallStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_latency_us: AtomicU64,
    /// `u64::MAX` until the first sample
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl CallStats {
    fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            min_latency_us: AtomicU64::new(u64::MAX),
            max_latency_us: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64, success: bool) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.min_latency_us.fetch_min(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    fn to_metrics(&self) -> MethodMetrics {
        let call_count = self.call_count.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let min = self.min_latency_us.load(Ordering::Relaxed);

        MethodMetrics {
            call_count,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us: if call_count == 0 { 0 } else { total / call_count },
            min_latency_us: if min == u64::MAX { 0 } else { min },
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe store of call measurements.
///
/// # Example
///
/// ```rust
/// use tether_metrics::MetricsRegistry;
/// use std::time::Instant;
///
/// let registry = MetricsRegistry::new();
/// registry.record_call("demo.Math.add", Instant::now(), true);
/// registry.record_call("demo.Math.add", Instant::now(), false);
///
/// let method = registry.method_metrics("demo.Math.add").unwrap();
/// assert_eq!(method.call_count, 2);
/// assert_eq!(method.failure_count, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    overall: CallStats,
    methods: RwLock<HashMap<String, Arc<CallStats>>>,
    start_time: RwLock<Instant>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            overall: CallStats::new(),
            methods: RwLock::new(HashMap::new()),
            start_time: RwLock::new(Instant::now()),
        }
    }

    /// Records one completed call.
    ///
    /// # Arguments
    /// * `method` - Qualified method name (`target.method`)
    /// * `start_time` - When the call started; latency is measured up to now
    /// * `success` - Whether the call produced a non-exceptional result
    pub fn record_call(&self, method: &str, start_time: Instant, success: bool) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.record_latency(method, latency_us, success);
    }

    /// Records one call with an already measured latency.
    pub fn record_latency(&self, method: &str, latency_us: u64, success: bool) {
        self.overall.record(latency_us, success);

        let existing = self.methods.read().get(method).cloned();
        let stats = match existing {
            Some(stats) => stats,
            None => self
                .methods
                .write()
                .entry(method.to_string())
                .or_insert_with(|| Arc::new(CallStats::new()))
                .clone(),
        };
        stats.record(latency_us, success);
    }

    pub fn method_metrics(&self, method: &str) -> Option<MethodMetrics> {
        self.methods.read().get(method).map(|s| s.to_metrics())
    }

    pub fn snapshot(&self, side: MeasurerSide) -> MetricsSnapshot {
        let uptime_ms = self.start_time.read().elapsed().as_millis() as u64;
        let overall = self.overall.to_metrics();

        let mut snapshot = MetricsSnapshot::new(side, uptime_ms);
        snapshot.total_calls = overall.call_count;
        snapshot.successful_calls = overall.success_count;
        snapshot.failed_calls = overall.failure_count;
        snapshot.avg_latency_us = overall.avg_latency_us;
        snapshot.min_latency_us = overall.min_latency_us;
        snapshot.max_latency_us = overall.max_latency_us;
        snapshot.methods = self
            .methods
            .read()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.to_metrics()))
            .collect();
        snapshot
    }

    /// Clears every counter and restarts the uptime clock.
    pub fn reset(&self) {
        let mut methods = self.methods.write();
        methods.clear();
        for counter in [
            &self.overall.call_count,
            &self.overall.success_count,
            &self.overall.failure_count,
            &self.overall.total_latency_us,
            &self.overall.max_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.overall.min_latency_us.store(u64::MAX, Ordering::Relaxed);
        *self.start_time.write() = Instant::now();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
