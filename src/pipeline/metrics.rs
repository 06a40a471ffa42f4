//! Stage throughput and timing metrics.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one or more pipeline chains.
#[derive(Debug)]
pub struct Metrics {
    /// Transforms that began executing
    pub elements_started: AtomicU64,

    /// Transforms that produced a value
    pub elements_succeeded: AtomicU64,

    /// Transforms that returned an error, panicked, or were cancelled
    pub elements_failed: AtomicU64,

    /// Barriers passed (including the final collect)
    pub stages_completed: AtomicU64,

    /// Chains stopped by a fail-fast barrier
    pub chains_aborted: AtomicU64,

    /// Transforms currently executing
    pub in_flight: AtomicU64,

    /// Highest observed value of `in_flight`
    pub peak_in_flight: AtomicU64,

    /// Time spent inside transforms (microseconds, summed across tasks)
    pub transform_us: AtomicU64,

    /// Time spent waiting at barriers (microseconds)
    pub barrier_wait_us: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            elements_started: AtomicU64::new(0),
            elements_succeeded: AtomicU64::new(0),
            elements_failed: AtomicU64::new(0),
            stages_completed: AtomicU64::new(0),
            chains_aborted: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
            transform_us: AtomicU64::new(0),
            barrier_wait_us: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    /// Record a transform starting.
    pub fn add_element_started(&self) {
        self.elements_started.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    /// Record a transform finishing, successfully or not.
    pub fn add_element_finished(&self, success: bool, duration: Duration) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.transform_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.elements_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.elements_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a barrier completing after `waited`.
    pub fn add_stage_completed(&self, waited: Duration) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
        self.barrier_wait_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a chain abort.
    pub fn add_chain_aborted(&self) {
        self.chains_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get elapsed time since creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get completed transforms per second.
    pub fn elements_per_second(&self) -> f64 {
        let done = self.elements_succeeded.load(Ordering::Relaxed)
            + self.elements_failed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elements_started: self.elements_started.load(Ordering::Relaxed),
            elements_succeeded: self.elements_succeeded.load(Ordering::Relaxed),
            elements_failed: self.elements_failed.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            chains_aborted: self.chains_aborted.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            elements_per_second: self.elements_per_second(),
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            barrier_wait_secs: self.barrier_wait_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub elements_started: u64,
    pub elements_succeeded: u64,
    pub elements_failed: u64,
    pub stages_completed: u64,
    pub chains_aborted: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub elements_per_second: f64,
    /// Total time inside transforms (seconds, summed across tasks)
    pub transform_secs: f64,
    /// Total time the chain spent suspended at barriers (seconds)
    pub barrier_wait_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Elements that have finished, successfully or not.
    pub fn elements_done(&self) -> u64 {
        self.elements_succeeded + self.elements_failed
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Elements: {} ok, {} failed, {} in flight (peak {}) | Stages: {} | \
             Aborts: {} | Rate: {:.1} elements/s | Transform: {:.1}s | \
             Barrier wait: {:.1}s | Elapsed: {:.1}s",
            self.elements_succeeded,
            self.elements_failed,
            self.in_flight,
            self.peak_in_flight,
            self.stages_completed,
            self.chains_aborted,
            self.elements_per_second,
            self.transform_secs,
            self.barrier_wait_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_elements: u64,
}

impl MetricsReporter {
    /// Create a reporter expecting `total_elements` transform invocations.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_elements: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_elements,
        }
    }

    /// Percentage of expected invocations that have finished.
    pub fn progress(&self, snapshot: &MetricsSnapshot) -> f64 {
        if self.total_elements > 0 {
            snapshot.elements_done() as f64 / self.total_elements as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Log snapshots every interval until `shutdown` fires or its sender drops.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("[{:.1}%] {}", self.progress(&snapshot), snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Pipeline Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Elements succeeded: {}", snapshot.elements_succeeded);
        println!("Elements failed: {}", snapshot.elements_failed);
        println!("Stages completed: {}", snapshot.stages_completed);
        println!("Peak in flight: {}", snapshot.peak_in_flight);
        println!("Processing rate: {:.1} elements/s", snapshot.elements_per_second);
        if snapshot.chains_aborted > 0 {
            println!("Chains aborted: {}", snapshot.chains_aborted);
        }
        println!(
            "Transform time: {:.1}s, barrier wait: {:.1}s",
            snapshot.transform_secs, snapshot.barrier_wait_secs
        );
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_in_flight_peak() {
        let metrics = Metrics::new();

        metrics.add_element_started();
        metrics.add_element_started();
        metrics.add_element_finished(true, Duration::from_millis(5));
        metrics.add_element_started();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.elements_started, 3);
        assert_eq!(snapshot.in_flight, 2);
        assert_eq!(snapshot.peak_in_flight, 2);
        assert_eq!(snapshot.elements_succeeded, 1);
    }

    #[test]
    fn test_all_counters() {
        let metrics = Metrics::new();

        metrics.add_element_started();
        metrics.add_element_finished(false, Duration::from_micros(250));
        metrics.add_element_started();
        metrics.add_element_finished(false, Duration::ZERO);
        metrics.add_stage_completed(Duration::from_micros(1_000));
        metrics.add_chain_aborted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.elements_failed, 2);
        assert_eq!(snapshot.elements_succeeded, 0);
        assert_eq!(snapshot.stages_completed, 1);
        assert_eq!(snapshot.chains_aborted, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(metrics.transform_us.load(Ordering::Relaxed), 250);
        assert_eq!(metrics.barrier_wait_us.load(Ordering::Relaxed), 1_000);
        assert_eq!(snapshot.elements_done(), 2);
    }

    #[test]
    fn test_snapshot_display_and_save() {
        let metrics = Metrics::new();
        metrics.add_element_started();
        metrics.add_element_finished(true, Duration::from_millis(1));

        let snapshot = metrics.snapshot();
        let display = format!("{}", snapshot);
        assert!(display.contains("1 ok"));
        assert!(display.contains("0 failed"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let path = path.to_str().unwrap();
        snapshot.save_to_file(path).unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["elements_succeeded"], 1);
    }

    #[test]
    fn test_reporter_progress() {
        let metrics = Metrics::new();
        let reporter = MetricsReporter::new(metrics.clone(), 1, 4);
        metrics.add_element_started();
        metrics.add_element_finished(true, Duration::ZERO);

        let progress = reporter.progress(&metrics.snapshot());
        assert!((progress - 25.0).abs() < f64::EPSILON);

        let empty = MetricsReporter::new(Metrics::new(), 1, 0);
        assert_eq!(empty.progress(&metrics.snapshot()), 0.0);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let reporter = MetricsReporter::new(Metrics::new(), 60, 1);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(reporter.run(rx));
        tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
