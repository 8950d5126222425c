//! Worker liveness tracking and pipeline counters.
//!
//! Each worker owns a `Heartbeat` slot it updates with a lock-free store;
//! the health monitor reads all slots once per second without taking locks.

use crate::defaults;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A single worker's heartbeat slot. Stores milliseconds since the registry
/// epoch; `u64::MAX` means "never beaten".
#[derive(Clone)]
pub struct Heartbeat {
    epoch: Instant,
    slot: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Publishes liveness now.
    pub fn beat(&self) {
        let millis = self.epoch.elapsed().as_millis() as u64;
        self.slot.store(millis, Ordering::Relaxed);
    }

    /// Age of the last beat, or None if the worker never beat.
    pub fn age(&self) -> Option<Duration> {
        let value = self.slot.load(Ordering::Relaxed);
        if value == u64::MAX {
            return None;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(now.saturating_sub(value)))
    }
}

/// Registry of named heartbeat slots, shared between the supervisor and the
/// health monitor.
#[derive(Clone)]
pub struct HeartbeatRegistry {
    epoch: Instant,
    slots: Arc<Mutex<Vec<(String, Arc<AtomicU64>)>>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a worker and returns its heartbeat handle.
    pub fn register(&self, name: &str) -> Heartbeat {
        let slot = Arc::new(AtomicU64::new(u64::MAX));
        self.slots
            .lock()
            .unwrap()
            .push((name.to_string(), slot.clone()));
        Heartbeat {
            epoch: self.epoch,
            slot,
        }
    }

    /// Names of workers whose last heartbeat is older than `stale`.
    /// Workers that never beat are reported once they have had `stale`
    /// time to do so.
    pub fn stale_workers(&self, stale: Duration) -> Vec<String> {
        let now = self.epoch.elapsed().as_millis() as u64;
        let stale_ms = stale.as_millis() as u64;

        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, slot)| {
                let value = slot.load(Ordering::Relaxed);
                let last = if value == u64::MAX { 0 } else { value };
                now.saturating_sub(last) > stale_ms
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for HeartbeatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free pipeline counters, logged periodically and on shutdown.
/// `segments_dropped` is an `Arc` so the drop-oldest send path can hold it
/// without the whole metrics struct.
#[derive(Default)]
pub struct PipelineMetrics {
    pub frames_processed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub faces_detected: AtomicU64,
    pub faces_blurred: AtomicU64,
    pub audio_packets: AtomicU64,
    pub transcriptions: AtomicU64,
    pub segments_dropped: Arc<AtomicU64>,
    pub captures_written: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log_summary(&self) {
        log::info!(
            "metrics: frames={} dropped={} faces={} blurred={} audio_packets={} transcriptions={} segments_dropped={} captures={}",
            self.frames_processed.load(Ordering::Relaxed),
            self.frames_dropped.load(Ordering::Relaxed),
            self.faces_detected.load(Ordering::Relaxed),
            self.faces_blurred.load(Ordering::Relaxed),
            self.audio_packets.load(Ordering::Relaxed),
            self.transcriptions.load(Ordering::Relaxed),
            self.segments_dropped.load(Ordering::Relaxed),
            self.captures_written.load(Ordering::Relaxed),
        );
    }
}

/// Increment helper, Relaxed is sufficient for counters.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Background thread that wakes once per second, warns about stale workers,
/// and logs a metrics summary once a minute. A stuck worker is logged, not
/// restarted; restart policy belongs to outer supervision.
pub struct HealthMonitor {
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn spawn(
        registry: HeartbeatRegistry,
        metrics: Arc<PipelineMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("health-monitor".to_string())
            .spawn(move || {
                let mut ticks: u64 = 0;
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(defaults::HEARTBEAT_INTERVAL);
                    ticks += 1;

                    for name in registry.stale_workers(defaults::HEARTBEAT_STALE) {
                        log::warn!("worker '{}' heartbeat is stale", name);
                    }

                    if ticks % 60 == 0 {
                        metrics.log_summary();
                    }
                }
                metrics.log_summary();
            })
            .expect("failed to spawn health monitor");

        Self {
            handle: Some(handle),
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn into_handle(mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_age_none_before_first_beat() {
        let registry = HeartbeatRegistry::new();
        let hb = registry.register("worker");
        assert!(hb.age().is_none());
    }

    #[test]
    fn test_heartbeat_age_small_after_beat() {
        let registry = HeartbeatRegistry::new();
        let hb = registry.register("worker");
        hb.beat();
        let age = hb.age().unwrap();
        assert!(age < Duration::from_millis(500));
    }

    #[test]
    fn test_stale_workers_empty_when_fresh() {
        let registry = HeartbeatRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        a.beat();
        b.beat();
        assert!(registry.stale_workers(Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_stale_workers_detects_missing_beats() {
        let registry = HeartbeatRegistry::new();
        let a = registry.register("a");
        let _b = registry.register("b");
        a.beat();

        std::thread::sleep(Duration::from_millis(30));
        let stale = registry.stale_workers(Duration::from_millis(10));
        // 'b' never beat and is past the threshold; 'a' beat recently enough
        // that only the zero-threshold case would flag it.
        assert!(stale.contains(&"b".to_string()));
        assert!(!stale.contains(&"a".to_string()));
    }

    #[test]
    fn test_stale_workers_recovers_after_beat() {
        let registry = HeartbeatRegistry::new();
        let a = registry.register("a");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.stale_workers(Duration::from_millis(10)).len(), 1);

        a.beat();
        assert!(registry.stale_workers(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn test_metrics_counters() {
        let metrics = PipelineMetrics::new();
        bump(&metrics.frames_processed);
        bump(&metrics.frames_processed);
        bump(&metrics.captures_written);

        assert_eq!(metrics.frames_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.captures_written.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.frames_dropped.load(Ordering::Relaxed), 0);
        metrics.log_summary();
    }

    #[test]
    fn test_health_monitor_stops_quickly() {
        let registry = HeartbeatRegistry::new();
        let metrics = PipelineMetrics::new();
        let stop = Arc::new(AtomicBool::new(false));

        let monitor = HealthMonitor::spawn(registry, metrics, stop.clone());
        stop.store(true, Ordering::SeqCst);

        let start = Instant::now();
        monitor.join();
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
