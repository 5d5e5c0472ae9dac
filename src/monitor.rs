//! Per-second event rate instrumentation
//!
//! A [`RateMonitor`] counts events reported from any thread through a
//! [`Counter`] handle and logs the count once per second. It is generic over
//! the event source: the source driver feeds it samples per second, the
//! analyzer can feed it irregular-data events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cloneable counter handle; `add` is safe to call concurrently with the
/// monitor thread's per-second reset.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Increment the counter by `n` events
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Atomically take the current count, resetting it to zero
    fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Builder for the monitoring thread
#[derive(Debug)]
pub struct RateMonitor {
    name: String,
    start_delay: Duration,
}

impl RateMonitor {
    /// Monitor with a one second start delay
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_delay: Duration::from_secs(1),
        }
    }

    /// Wait this long after spawning before the first counting interval;
    /// lets startup transients settle out of the statistics
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Spawn the monitoring thread
    pub fn spawn(self) -> MonitorHandle {
        let counter = Counter::default();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));

        let thread_counter = counter.clone();
        let thread_stop = Arc::clone(&stop_flag);
        let thread_samples = Arc::clone(&samples);
        let name = self.name;
        let start_delay = self.start_delay;

        let thread = std::thread::Builder::new()
            .name("rate-monitor".into())
            .spawn(move || {
                std::thread::sleep(start_delay);
                // Discard whatever accumulated during the start delay
                thread_counter.take();
                tracing::info!(monitor = %name, "rate monitor counting");

                let mut deadline = Instant::now();
                loop {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    deadline += Duration::from_secs(1);
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));

                    let count = thread_counter.take();
                    tracing::info!(monitor = %name, count, "events per second");
                    thread_samples
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(count);
                }

                // The in-progress interval is discarded; only completed
                // seconds enter the run average.
                let samples = thread_samples.lock().unwrap_or_else(|e| e.into_inner());
                if !samples.is_empty() {
                    let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
                    tracing::info!(monitor = %name, mean, "rate monitor run average");
                }
                tracing::info!(monitor = %name, "rate monitor stopped");
            })
            .expect("failed to spawn rate monitor thread");

        MonitorHandle {
            counter,
            stop_flag,
            samples,
            thread: Some(thread),
        }
    }
}

/// Handle to a running monitor; stops the thread on drop
#[derive(Debug)]
pub struct MonitorHandle {
    counter: Counter,
    stop_flag: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<u64>>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Counter handle to hand to the producing thread
    pub fn counter(&self) -> Counter {
        self.counter.clone()
    }

    /// Completed per-second samples recorded so far
    pub fn samples(&self) -> Vec<u64> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stop the monitor thread and wait for it to finish
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_concurrent_adds() {
        let counter = Counter::default();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.add(1);
                }
            }));
        }
        for h in handles {
            h.join().expect("adder thread panicked");
        }
        assert_eq!(counter.take(), 4000);
        assert_eq!(counter.take(), 0);
    }

    #[test]
    fn test_monitor_records_completed_seconds() {
        let mut handle = RateMonitor::new("test events")
            .with_start_delay(Duration::from_millis(0))
            .spawn();
        let counter = handle.counter();

        // Spread events across a bit more than one full interval
        for _ in 0..11 {
            counter.add(10);
            std::thread::sleep(Duration::from_millis(110));
        }
        handle.stop();

        let samples = handle.samples();
        assert!(!samples.is_empty(), "at least one completed second");
        assert!(samples.iter().sum::<u64>() > 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut handle = RateMonitor::new("idle")
            .with_start_delay(Duration::from_millis(0))
            .spawn();
        handle.stop();
        handle.stop();
    }
}
