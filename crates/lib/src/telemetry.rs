//! Backend resource telemetry: periodic sampling into a bounded history.
//!
//! Polls are tagged with the sampler generation they were issued under.
//! `start()` and `stop()` bump the generation, so a poll that resolves after
//! `stop()` (or after a restart) is dropped instead of appended.

use crate::gateway::{Gateway, SystemStats};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Most samples kept in the history.
pub const HISTORY_CAPACITY: usize = 30;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// One point-in-time reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub cpu: f64,
    pub ram_pct: f64,
    pub ram_gb: String,
    pub app_cpu: f64,
    pub app_ram: String,
}

impl TelemetrySample {
    pub fn from_stats(stats: SystemStats) -> Self {
        Self {
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            cpu: stats.global.cpu,
            ram_pct: stats.global.ram_pct,
            ram_gb: stats.global.ram_gb,
            app_cpu: stats.app.cpu,
            app_ram: stats.app.ram_gb,
        }
    }

    /// Placeholder shown before the first reading arrives.
    pub fn idle() -> Self {
        Self {
            time: String::new(),
            cpu: 0.0,
            ram_pct: 0.0,
            ram_gb: "0/0".to_string(),
            app_cpu: 0.0,
            app_ram: "0".to_string(),
        }
    }
}

/// FIFO of samples capped at [`HISTORY_CAPACITY`].
#[derive(Debug, Clone, Default)]
pub struct TelemetryHistory {
    samples: VecDeque<TelemetrySample>,
}

impl TelemetryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, evicting the oldest sample when full.
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Default)]
struct Shared {
    generation: u64,
    running: bool,
    taken: u64,
    history: TelemetryHistory,
}

/// Polls backend telemetry on a fixed period while the monitor is open.
pub struct TelemetrySampler {
    gateway: Gateway,
    interval: Duration,
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
}

impl TelemetrySampler {
    pub fn new(gateway: Gateway, interval: Duration) -> Self {
        Self {
            gateway,
            interval,
            shared: Arc::new(Mutex::new(Shared::default())),
            task: None,
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Begin polling with an empty history. Restarts if already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        let generation = {
            let mut shared = self.shared();
            shared.generation += 1;
            shared.running = true;
            shared.history.clear();
            shared.taken = 0;
            shared.generation
        };
        // A previous loop sees the new generation and exits on its next tick.
        self.task.take();
        log::debug!("telemetry: sampler started (generation {})", generation);
        let gateway = self.gateway.clone();
        let shared = self.shared.clone();
        let period = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            // A slow poll pushes the schedule back instead of bursting to catch up.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if lock(&shared).generation != generation {
                    break;
                }
                let Some(stats) = gateway.telemetry().await else {
                    continue;
                };
                let mut state = lock(&shared);
                if state.generation != generation {
                    log::debug!("telemetry: discarding sample from stopped generation {}", generation);
                    break;
                }
                state.history.push(TelemetrySample::from_stats(stats));
                state.taken += 1;
            }
        }));
    }

    /// Stop polling. No sample is appended after this returns, even from a poll
    /// already in flight. The history stays readable until the next `start()`.
    pub fn stop(&mut self) {
        {
            let mut shared = self.shared();
            if !shared.running {
                return;
            }
            shared.generation += 1;
            shared.running = false;
        }
        // Not aborted: an in-flight poll completes and is discarded by generation.
        self.task.take();
        log::debug!("telemetry: sampler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared().running
    }

    /// Samples appended since the last `start()`, including evicted ones.
    pub fn sample_count(&self) -> u64 {
        self.shared().taken
    }

    /// Snapshot of the history, oldest first.
    pub fn history(&self) -> Vec<TelemetrySample> {
        self.shared().history.iter().cloned().collect()
    }

    /// Newest sample, or the idle placeholder when there is none.
    pub fn latest(&self) -> TelemetrySample {
        self.shared()
            .history
            .latest()
            .cloned()
            .unwrap_or_else(TelemetrySample::idle)
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
