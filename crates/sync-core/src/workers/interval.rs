//! Interval-driven periodic worker
//!
//! Runs a `SyncTask` on a fixed period with jitter. Pausing keeps the loop
//! alive but skips ticks; stopping ends the loop; destroying makes every
//! later call a no-op.

use super::PeriodicWorker;
use crate::config::{RefreshTarget, SyncConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Unit of work executed on every tick
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self);

    fn name(&self) -> &str {
        "sync_task"
    }
}

/// Configuration for an interval worker
#[derive(Debug, Clone)]
pub struct IntervalConfig {
    /// Base period between runs
    pub interval: Duration,
    /// Maximum jitter added to every period (default: none)
    pub jitter: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            jitter: Duration::ZERO,
        }
    }
}

struct RunningLoop {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// `PeriodicWorker` backed by a tokio interval
pub struct IntervalWorker {
    task: Arc<dyn SyncTask>,
    config: IntervalConfig,
    running: Mutex<Option<RunningLoop>>,
    paused: Arc<AtomicBool>,
    destroyed: AtomicBool,
    runs: Arc<AtomicU64>,
}

impl IntervalWorker {
    pub fn new(task: Arc<dyn SyncTask>, config: IntervalConfig) -> Self {
        Self {
            task,
            config,
            running: Mutex::new(None),
            paused: Arc::new(AtomicBool::new(false)),
            destroyed: AtomicBool::new(false),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of completed task runs
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .map_or(false, |running| !running.handle.is_finished())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_period(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }

    async fn run_loop(
        task: Arc<dyn SyncTask>,
        period: Duration,
        paused: Arc<AtomicBool>,
        runs: Arc<AtomicU64>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            task = task.name(),
            interval_secs = period.as_secs(),
            "Starting periodic worker"
        );

        // First run happens one period after start
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if paused.load(Ordering::SeqCst) {
                        debug!(task = task.name(), "Periodic worker paused, skipping tick");
                        continue;
                    }
                    task.run().await;
                    runs.fetch_add(1, Ordering::SeqCst);
                }
                _ = shutdown.recv() => {
                    debug!(task = task.name(), "Stopping periodic worker");
                    break;
                }
            }
        }
    }
}

impl PeriodicWorker for IntervalWorker {
    fn start(&self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut running = self.lock_running();
        if running
            .as_ref()
            .map_or(false, |current| !current.handle.is_finished())
        {
            return;
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Self::run_loop(
            Arc::clone(&self.task),
            self.current_period(),
            Arc::clone(&self.paused),
            Arc::clone(&self.runs),
            shutdown_rx,
        ));
        *running = Some(RunningLoop { shutdown, handle });
    }

    fn stop(&self) {
        if let Some(current) = self.lock_running().take() {
            let _ = current.shutdown.send(());
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.stop();
    }
}

/// Generate a random jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for interval workers
pub struct IntervalWorkerBuilder {
    task: Option<Arc<dyn SyncTask>>,
    config: IntervalConfig,
}

impl IntervalWorkerBuilder {
    pub fn new() -> Self {
        Self {
            task: None,
            config: IntervalConfig::default(),
        }
    }

    pub fn task(mut self, task: Arc<dyn SyncTask>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Take the period configured for `target`
    pub fn refresh_rate(self, config: &SyncConfig, target: RefreshTarget) -> Self {
        self.interval(config.refresh_rate(target))
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<IntervalWorker> {
        let task = self
            .task
            .ok_or_else(|| anyhow::anyhow!("Sync task is required"))?;
        if self.config.interval.is_zero() {
            return Err(anyhow::anyhow!("Interval must be greater than zero"));
        }

        Ok(IntervalWorker::new(task, self.config))
    }
}

impl Default for IntervalWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
