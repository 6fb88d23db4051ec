//! Refresh timers for mounted screens.
//!
//! A [`TimerManager`] runs two intervals side by side:
//! - fetch timer: fires immediately on start, then every refetch period
//! - tick timer: fires once per tick period (first fire after one period)
//!
//! Both are tokio tasks; stopping aborts them, which also cancels a fetch the
//! fetch timer is currently awaiting. [`Debouncer`] is a cancellable one-shot
//! timer used to coalesce bursts of filter changes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default refetch period (30 minutes).
pub const DEFAULT_FETCH_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Default "minutes ago" tick period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(60);

// tokio intervals panic on a zero period
const MIN_PERIOD: Duration = Duration::from_millis(1);

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type FetchCallback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

struct TimerTasks {
    fetch: JoinHandle<()>,
    tick: JoinHandle<()>,
}

pub struct TimerManager {
    fetch_period: Duration,
    tick_period: Duration,
    on_fetch: FetchCallback,
    on_tick: TickCallback,
    tasks: Mutex<Option<TimerTasks>>,
}

impl TimerManager {
    pub fn new(fetch_period: Duration, tick_period: Duration, on_fetch: FetchCallback, on_tick: TickCallback) -> Self {
        Self {
            fetch_period: fetch_period.max(MIN_PERIOD),
            tick_period: tick_period.max(MIN_PERIOD),
            on_fetch,
            on_tick,
            tasks: Mutex::new(None),
        }
    }

    /// Start both timers. Must be called from within a tokio runtime.
    /// Starting a running manager does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }

        let started = Instant::now();
        let on_fetch = Arc::clone(&self.on_fetch);
        let fetch_period = self.fetch_period;
        let fetch = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started, fetch_period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                on_fetch().await;
            }
        });

        let on_tick = Arc::clone(&self.on_tick);
        let tick_period = self.tick_period;
        let tick = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started + tick_period, tick_period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                on_tick();
            }
        });

        *tasks = Some(TimerTasks { fetch, tick });
        log::debug!(
            "Timers started: fetch every {}s, tick every {}s",
            fetch_period.as_secs(),
            tick_period.as_secs()
        );
    }

    /// Stop both timers. Safe to call when not started.
    pub fn stop(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            tasks.fetch.abort();
            tasks.tick.abort();
            log::debug!("Timers stopped");
        }
    }

    pub fn reset(&self) {
        self.stop();
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cancellable one-shot timer: scheduling replaces whatever was pending.
#[derive(Default)]
pub struct Debouncer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` after `delay` unless another job is scheduled or the
    /// debouncer is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            job.await;
        }));
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.pending.lock(), Some(handle) if !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
