//! Per-screen data orchestration.
//!
//! A [`Screen`] is what a dashboard view mounts: it derives a cache key from
//! the organization and its descriptor list, restores a fresh cached batch if
//! there is one, and otherwise resolves the batch through the
//! [`BatchFetcher`] on the fetch timer. Completed batches are written back to
//! the shared [`ResponseCache`]. Views read [`FetchState`] snapshots or
//! subscribe to changes.
//!
//! Flow of one cycle:
//! 1. `FetchStart` (previous data stays visible)
//! 2. fan-out through the fetcher
//! 3. every per-plot action applied in one state update
//! 4. cache write-back under the key captured at step 1

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::DataApi;
use crate::cache::{ResponseCache, DEFAULT_TTL_MINUTES};
use crate::config::DashConfig;
use crate::fetcher::{BatchFetcher, BatchMode, PlotOutcome};
use crate::notification::Notifier;
use crate::reducer::{FetchAction, FetchReducer, FetchState};
use crate::time_utils::{minutes_since, Clock, DEFAULT_REFETCH_MINUTES};
use crate::timer::{Debouncer, FetchCallback, TickCallback, TimerManager, DEFAULT_FETCH_PERIOD, DEFAULT_TICK_PERIOD};
use crate::types::{CacheKey, DataSets, RequestDescriptor};

/// Timing and batch behavior shared by every screen.
#[derive(Debug, Clone, Copy)]
pub struct ScreenSettings {
    pub cache_ttl: chrono::Duration,
    pub refetch_interval: Duration,
    pub tick_interval: Duration,
    pub batch_mode: BatchMode,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            cache_ttl: chrono::Duration::minutes(DEFAULT_TTL_MINUTES),
            refetch_interval: DEFAULT_FETCH_PERIOD,
            tick_interval: DEFAULT_TICK_PERIOD,
            batch_mode: BatchMode::default(),
        }
    }
}

impl From<&DashConfig> for ScreenSettings {
    fn from(config: &DashConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            refetch_interval: config.refetch_interval(),
            tick_interval: config.tick_interval(),
            batch_mode: config.batch_mode,
        }
    }
}

/// Collaborators every screen shares. Built once by the composition root.
#[derive(Clone)]
pub struct DashContext {
    pub api: Arc<dyn DataApi>,
    pub notifier: Arc<dyn Notifier>,
    pub cache: Arc<ResponseCache>,
    pub settings: ScreenSettings,
    pub clock: Clock,
}

impl DashContext {
    pub fn new(
        api: Arc<dyn DataApi>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<ResponseCache>,
        settings: ScreenSettings,
    ) -> Self {
        Self {
            api,
            notifier,
            cache,
            settings,
            clock: Clock::start(),
        }
    }
}

struct ScreenInner {
    organization_id: String,
    descriptors: Mutex<Vec<RequestDescriptor>>,
    cache_key: Mutex<Option<CacheKey>>,
    state: watch::Sender<FetchState>,
    reducer: FetchReducer,
    fetcher: BatchFetcher,
    notifier: Arc<dyn Notifier>,
    cache: Arc<ResponseCache>,
    cache_ttl: chrono::Duration,
    clock: Clock,
    /// Set when the current key was served from cache; the next timer-driven
    /// fetch consumes it and skips.
    served_from_cache: AtomicBool,
    mounted: AtomicBool,
    /// One batch at a time per screen.
    batch_gate: tokio::sync::Mutex<()>,
    timers: TimerManager,
    debouncer: Debouncer,
}

/// Ends a started cycle with `FetchCancelled` unless it settled normally.
/// Cycles are dropped mid-batch when the timers are reset.
struct CycleGuard<'a> {
    inner: &'a ScreenInner,
    settled: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!("Screen {}: fetch cycle cancelled", self.inner.organization_id);
            self.inner.dispatch(FetchAction::FetchCancelled);
        }
    }
}

impl ScreenInner {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn dispatch(&self, action: FetchAction) {
        self.dispatch_all(std::iter::once(action), self.clock.now());
    }

    /// Apply actions as one state update. Returns the data sets to cache when
    /// the update leaves a settled, non-empty state.
    fn dispatch_all<I>(&self, actions: I, now: DateTime<Utc>) -> Option<DataSets>
    where
        I: IntoIterator<Item = FetchAction>,
    {
        if !self.is_mounted() {
            log::debug!("Screen {}: dropping update after unmount", self.organization_id);
            return None;
        }
        let mut settled = None;
        self.state.send_modify(|state| {
            self.reducer.reduce_all(state, actions, now);
            if !state.is_loading && !state.data_sets.is_empty() {
                settled = Some(state.data_sets.clone());
            }
        });
        settled
    }

    fn set_descriptors(&self, descriptors: Vec<RequestDescriptor>) {
        if *self.descriptors.lock() == descriptors {
            return;
        }
        self.apply_descriptors(descriptors);
    }

    fn apply_descriptors(&self, descriptors: Vec<RequestDescriptor>) {
        let key = CacheKey::derive(&self.organization_id, &descriptors);
        let plot_ids = descriptors.iter().map(|d| d.plot_id.clone()).collect();
        *self.descriptors.lock() = descriptors;
        *self.cache_key.lock() = key.clone();
        self.served_from_cache.store(false, Ordering::SeqCst);

        self.dispatch(FetchAction::RetainPlots { plot_ids });
        if let Some(key) = &key {
            self.restore_from_cache(key, self.clock.now());
        }
        self.timers.reset();
    }

    fn restore_from_cache(&self, key: &CacheKey, now: DateTime<Utc>) {
        let Some(entry) = self.cache.get_fresh(key, now, self.cache_ttl) else {
            log::debug!("Screen {}: no fresh cache entry for {}", self.organization_id, key);
            return;
        };

        let minutes_ago = minutes_since(entry.timestamp, now);
        log::info!(
            "Screen {}: restored {} plots from {} ({} min old)",
            self.organization_id,
            entry.data_sets.len(),
            key,
            minutes_ago
        );
        self.dispatch_all(
            std::iter::once(FetchAction::CacheRestore {
                data_sets: entry.data_sets,
                minutes_ago,
                refreshed_at: entry.timestamp,
            }),
            now,
        );
        self.served_from_cache.store(true, Ordering::SeqCst);
    }

    /// Timer-driven fetch: skipped once right after a cache restore.
    async fn refetch(&self) {
        if self.served_from_cache.swap(false, Ordering::SeqCst) {
            log::debug!("Screen {}: served from cache, skipping fetch", self.organization_id);
            return;
        }
        self.run_cycle().await;
    }

    async fn refresh_now(&self) {
        self.served_from_cache.store(false, Ordering::SeqCst);
        self.run_cycle().await;
    }

    async fn run_cycle(&self) {
        let _gate = self.batch_gate.lock().await;
        if !self.is_mounted() {
            return;
        }

        let descriptors = self.descriptors.lock().clone();
        let key = self.cache_key.lock().clone();
        self.dispatch(FetchAction::FetchStart);
        let mut cycle = CycleGuard {
            inner: self,
            settled: false,
        };

        match self.fetcher.run_batch(&descriptors).await {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|o| o.is_failed()).count();
                let now = self.clock.now();
                let settled = self.dispatch_all(outcomes.into_iter().map(PlotOutcome::into_action), now);
                cycle.settled = true;

                // A partial result must not replace a complete cached batch.
                if failed > 0 {
                    log::info!(
                        "Screen {}: {} plots failed, cache left unchanged",
                        self.organization_id,
                        failed
                    );
                    return;
                }
                if let (Some(key), Some(mut data_sets)) = (key, settled) {
                    data_sets.retain(|plot_id, _| descriptors.iter().any(|d| d.plot_id == *plot_id));
                    if let Err(e) = self.cache.put_at(&key, &data_sets, now) {
                        log::warn!("Screen {}: could not cache {}: {}", self.organization_id, key, e);
                    }
                }
            }
            Err(e) => {
                log::warn!("Screen {}: batch failed: {}", self.organization_id, e);
                cycle.settled = true;
                if self.is_mounted() {
                    let message = e.to_string();
                    self.dispatch(FetchAction::FetchError {
                        error: message.clone(),
                    });
                    self.notifier.notify_error(&message);
                }
            }
        }
    }

    fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.timers.stop();
            self.debouncer.cancel();
            log::debug!("Screen {}: unmounted", self.organization_id);
        }
    }
}

/// A mounted dashboard screen.
///
/// Unmounts on drop. The cache outlives it.
pub struct Screen {
    inner: Arc<ScreenInner>,
}

impl Screen {
    /// Mount a screen and start its timers. Must be called from within a
    /// tokio runtime.
    pub fn mount(ctx: &DashContext, organization_id: &str, descriptors: Vec<RequestDescriptor>) -> Self {
        let settings = ctx.settings;
        let (state, _) = watch::channel(FetchState::default());

        let inner = Arc::new_cyclic(|weak: &Weak<ScreenInner>| ScreenInner {
            organization_id: organization_id.to_string(),
            descriptors: Mutex::new(Vec::new()),
            cache_key: Mutex::new(None),
            state,
            reducer: FetchReducer::new(
                chrono::Duration::from_std(settings.refetch_interval)
                    .unwrap_or_else(|_| chrono::Duration::minutes(DEFAULT_REFETCH_MINUTES)),
            ),
            fetcher: BatchFetcher::new(Arc::clone(&ctx.api), Arc::clone(&ctx.notifier), settings.batch_mode),
            notifier: Arc::clone(&ctx.notifier),
            cache: Arc::clone(&ctx.cache),
            cache_ttl: settings.cache_ttl,
            clock: ctx.clock,
            served_from_cache: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
            batch_gate: tokio::sync::Mutex::new(()),
            timers: TimerManager::new(
                settings.refetch_interval,
                settings.tick_interval,
                fetch_callback(weak.clone()),
                tick_callback(weak.clone()),
            ),
            debouncer: Debouncer::new(),
        });

        log::info!(
            "Screen {}: mounted with {} descriptors",
            organization_id,
            descriptors.len()
        );
        inner.apply_descriptors(descriptors);
        Self { inner }
    }

    pub fn organization_id(&self) -> &str {
        &self.inner.organization_id
    }

    pub fn cache_key(&self) -> Option<CacheKey> {
        self.inner.cache_key.lock().clone()
    }

    pub fn descriptors(&self) -> Vec<RequestDescriptor> {
        self.inner.descriptors.lock().clone()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> FetchState {
        self.inner.state.borrow().clone()
    }

    /// Change notifications for views.
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.inner.state.subscribe()
    }

    /// Apply an action to this screen's state. Ignored after unmount.
    pub fn dispatch(&self, action: FetchAction) {
        self.inner.dispatch(action);
    }

    /// Fetch unless the current data was just served from cache.
    pub async fn refetch(&self) {
        self.inner.refetch().await;
    }

    /// Fetch regardless of how the current data was obtained.
    pub async fn refresh_now(&self) {
        self.inner.refresh_now().await;
    }

    /// Replace the descriptor list. Equal lists are ignored; a different
    /// list restores from cache if possible and restarts the timers.
    pub fn set_descriptors(&self, descriptors: Vec<RequestDescriptor>) {
        self.inner.set_descriptors(descriptors);
    }

    /// Like [`Screen::set_descriptors`], but only the last call within
    /// `delay` takes effect.
    pub fn schedule_descriptors(&self, descriptors: Vec<RequestDescriptor>, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                if inner.is_mounted() {
                    inner.set_descriptors(descriptors);
                }
            }
        });
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Stop timers and pending work. Results still in flight are dropped.
    pub fn unmount(&self) {
        self.inner.unmount();
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        self.inner.unmount();
    }
}

fn fetch_callback(weak: Weak<ScreenInner>) -> FetchCallback {
    Arc::new(move || {
        let weak = weak.clone();
        Box::pin(async move {
            if let Some(inner) = weak.upgrade() {
                inner.refetch().await;
            }
        })
    })
}

fn tick_callback(weak: Weak<ScreenInner>) -> TickCallback {
    Arc::new(move || {
        if let Some(inner) = weak.upgrade() {
            inner.dispatch(FetchAction::UpdateMinutesAgo);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::notification::testing::{Note, RecordingNotifier};
    use serde_json::json;

    struct Harness {
        api: Arc<FakeApi>,
        notifier: Arc<RecordingNotifier>,
        cache: Arc<ResponseCache>,
        ctx: DashContext,
    }

    fn harness(mode: BatchMode) -> Harness {
        let api = Arc::new(FakeApi::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = Arc::new(ResponseCache::default());
        let ctx = DashContext::new(
            api.clone(),
            notifier.clone(),
            cache.clone(),
            ScreenSettings {
                batch_mode: mode,
                ..ScreenSettings::default()
            },
        );
        Harness {
            api,
            notifier,
            cache,
            ctx,
        }
    }

    fn metrics() -> Vec<RequestDescriptor> {
        vec![RequestDescriptor::data(
            "thalla",
            "weather",
            r#"{"from":"2024-06-01"}"#,
            "metrics",
        )]
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_settled(screen: &Screen) -> FetchState {
        let mut rx = screen.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| !s.is_loading && (s.page_refresh_time.is_some() || s.error.is_some())),
        )
        .await
        .expect("screen did not settle")
        .expect("state sender dropped")
        .clone();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_mount_fetches_and_caches() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond(
            "weather",
            json!([{ "timestamp": "2024-06-01", "max_temperature": 30 }]),
        );

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        let state = wait_settled(&screen).await;

        assert_eq!(state.data_sets["metrics"].as_array().map(|a| a.len()), Some(1));
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(h.api.call_count(), 1);

        let key = screen.cache_key().expect("key");
        let entry = h.cache.get(&key).expect("cached");
        assert_eq!(entry.data_sets, state.data_sets);
        assert!(h
            .notifier
            .notes()
            .contains(&Note::Success("Data loaded successfully".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_mount_restores_from_cache_without_network() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([{ "max_temperature": 30 }]));

        let first = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&first).await;
        drop(first);
        assert_eq!(h.api.call_count(), 1);

        // Built separately: equal by value, not the same vector.
        let second = Screen::mount(&h.ctx, "thalla", metrics());
        let state = second.state();
        assert_eq!(state.data_sets["metrics"], json!([{ "max_temperature": 30 }]));
        assert!(!state.is_loading);

        settle().await;
        assert_eq!(h.api.call_count(), 1);

        // The skip is consumed once; the next refetch goes to the network.
        second.refetch().await;
        assert_eq!(h.api.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_decides_restore() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([{ "live": true }]));
        let key = CacheKey::derive("thalla", &metrics()).unwrap();
        let mut cached = DataSets::new();
        cached.insert("metrics".into(), json!([{ "cached": true }]));

        h.cache
            .put_at(&key, &cached, h.ctx.clock.now() - chrono::Duration::minutes(24))
            .unwrap();
        let fresh = Screen::mount(&h.ctx, "thalla", metrics());
        assert_eq!(fresh.state().data_sets["metrics"], json!([{ "cached": true }]));
        assert_eq!(fresh.state().minutes_ago, 24);
        settle().await;
        assert_eq!(h.api.call_count(), 0);
        drop(fresh);

        h.cache
            .put_at(&key, &cached, h.ctx.clock.now() - chrono::Duration::minutes(26))
            .unwrap();
        let stale = Screen::mount(&h.ctx, "thalla", metrics());
        assert!(stale.state().data_sets.is_empty());
        let state = wait_settled(&stale).await;
        assert_eq!(state.data_sets["metrics"], json!([{ "live": true }]));
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plot_does_not_block_others() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([{ "t": 1 }]))
            .respond("humidity", json!([]))
            .respond("soil", json!({ "avg": 2 }));
        let descriptors = vec![
            RequestDescriptor::data("thalla", "weather", "{}", "temperature"),
            RequestDescriptor::data("thalla", "humidity", "{}", "humidity"),
            RequestDescriptor::stats("thalla", "soil", "{}", "soil"),
        ];

        let screen = Screen::mount(&h.ctx, "thalla", descriptors);
        let state = wait_settled(&screen).await;

        assert_eq!(state.data_sets.len(), 3);
        assert_eq!(state.data_sets["humidity"], json!([]));
        assert_eq!(state.warning.as_deref(), Some("No data available for humidity"));
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_error_keeps_previous_data() {
        let h = harness(BatchMode::AllOrNothing);
        h.api.respond("weather", json!([1, 2]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;

        h.api.fail("weather", "connection reset");
        screen.refresh_now().await;

        let state = screen.state();
        assert!(!state.is_loading);
        assert_eq!(state.error.as_deref(), Some("Network error: connection reset"));
        assert_eq!(state.data_sets["metrics"], json!([1, 2]));
        assert!(h
            .notifier
            .notes()
            .contains(&Note::Error("Network error: connection reset".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_descriptor_list_reports_no_data() {
        let h = harness(BatchMode::SettleAll);
        let screen = Screen::mount(&h.ctx, "thalla", Vec::new());
        assert!(screen.cache_key().is_none());

        let state = wait_settled(&screen).await;
        assert_eq!(state.error.as_deref(), Some("No data received"));
        assert_eq!(h.api.call_count(), 0);
        assert!(h.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_stops_timers_and_drops_late_results() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([1]))
            .delay("weather", Duration::from_secs(10));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        settle().await;
        assert!(screen.state().is_loading);
        assert_eq!(h.api.call_count(), 1);

        screen.unmount();
        assert!(!screen.is_mounted());
        tokio::time::sleep(Duration::from_secs(3 * 60 * 60)).await;

        assert_eq!(h.api.call_count(), 1);
        assert!(screen.state().data_sets.is_empty());
        assert!(h.cache.is_empty());

        screen.dispatch(FetchAction::FetchError { error: "late".into() });
        assert!(screen.state().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_refetches_every_period() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([1]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;
        assert_eq!(h.api.call_count(), 1);

        tokio::time::sleep(DEFAULT_FETCH_PERIOD + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.api.call_count(), 2);
        assert!(screen.is_mounted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_descriptors_switches_key_and_refetches() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([1]))
            .respond("soil", json!([2]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;
        let first_key = screen.cache_key();

        screen.set_descriptors(metrics());
        settle().await;
        assert_eq!(h.api.call_count(), 1);

        let soil = vec![RequestDescriptor::stats("thalla", "soil", "{}", "soil")];
        screen.set_descriptors(soil.clone());
        assert_ne!(screen.cache_key(), first_key);
        settle().await;
        let mut rx = screen.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.data_sets.contains_key("soil")))
            .await
            .expect("soil never loaded")
            .expect("state sender dropped");
        assert_eq!(h.api.call_count(), 2);
        assert_eq!(screen.descriptors(), soil);
        assert!(!screen.state().data_sets.contains_key("metrics"));
        assert_eq!(h.cache.len(), 2);
        let entry = h.cache.get(&screen.cache_key().unwrap()).expect("soil cached");
        assert_eq!(entry.data_sets.keys().collect::<Vec<_>>(), vec!["soil"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_descriptors_is_debounced() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([1]))
            .respond("a", json!([2]))
            .respond("b", json!([3]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;

        let first = vec![RequestDescriptor::data("thalla", "a", "{}", "a")];
        let last = vec![RequestDescriptor::data("thalla", "b", "{}", "b")];
        screen.schedule_descriptors(first, Duration::from_millis(500));
        tokio::time::advance(Duration::from_millis(200)).await;
        screen.schedule_descriptors(last.clone(), Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        let mut rx = screen.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.data_sets.contains_key("b")))
            .await
            .expect("b never loaded")
            .expect("state sender dropped");

        assert_eq!(screen.descriptors(), last);
        assert!(!screen.state().data_sets.contains_key("a"));
        assert_eq!(h.api.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screens_share_cache_entries() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([7]));

        let a = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&a).await;
        let b = Screen::mount(&h.ctx, "thalla", metrics());

        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(b.state().data_sets, a.state().data_sets);
        assert_eq!(h.cache.len(), 1);
        settle().await;
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_data_and_cache() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([1, 2]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;
        let key = screen.cache_key().expect("key");
        let cached_at = h.cache.get(&key).expect("cached").timestamp;

        tokio::time::advance(Duration::from_secs(60)).await;
        h.api.fail("weather", "connection reset");
        screen.refresh_now().await;

        let state = screen.state();
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(state.data_sets["metrics"], json!([1, 2]));
        assert_eq!(
            state.warning.as_deref(),
            Some("Could not load metrics: Network error: connection reset")
        );
        let entry = h.cache.get(&key).expect("still cached");
        assert_eq!(entry.data_sets["metrics"], json!([1, 2]));
        assert_eq!(entry.timestamp, cached_at);
        drop(screen);

        let calls = h.api.call_count();
        let remount = Screen::mount(&h.ctx, "thalla", metrics());
        assert_eq!(remount.state().data_sets["metrics"], json!([1, 2]));
        settle().await;
        assert_eq!(h.api.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_during_fetch_does_not_leave_loading() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([1]))
            .delay("weather", Duration::from_secs(10));
        let soil = vec![RequestDescriptor::stats("thalla", "soil", "{}", "soil")];
        let mut cached = DataSets::new();
        cached.insert("soil".into(), json!([2]));
        h.cache
            .put(&CacheKey::derive("thalla", &soil).unwrap(), &cached)
            .unwrap();

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        settle().await;
        assert!(screen.state().is_loading);

        screen.set_descriptors(soil);
        settle().await;

        let state = screen.state();
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(state.data_sets, cached);
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_updates_minutes_ago() {
        let h = harness(BatchMode::SettleAll);
        h.api.respond("weather", json!([1]));

        let screen = Screen::mount(&h.ctx, "thalla", metrics());
        wait_settled(&screen).await;
        assert_eq!(screen.state().minutes_ago, 0);

        tokio::time::advance(Duration::from_secs(3 * 60)).await;
        settle().await;

        let state = screen.state();
        assert_eq!(state.minutes_ago, 3);
        assert!(!state.should_refetch);
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observers_see_loading_until_whole_batch_lands() {
        let h = harness(BatchMode::SettleAll);
        h.api
            .respond("weather", json!([1]))
            .delay("weather", Duration::from_secs(1))
            .respond("humidity", json!([2]))
            .delay("humidity", Duration::from_secs(2))
            .respond("soil", json!({ "avg": 3 }))
            .delay("soil", Duration::from_secs(3));
        let descriptors = vec![
            RequestDescriptor::data("thalla", "weather", "{}", "temperature"),
            RequestDescriptor::data("thalla", "humidity", "{}", "humidity"),
            RequestDescriptor::stats("thalla", "soil", "{}", "soil"),
        ];

        let screen = Screen::mount(&h.ctx, "thalla", descriptors);
        let mut rx = screen.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let state = rx.borrow_and_update().clone();
                    seen.lock().push(state);
                }
            })
        };

        wait_settled(&screen).await;
        settle().await;
        recorder.abort();

        let seen = seen.lock();
        assert!(seen.iter().any(|s| s.is_loading));
        for state in seen.iter().filter(|s| !s.is_loading) {
            assert_eq!(state.data_sets.len(), 3);
        }
        assert_eq!(seen.last().map(|s| s.data_sets.len()), Some(3));
    }
}
