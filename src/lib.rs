pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod notification;
pub mod reducer;
pub mod screen;
pub mod time_utils;
pub mod timer;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use api::HttpDataApi;
use cache::ResponseCache;
use config::{DashConfig, ScreenConfig};
use notification::LogNotifier;
use screen::{DashContext, Screen, ScreenSettings};
use time_utils::format_time_since;

pub use error::{CacheError, FetchError};
pub use reducer::{FetchAction, FetchReducer, FetchState};
pub use types::{CacheKey, DataSets, RequestDescriptor, RequestKind};

/// Build the shared context from config: HTTP client, cache, log notifier.
pub fn build_context(config: &DashConfig) -> Result<DashContext, String> {
    let api = HttpDataApi::new(&config.api_base_url, config.api_token.as_deref())?;
    Ok(DashContext::new(
        Arc::new(api),
        Arc::new(LogNotifier),
        Arc::new(ResponseCache::new(config.cache_budget_bytes)),
        ScreenSettings::from(config),
    ))
}

/// Mount every configured screen and keep them refreshing until Ctrl-C.
pub async fn run(config: DashConfig) -> Result<(), String> {
    if config.screens.is_empty() {
        return Err("No screens configured. Add entries to \"screens\" in the config file.".to_string());
    }

    let ctx = build_context(&config)?;
    log::info!(
        "labdash starting: {} screens against {}",
        config.screens.len(),
        config.api_base_url
    );

    let mut mounted = Vec::with_capacity(config.screens.len());
    for screen_config in &config.screens {
        let screen = Screen::mount(&ctx, &screen_config.organization_id, screen_config.descriptors.clone());
        let watcher = spawn_state_logger(screen_config, &screen);
        mounted.push((screen, watcher));
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {}", e))?;

    log::info!("Shutting down");
    for (screen, watcher) in mounted {
        screen.unmount();
        watcher.abort();
    }

    let stats = ctx.cache.stats();
    log::info!(
        "Cache at exit: {} entries, {} of {} bytes",
        stats.entries,
        stats.total_bytes,
        stats.budget_bytes
    );
    Ok(())
}

/// Log each settled state change of a screen.
fn spawn_state_logger(screen_config: &ScreenConfig, screen: &Screen) -> JoinHandle<()> {
    let label = screen_config.label().to_string();
    let mut rx = screen.subscribe();
    tokio::spawn(async move {
        let mut last_refresh = None;
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.is_loading {
                continue;
            }
            if let Some(error) = &state.error {
                log::warn!("[{}] {}", label, error);
                continue;
            }
            if state.page_refresh_time == last_refresh {
                continue;
            }
            last_refresh = state.page_refresh_time;
            if let Some(refreshed) = state.page_refresh_time {
                log::info!(
                    "[{}] {} plots, updated {}{}",
                    label,
                    state.data_sets.len(),
                    format_time_since(refreshed, Utc::now()),
                    state
                        .warning
                        .as_deref()
                        .map(|w| format!(" ({})", w))
                        .unwrap_or_default()
                );
            }
        }
    })
}
