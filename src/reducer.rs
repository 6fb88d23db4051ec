//! Per-screen fetch state machine.
//!
//! `Idle -> Loading -> {Success, Warning, Error}`, with `CacheRestore` as a
//! side transition that populates data without passing through `Loading`.
//! Each per-plot action touches only its own plot's payload, so the result of
//! a batch does not depend on the order those actions arrive in.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::time_utils::{minutes_since, should_fetch, DEFAULT_REFETCH_MINUTES};
use crate::types::DataSets;

/// What a screen renders from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchState {
    pub data_sets: DataSets,
    pub is_loading: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub page_refresh_time: Option<DateTime<Utc>>,
    pub minutes_ago: i64,
    pub should_refetch: bool,
}

impl FetchState {
    /// True before anything was ever loaded: the only time a view should
    /// blank its charts behind a spinner.
    pub fn is_initial_load(&self) -> bool {
        self.is_loading && self.data_sets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchAction {
    FetchStart,
    FetchSuccess {
        plot_id: String,
        response: serde_json::Value,
    },
    FetchWarning {
        plot_id: String,
        response: serde_json::Value,
        warning: String,
    },
    /// One plot could not be loaded. Data already shown for it stays.
    PlotFailed {
        plot_id: String,
        warning: String,
    },
    FetchError {
        error: String,
    },
    /// A cycle was abandoned before its terminal action.
    FetchCancelled,
    /// Drop plots no longer requested.
    RetainPlots {
        plot_ids: Vec<String>,
    },
    UpdateMinutesAgo,
    CacheRestore {
        data_sets: DataSets,
        minutes_ago: i64,
        refreshed_at: DateTime<Utc>,
    },
}

impl FetchAction {
    /// Actions that finish a fetch cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchAction::FetchSuccess { .. }
                | FetchAction::FetchWarning { .. }
                | FetchAction::PlotFailed { .. }
                | FetchAction::FetchError { .. }
                | FetchAction::FetchCancelled
        )
    }
}

/// Pure transition function over [`FetchState`].
#[derive(Debug, Clone, Copy)]
pub struct FetchReducer {
    refetch_interval: Duration,
}

impl Default for FetchReducer {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_REFETCH_MINUTES))
    }
}

impl FetchReducer {
    pub fn new(refetch_interval: Duration) -> Self {
        Self { refetch_interval }
    }

    pub fn reduce(&self, state: &mut FetchState, action: FetchAction, now: DateTime<Utc>) {
        match action {
            FetchAction::FetchStart => {
                state.is_loading = true;
                state.warning = None;
                state.error = None;
            }
            FetchAction::FetchSuccess { plot_id, response } => {
                state.is_loading = false;
                state.error = None;
                state.data_sets.insert(plot_id, response);
                state.page_refresh_time = Some(now);
                state.minutes_ago = 0;
            }
            FetchAction::FetchWarning {
                plot_id,
                response,
                warning,
            } => {
                state.is_loading = false;
                state.error = None;
                state.warning = Some(warning);
                state.data_sets.insert(plot_id, response);
                state.page_refresh_time = Some(now);
                state.minutes_ago = 0;
            }
            FetchAction::PlotFailed { plot_id, warning } => {
                state.is_loading = false;
                state.error = None;
                state.warning = Some(warning);
                state
                    .data_sets
                    .entry(plot_id)
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            }
            FetchAction::FetchError { error } => {
                state.is_loading = false;
                state.error = Some(error);
            }
            FetchAction::FetchCancelled => {
                state.is_loading = false;
            }
            FetchAction::RetainPlots { plot_ids } => {
                state.data_sets.retain(|plot_id, _| plot_ids.contains(plot_id));
            }
            FetchAction::UpdateMinutesAgo => {
                let Some(refreshed) = state.page_refresh_time else {
                    return;
                };
                state.minutes_ago = minutes_since(refreshed, now);
                state.should_refetch = should_fetch(Some(refreshed), now, self.refetch_interval);
            }
            FetchAction::CacheRestore {
                data_sets,
                minutes_ago,
                refreshed_at,
            } => {
                state.data_sets.extend(data_sets);
                state.minutes_ago = minutes_ago;
                state.page_refresh_time = Some(refreshed_at);
            }
        }
    }

    /// Apply a sequence of actions as one update.
    pub fn reduce_all<I>(&self, state: &mut FetchState, actions: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = FetchAction>,
    {
        for action in actions {
            self.reduce(state, action, now);
        }
    }
}
