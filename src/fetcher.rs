//! Concurrent resolution of a descriptor batch.
//!
//! One task per descriptor, all awaited before the batch reports. Each result
//! is tagged with its plot id and classified as loaded, empty or failed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::api::DataApi;
use crate::error::FetchError;
use crate::notification::Notifier;
use crate::reducer::FetchAction;
use crate::types::{validate_descriptors, RequestDescriptor, RequestKind};

/// How a failing descriptor affects the rest of its batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchMode {
    /// Every descriptor settles on its own; failures become empty plots with a warning.
    #[default]
    SettleAll,
    /// The first failure aborts the whole batch.
    AllOrNothing,
}

/// Classified result for one plot.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotOutcome {
    Loaded { plot_id: String, payload: Value },
    Empty { plot_id: String },
    Failed { plot_id: String, error: String },
}

impl PlotOutcome {
    pub fn plot_id(&self) -> &str {
        match self {
            PlotOutcome::Loaded { plot_id, .. }
            | PlotOutcome::Empty { plot_id }
            | PlotOutcome::Failed { plot_id, .. } => plot_id,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, PlotOutcome::Loaded { .. })
    }

    pub fn warning_message(&self) -> Option<String> {
        match self {
            PlotOutcome::Loaded { .. } => None,
            PlotOutcome::Empty { plot_id } => Some(format!("No data available for {}", plot_id)),
            PlotOutcome::Failed { plot_id, error } => Some(format!("Could not load {}: {}", plot_id, error)),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PlotOutcome::Failed { .. })
    }

    /// Reducer action for this plot. Empty plots get an empty payload; failed
    /// plots keep whatever was shown before.
    pub fn into_action(self) -> FetchAction {
        let warning = self.warning_message().unwrap_or_default();
        match self {
            PlotOutcome::Loaded { plot_id, payload } => FetchAction::FetchSuccess {
                plot_id,
                response: payload,
            },
            PlotOutcome::Empty { plot_id } => FetchAction::FetchWarning {
                plot_id,
                response: Value::Array(Vec::new()),
                warning,
            },
            PlotOutcome::Failed { plot_id, .. } => FetchAction::PlotFailed { plot_id, warning },
        }
    }
}

/// An empty array, or an object whose `success` field is falsy.
pub fn is_empty_response(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.get("success").is_some_and(is_falsy),
        _ => false,
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

pub struct BatchFetcher {
    api: Arc<dyn DataApi>,
    notifier: Arc<dyn Notifier>,
    mode: BatchMode,
}

impl BatchFetcher {
    pub fn new(api: Arc<dyn DataApi>, notifier: Arc<dyn Notifier>, mode: BatchMode) -> Self {
        Self { api, notifier, mode }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Resolve every descriptor concurrently and classify the results.
    ///
    /// Outcomes come back in descriptor order. Success and per-plot warnings
    /// are notified here; batch-level errors are returned for the caller to
    /// report.
    pub async fn run_batch(&self, descriptors: &[RequestDescriptor]) -> Result<Vec<PlotOutcome>, FetchError> {
        if descriptors.is_empty() {
            return Err(FetchError::NoData);
        }
        validate_descriptors(descriptors)?;
        let params = descriptors
            .iter()
            .map(|d| d.decoded_params())
            .collect::<Result<Vec<_>, _>>()?;

        let mut tasks = JoinSet::new();
        for (index, (descriptor, params)) in descriptors.iter().cloned().zip(params).enumerate() {
            let api = Arc::clone(&self.api);
            tasks.spawn(async move {
                let result = match descriptor.kind {
                    RequestKind::Data => {
                        api.fetch_records(&descriptor.project, &descriptor.collection, &params)
                            .await
                    }
                    RequestKind::Stats => {
                        api.fetch_statistics(&descriptor.project, &descriptor.collection, &params)
                            .await
                    }
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<PlotOutcome>> = vec![None; descriptors.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    if self.mode == BatchMode::AllOrNothing {
                        return Err(FetchError::TaskFailed(e.to_string()));
                    }
                    log::warn!("Batch fetch: task failed: {}", e);
                    continue;
                }
            };
            let plot_id = descriptors[index].plot_id.clone();
            slots[index] = Some(match result {
                Ok(payload) if is_empty_response(&payload) => PlotOutcome::Empty { plot_id },
                Ok(payload) => PlotOutcome::Loaded { plot_id, payload },
                Err(e) => {
                    if self.mode == BatchMode::AllOrNothing {
                        return Err(e);
                    }
                    log::warn!("Batch fetch: {} failed: {}", plot_id, e);
                    PlotOutcome::Failed {
                        plot_id,
                        error: e.to_string(),
                    }
                }
            });
        }

        let outcomes: Vec<PlotOutcome> = slots
            .into_iter()
            .zip(descriptors)
            .map(|(slot, descriptor)| {
                slot.unwrap_or_else(|| PlotOutcome::Failed {
                    plot_id: descriptor.plot_id.clone(),
                    error: "fetch task did not complete".to_string(),
                })
            })
            .collect();

        self.report(&outcomes);
        Ok(outcomes)
    }

    fn report(&self, outcomes: &[PlotOutcome]) {
        let loaded = outcomes.iter().filter(|o| o.is_loaded()).count();
        log::info!("Batch fetch: {} of {} plots loaded", loaded, outcomes.len());

        if loaded > 0 {
            self.notifier.notify_success("Data loaded successfully");
        }
        for message in outcomes.iter().filter_map(|o| o.warning_message()) {
            self.notifier.notify_warning(&message);
        }
    }
}
