//! Configuration stored in ~/.labdash/config.json.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_BUDGET_BYTES, DEFAULT_TTL_MINUTES};
use crate::fetcher::BatchMode;
use crate::types::{validate_descriptors, RequestDescriptor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_cache_budget_bytes")]
    pub cache_budget_bytes: u64,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u32,
    #[serde(default = "default_refetch_interval_minutes")]
    pub refetch_interval_minutes: u32,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub batch_mode: BatchMode,
    /// Screens the headless runner mounts.
    #[serde(default)]
    pub screens: Vec<ScreenConfig>,
}

/// One dashboard screen: an organization and the plots it shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenConfig {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub descriptors: Vec<RequestDescriptor>,
}

impl ScreenConfig {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.organization_id)
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_cache_budget_bytes() -> u64 {
    DEFAULT_BUDGET_BYTES
}

fn default_cache_ttl_minutes() -> u32 {
    DEFAULT_TTL_MINUTES as u32
}

fn default_refetch_interval_minutes() -> u32 {
    30
}

fn default_tick_interval_secs() -> u64 {
    60
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            cache_budget_bytes: default_cache_budget_bytes(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            refetch_interval_minutes: default_refetch_interval_minutes(),
            tick_interval_secs: default_tick_interval_secs(),
            batch_mode: BatchMode::default(),
            screens: Vec::new(),
        }
    }
}

impl DashConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_ttl_minutes as i64)
    }

    pub fn refetch_interval(&self) -> Duration {
        Duration::from_secs(self.refetch_interval_minutes as u64 * 60)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Check values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_budget_bytes == 0 {
            return Err("cacheBudgetBytes must be greater than zero".to_string());
        }
        if self.refetch_interval_minutes == 0 {
            return Err("refetchIntervalMinutes must be greater than zero".to_string());
        }
        if self.tick_interval_secs == 0 {
            return Err("tickIntervalSecs must be greater than zero".to_string());
        }
        for screen in &self.screens {
            validate_descriptors(&screen.descriptors)
                .map_err(|e| format!("Screen '{}': {}", screen.label(), e))?;
        }
        Ok(())
    }
}

/// Default config location.
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".labdash").join("config.json"))
}

/// Load configuration from ~/.labdash/config.json
pub fn load_config() -> Result<DashConfig, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<DashConfig, String> {
    if !path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with: {{ \"apiBaseUrl\": \"https://host/api\" }}",
            path.display()
        ));
    }

    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: DashConfig =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    config.validate()?;
    Ok(config)
}
