use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FetchError;

/// Per-plot response payloads, keyed by plot id.
///
/// Ordered so that serialization (and therefore size estimation and cache
/// write-back) is deterministic.
pub type DataSets = BTreeMap<String, serde_json::Value>;

/// Which backend operation a descriptor resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Raw records from a collection.
    Data,
    /// Aggregated statistics over a collection.
    Stats,
}

/// One named query against the backend.
///
/// `params` is kept as the opaque JSON string the screen built; it is only
/// decoded right before the request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub project: String,
    pub collection: String,
    #[serde(default)]
    pub params: String,
    pub plot_id: String,
}

impl RequestDescriptor {
    pub fn data(project: &str, collection: &str, params: &str, plot_id: &str) -> Self {
        Self {
            kind: RequestKind::Data,
            project: project.to_string(),
            collection: collection.to_string(),
            params: params.to_string(),
            plot_id: plot_id.to_string(),
        }
    }

    pub fn stats(project: &str, collection: &str, params: &str, plot_id: &str) -> Self {
        Self {
            kind: RequestKind::Stats,
            ..Self::data(project, collection, params, plot_id)
        }
    }

    /// Decode `params` into JSON. An empty string means "no filters".
    pub fn decoded_params(&self) -> Result<serde_json::Value, FetchError> {
        if self.params.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.params).map_err(|e| FetchError::InvalidParams {
            plot_id: self.plot_id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Reject descriptor lists whose plot ids collide.
pub fn validate_descriptors(descriptors: &[RequestDescriptor]) -> Result<(), FetchError> {
    let mut seen = HashSet::new();
    for d in descriptors {
        if !seen.insert(d.plot_id.as_str()) {
            return Err(FetchError::DuplicatePlotId(d.plot_id.clone()));
        }
    }
    Ok(())
}

/// Identity of a cacheable batch: organization id followed by the serialized
/// descriptor list.
///
/// Serialization is by value, so two structurally equal descriptor lists map
/// to the same key regardless of where they were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key, or `None` when caching does not apply (missing
    /// organization or no descriptors).
    pub fn derive(organization_id: &str, descriptors: &[RequestDescriptor]) -> Option<Self> {
        if organization_id.is_empty() || descriptors.is_empty() {
            return None;
        }
        let serialized = serde_json::to_string(descriptors).ok()?;
        Some(Self(format!("{}{}", organization_id, serialized)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, stable digest for log lines.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..6])
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache:{}", self.digest())
    }
}
