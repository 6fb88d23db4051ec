//! REST client for the living lab collection/statistics API.
//!
//! Uses reqwest with optional Bearer token auth. Both operations are
//! idempotent GETs; retries are left to whoever wraps the client.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::FetchError;

/// Backend operations a descriptor can resolve to.
#[async_trait]
pub trait DataApi: Send + Sync {
    /// Raw records of a collection ("data" descriptors).
    async fn fetch_records(&self, project: &str, collection: &str, params: &Value) -> Result<Value, FetchError>;

    /// Aggregated statistics over a collection ("stats" descriptors).
    async fn fetch_statistics(&self, project: &str, collection: &str, params: &Value) -> Result<Value, FetchError>;
}

pub struct HttpDataApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpDataApi {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, String> {
        let base_url = Url::parse(base_url).map_err(|e| format!("Invalid API base URL '{}': {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(format!("API base URL cannot carry a path: {}", base_url));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.map(|t| t.to_string()),
        })
    }

    fn endpoint(&self, project: &str, collection: &str, operation: &str, params: &Value) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["projects", project, "collections", collection, operation]);
        }
        url.query_pairs_mut().append_pair("params", &params.to_string());
        url
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        log::debug!("Data API: GET {}", url.path());
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api { status, body });
        }

        resp.json::<Value>().await.map_err(|e| FetchError::Parse(e.to_string()))
    }
}

#[async_trait]
impl DataApi for HttpDataApi {
    async fn fetch_records(&self, project: &str, collection: &str, params: &Value) -> Result<Value, FetchError> {
        self.get_json(self.endpoint(project, collection, "records", params)).await
    }

    async fn fetch_statistics(&self, project: &str, collection: &str, params: &Value) -> Result<Value, FetchError> {
        self.get_json(self.endpoint(project, collection, "statistics", params)).await
    }
}
