//! Tradable pair listing, proxied from the venue's REST API.
//!
//! The venue answers `{"error":[...],"result":{...}}`; clients only ever
//! see the `result` object.

use crate::error::{ServerError, ServerResult};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct AssetPairsResponse {
    #[serde(default)]
    error: Vec<String>,
    result: Option<Value>,
}

/// HTTP client for the asset pairs endpoint.
#[derive(Debug, Clone)]
pub struct AssetPairsClient {
    http: reqwest::Client,
    url: String,
}

impl AssetPairsClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> ServerResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Fetch the pair listing and unwrap its `result` object.
    pub async fn fetch(&self) -> ServerResult<Value> {
        debug!(url = %self.url, "Fetching asset pairs");
        let response: AssetPairsResponse = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.error.is_empty() {
            let joined = response.error.join("; ");
            warn!(error = %joined, "Venue returned asset pairs error");
            return Err(ServerError::AssetPairsUpstream(joined));
        }

        response
            .result
            .ok_or_else(|| ServerError::AssetPairsUpstream("response without result".to_string()))
    }
}
