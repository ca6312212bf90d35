//! Remote API client
//!
//! Minimal client for the publisher's paginated JSON API. The import path
//! never depends on it; it exists for the backfill fallback and only runs
//! when an API key is configured.

use std::time::Duration;

use serde::Deserialize;

use cfdp_common::{CfdpError, Result};

use crate::config::RemoteApiConfig;

const MAX_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Committee detail as returned by the remote API.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitteeDetails {
    pub committee_id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub candidate_ids: Vec<String>,
    pub state: Option<String>,
    pub designation: Option<String>,
    pub committee_type: Option<String>,
    pub treasurer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteClient {
    pub fn new(config: &RemoteApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CfdpError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Whether remote lookups are available at all.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Look up one committee. `Ok(None)` when the API has no such committee.
    pub async fn committee(&self, cmte_id: &str) -> Result<Option<CommitteeDetails>> {
        let Some(api_key) = &self.api_key else {
            return Err(CfdpError::Config("remote API key not configured".to_string()));
        };
        let url = format!("{}/committee/{}/", self.base_url, cmte_id);

        let mut attempt = 1;
        loop {
            let response = self
                .http
                .get(&url)
                .query(&[("api_key", api_key.as_str())])
                .send()
                .await
                .map_err(|e| CfdpError::Network(e.to_string()))?;

            match response.status() {
                status if status.is_success() => {
                    let envelope: ResultsEnvelope<CommitteeDetails> = response
                        .json()
                        .await
                        .map_err(|e| CfdpError::Parse(e.to_string()))?;
                    return Ok(envelope.results.into_iter().next());
                }
                reqwest::StatusCode::NOT_FOUND => return Ok(None),
                reqwest::StatusCode::TOO_MANY_REQUESTS if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(cmte_id = cmte_id, attempt = attempt, "Remote API rate limited");
                    tokio::time::sleep(RATE_LIMIT_BACKOFF * attempt).await;
                    attempt += 1;
                }
                status => {
                    return Err(CfdpError::Network(format!(
                        "remote API returned {} for {}",
                        status, cmte_id
                    )));
                }
            }
        }
    }
}
