//! HTTP client for the cfdp server

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed; is the server running?", url))?;
        Self::into_json(response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed; is the server running?", url))?;
        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("<no body>".to_string()));

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("Server returned {}: {}", status, message);
        }
        Ok(body)
    }
}
