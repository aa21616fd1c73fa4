//! HTTP client for a PurlDB package database.
//!
//! Implements [`PackageIdentityService`] over the PurlDB REST API:
//!
//! - availability: `HEAD <api root>`, falling back to `GET <api root>?limit=1`
//!   for servers that reject `HEAD`
//! - lookup: `POST <api root>packages/filter_by_checksums/` with
//!   `{"sha1": [...]}`, answered by `{"results": [...]}`
//!
//! When `api_key_env` names a set environment variable its value is sent as
//! `Authorization: Token <key>`.
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network error → retry

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;

use d2d_harness_core::matching::purldb::{PackageIdentityService, PackageRecord};

use crate::config::PurlDbConfig;

const FILTER_BY_CHECKSUMS: &str = "packages/filter_by_checksums/";

#[derive(Debug, Deserialize)]
struct FilterResponse {
    #[serde(default)]
    results: Vec<PackageRecord>,
}

pub struct PurlDbClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
}

impl PurlDbClient {
    /// Build a client from `[purldb]`. Returns `None` when no URL is configured.
    pub fn from_config(config: &PurlDbConfig) -> Result<Option<Self>> {
        let Some(url) = &config.url else {
            return Ok(None);
        };
        let token = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        Ok(Some(Self::new(
            url,
            Duration::from_secs(config.timeout_secs),
            token,
            config.max_retries,
        )?))
    }

    pub fn new(
        url: &str,
        timeout: Duration,
        token: Option<String>,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(url),
            token,
            max_retries,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Token {}", token)),
            None => builder,
        }
    }

    async fn reachable(&self, method: Method, url: &str) -> bool {
        match self.request(method, url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Package database check {} failed: {}", url, e);
                false
            }
        }
    }
}

/// API roots are joined with relative endpoints, so they must end with `/`.
fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

#[async_trait]
impl PackageIdentityService for PurlDbClient {
    async fn is_available(&self) -> bool {
        if self.reachable(Method::HEAD, &self.base_url).await {
            return true;
        }
        let fallback = format!("{}?limit=1", self.base_url);
        self.reachable(Method::GET, &fallback).await
    }

    async fn match_sha1(&self, sha1s: &[String]) -> Result<Vec<PackageRecord>> {
        if sha1s.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}{}", self.base_url, FILTER_BY_CHECKSUMS);
        let body = serde_json::json!({ "sha1": sha1s });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = match self.request(Method::POST, &url).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: FilterResponse = response.json().await?;
                tracing::debug!(
                    "{} checksum(s) matched {} package(s)",
                    sha1s.len(),
                    parsed.results.len()
                );
                return Ok(parsed.results);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(anyhow::anyhow!(
                    "Package database error {}: {}",
                    status,
                    body_text
                ));
                continue;
            }
            bail!("Package database error {}: {}", status, body_text);
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Package lookup failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://public.purldb.io/api"),
            "https://public.purldb.io/api/"
        );
        assert_eq!(
            normalize_base_url("https://public.purldb.io/api//"),
            "https://public.purldb.io/api/"
        );
    }

    #[test]
    fn no_url_means_no_client() {
        let config = PurlDbConfig::default();
        assert!(PurlDbClient::from_config(&config).unwrap().is_none());
    }
}
