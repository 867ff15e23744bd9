use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CACHE_CONTROL, LAST_MODIFIED};
use serde_json::Value;
use tokio::time::Instant;

use super::rate_limit::{RateQuota, LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER};
use super::{BoxFuture, RemoteSource, SectorQuery, SectorResponse};
use crate::error::SyncError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `RemoteSource` over HTTP. Relative resources resolve against `base_url`;
/// sector queries always carry their own absolute endpoint.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ed3d/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn resolve(&self, resource: &str) -> String {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            return resource.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            resource.trim_start_matches('/')
        )
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = header_str(headers, LAST_MODIFIED.as_str())?;
    match DateTime::parse_from_rfc2822(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            log_warn!("Ignoring unparseable Last-Modified '{raw}': {err}");
            None
        }
    }
}

fn quota_from_headers(headers: &HeaderMap) -> Option<RateQuota> {
    RateQuota::from_headers(
        header_str(headers, LIMIT_HEADER),
        header_str(headers, RESET_HEADER),
        header_str(headers, REMAINING_HEADER),
    )
}

impl RemoteSource for HttpRemote {
    fn last_modified(
        &self,
        resource: &str,
    ) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, SyncError>> {
        let url = self.resolve(resource);
        Box::pin(async move {
            let resp = self
                .client
                .head(&url)
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|e| SyncError::network(&url, e))?;

            if !resp.status().is_success() {
                return Err(SyncError::network(&url, format!("HTTP {}", resp.status())));
            }

            Ok(parse_last_modified(resp.headers()))
        })
    }

    fn fetch_json(&self, resource: &str) -> BoxFuture<'_, Result<Value, SyncError>> {
        let url = self.resolve(resource);
        Box::pin(async move {
            log_debug!("GET {url}");
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SyncError::network(&url, e))?;

            if !resp.status().is_success() {
                return Err(SyncError::network(&url, format!("HTTP {}", resp.status())));
            }

            resp.json::<Value>()
                .await
                .map_err(|e| SyncError::MalformedResponse {
                    resource: url.clone(),
                    reason: e.to_string(),
                })
        })
    }

    fn fetch_sector(
        &self,
        query: SectorQuery,
    ) -> BoxFuture<'_, Result<SectorResponse, SyncError>> {
        Box::pin(async move {
            let resource = query.url();
            log_debug!("GET {resource}");
            let started = Instant::now();

            let resp = self
                .client
                .get(&query.endpoint)
                .query(&query.query_pairs())
                .send()
                .await
                .map_err(|e| SyncError::network(&resource, e))?;

            if !resp.status().is_success() {
                return Err(SyncError::network(
                    &resource,
                    format!("HTTP {}", resp.status()),
                ));
            }

            let quota = quota_from_headers(resp.headers());
            let text = resp
                .text()
                .await
                .map_err(|e| SyncError::network(&resource, e))?;
            let elapsed = started.elapsed();

            let body = match serde_json::from_str::<Value>(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    log_warn!("Response for {resource} is not JSON: {err}");
                    None
                }
            };

            Ok(SectorResponse {
                body,
                quota,
                elapsed,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn relative_resources_resolve_against_base() {
        let remote = HttpRemote::new("https://www.edsm.net/dump/").unwrap();
        assert_eq!(
            remote.resolve("/systemsWithCoordinates.json"),
            "https://www.edsm.net/dump/systemsWithCoordinates.json"
        );
        assert_eq!(
            remote.resolve("https://example.org/sectors.json"),
            "https://example.org/sectors.json"
        );
    }

    #[test]
    fn headers_carry_quota_and_last_modified() {
        let mut headers = HeaderMap::new();
        headers.insert(LIMIT_HEADER, HeaderValue::from_static("360"));
        headers.insert(RESET_HEADER, HeaderValue::from_static("3600"));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        let quota = quota_from_headers(&headers).unwrap();
        assert_eq!(quota.limit, 360);
        assert_eq!(quota.reset, Duration::from_secs(3600));
        assert_eq!(
            parse_last_modified(&headers).map(|dt| dt.to_rfc3339()),
            Some("2015-10-21T07:28:00+00:00".to_string())
        );
    }
}
