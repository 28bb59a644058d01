// LocalAgent Gate - Web Fetch Module
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Plain HTTP GET for the fetch tool. Domain policy is enforced before
// anything reaches this module. Bounded by a fixed timeout; bodies are
// cut to a fixed byte budget with an explicit truncation marker.

use crate::config::{FETCH_BODY_LIMIT, FETCH_TIMEOUT};
use crate::error::ToolError;
use reqwest::blocking::Client;
use std::time::Duration;

/// A fetched page, body already truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Fetch primitive behind the fetch tool.
pub trait PageFetcher: Send + Sync {
    fn get(&self, url: &str) -> Result<Page, ToolError>;
}

/// Prepend https:// to scheme-less input; reject anything not http/https.
pub fn normalize_url(url: &str) -> Result<String, ToolError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }
    if url.contains("://") {
        return Err(ToolError::FetchTransportError {
            url: url.to_string(),
            reason: "only http/https URLs allowed".to_string(),
        });
    }
    let fixed = format!("https://{}", url);
    log::debug!("URL completed to: {}", fixed);
    Ok(fixed)
}

/// Cut `body` to at most `limit` bytes on a char boundary, appending a marker.
pub fn truncate_body(body: String, limit: usize) -> String {
    if body.len() <= limit {
        return body;
    }
    let original = body.len();
    let mut cut = limit;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = body;
    out.truncate(cut);
    out.push_str(&format!(
        "\n\n... (truncated to {} bytes, original size: {} bytes)",
        limit, original
    ));
    out
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    limit: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, String> {
        Self::with_limits(FETCH_TIMEOUT, FETCH_BODY_LIMIT)
    }

    pub fn with_limits(timeout: Duration, limit: usize) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent("LocalAgent-Pro/1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, timeout, limit })
    }
}

impl PageFetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Page, ToolError> {
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                ToolError::FetchTimedOut { url: url.to_string(), secs: self.timeout.as_secs() }
            } else {
                ToolError::FetchTransportError { url: url.to_string(), reason: e.to_string() }
            }
        };

        log::debug!("Sending HTTP GET to: {}", url);
        let resp = self.client.get(url).send().map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::FetchTransportError {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let body = resp.text().map_err(transport)?;
        log::info!("Fetched {} (status {}, {} bytes)", url, status.as_u16(), body.len());

        Ok(Page {
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate_body(body, self.limit),
        })
    }
}

/// Test double: serves one canned page for any URL and records requests.
#[cfg(test)]
pub(crate) struct StubFetcher {
    pub requests: std::sync::Mutex<Vec<String>>,
    pub body: String,
}

#[cfg(test)]
impl StubFetcher {
    pub fn new(body: &str) -> Self {
        Self { requests: std::sync::Mutex::new(Vec::new()), body: body.to_string() }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PageFetcher for StubFetcher {
    fn get(&self, url: &str) -> Result<Page, ToolError> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok(Page { url: url.to_string(), status: 200, body: truncate_body(self.body.clone(), FETCH_BODY_LIMIT) })
    }
}

// ============================================================================
// TESTS
// ============================================================================
