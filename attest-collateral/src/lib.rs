// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Batched HTTP fetching for attestation collateral.
//!
//! Endorsement material (certificates, CRLs, TCB info, enclave identities)
//! is served by vendor endpoints that rate-limit aggressively. This crate
//! issues a batch of requests concurrently, retries HTTP 429 responses
//! after the advertised `Retry-After` interval, and returns the responses
//! in request order. Any other non-2xx status fails the whole batch; there
//! are no partial results.

use std::collections::HashMap;
use std::time::Duration;

use attest_types::{Result, VerificationError};
use tokio::time::Instant;
use tracing::{debug, warn};

mod tracker;

pub use tracker::{RequestSetId, RequestTracker};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// One collateral request. A body turns the request into a POST.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub max_attempts: u32,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Fetch a response header, optionally URL-decoding it. Intel serves
    /// issuer certificate chains percent-encoded in headers.
    pub fn header_data(&self, name: &str, url_decoded: bool) -> Result<Vec<u8>> {
        let value = self
            .headers
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| {
                VerificationError::MalformedEvidence(format!("missing response header '{name}'"))
            })?;
        if url_decoded {
            Ok(percent_encoding::percent_decode_str(value).collect())
        } else {
            Ok(value.as_bytes().to_vec())
        }
    }
}

/// Issue a batch of requests concurrently. Responses come back in request
/// order; the batch fails as a whole on the first unrecoverable error.
pub async fn fetch_all(client: &reqwest::Client, requests: Vec<Request>) -> Result<Vec<Response>> {
    futures::future::try_join_all(requests.into_iter().map(|r| fetch_one(client, r, None))).await
}

/// Like [`fetch_all`] with a deadline. The deadline is checked between
/// retries and bounds the overall batch; exceeding it yields
/// [`VerificationError::Timeout`].
pub async fn fetch_all_with_deadline(
    client: &reqwest::Client,
    requests: Vec<Request>,
    deadline: Duration,
) -> Result<Vec<Response>> {
    let deadline = Instant::now() + deadline;
    tokio::time::timeout_at(
        deadline,
        futures::future::try_join_all(
            requests
                .into_iter()
                .map(|r| fetch_one(client, r, Some(deadline))),
        ),
    )
    .await
    .map_err(|_| VerificationError::Timeout)?
}

async fn fetch_one(
    client: &reqwest::Client,
    request: Request,
    deadline: Option<Instant>,
) -> Result<Response> {
    let mut attempts_left = request.max_attempts.max(1);
    loop {
        debug!(url = %request.url, "fetching collateral");
        let builder = match &request.body {
            Some(body) => client.post(&request.url).body(body.clone()),
            None => client.get(&request.url),
        };
        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, "collateral request failed: {e}");
            VerificationError::CollateralFetchFailed {
                url: request.url.clone(),
                status: 0,
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            attempts_left -= 1;
            if attempts_left == 0 {
                return Err(VerificationError::CollateralFetchFailed {
                    url: request.url.clone(),
                    status,
                });
            }
            let retry_after = retry_after_seconds(response.headers());
            debug!(url = %request.url, retry_after, "HTTP 429, retrying");
            let wait = Duration::from_secs(retry_after);
            if let Some(deadline) = deadline {
                if Instant::now() + wait > deadline {
                    return Err(VerificationError::Timeout);
                }
            }
            tokio::time::sleep(wait).await;
            continue;
        }
        if !(200..300).contains(&status) {
            return Err(VerificationError::CollateralFetchFailed {
                url: request.url.clone(),
                status,
            });
        }

        let headers = header_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|_| VerificationError::CollateralFetchFailed {
                url: request.url.clone(),
                status,
            })?
            .to_vec();
        debug!(url = %request.url, bytes = body.len(), "collateral fetched");
        return Ok(Response {
            status,
            headers,
            body,
        });
    }
}

/// Sequential variant of [`fetch_all`] for callers without an async
/// runtime. Same retry and ordering contract.
pub fn fetch_all_blocking(requests: Vec<Request>) -> Result<Vec<Response>> {
    let client = reqwest::blocking::Client::new();
    requests
        .into_iter()
        .map(|request| {
            let mut attempts_left = request.max_attempts.max(1);
            loop {
                let builder = match &request.body {
                    Some(body) => client.post(&request.url).body(body.clone()),
                    None => client.get(&request.url),
                };
                let response =
                    builder
                        .send()
                        .map_err(|_| VerificationError::CollateralFetchFailed {
                            url: request.url.clone(),
                            status: 0,
                        })?;
                let status = response.status().as_u16();
                if status == 429 {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(VerificationError::CollateralFetchFailed {
                            url: request.url.clone(),
                            status,
                        });
                    }
                    let retry_after = retry_after_seconds(response.headers());
                    std::thread::sleep(Duration::from_secs(retry_after));
                    continue;
                }
                if !(200..300).contains(&status) {
                    return Err(VerificationError::CollateralFetchFailed {
                        url: request.url.clone(),
                        status,
                    });
                }
                let headers = header_map(response.headers());
                let body = response
                    .bytes()
                    .map_err(|_| VerificationError::CollateralFetchFailed {
                        url: request.url.clone(),
                        status,
                    })?
                    .to_vec();
                return Ok(Response {
                    status,
                    headers,
                    body,
                });
            }
        })
        .collect()
}

fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}
