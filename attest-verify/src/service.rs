// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Background verification service.
//!
//! Each submitted request runs on its own task through the state machine
//! `Submitted -> FetchingEndorsements -> Verifying -> Complete | Failed`.
//! Endorsement fetches complete before verification begins. The request
//! table sits behind a single mutex with bounded hold times (lookup and
//! insert only); `erase` is valid in any state and aborts outstanding
//! HTTP work, while in-flight crypto runs to completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use attest_types::{AttestationBundle, Claims, Options, Result};
use tracing::debug;

pub type RequestId = u64;

/// Externally visible request state. Terminal states carry the outcome.
#[derive(Debug, Clone)]
pub enum RequestState {
    Submitted,
    FetchingEndorsements,
    Verifying,
    Complete(Claims),
    Failed(String),
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::FetchingEndorsements => "fetching-endorsements",
            Self::Verifying => "verifying",
            Self::Complete(_) => "complete",
            Self::Failed(_) => "failed",
        }
    }
}

struct RequestSlot {
    state: RequestState,
    handle: Option<tokio::task::JoinHandle<()>>,
}

type RequestTable = Arc<Mutex<HashMap<RequestId, RequestSlot>>>;

#[derive(Default)]
pub struct VerifierService {
    client: reqwest::Client,
    next_id: AtomicU64,
    requests: RequestTable,
}

impl VerifierService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a bundle for background verification.
    pub fn submit(&self, options: Options, bundle: AttestationBundle) -> RequestId {
        self.submit_with_callback(options, bundle, |_, _| {})
    }

    /// Submit a bundle; the callback fires exactly once with the outcome.
    pub fn submit_with_callback<F>(
        &self,
        options: Options,
        bundle: AttestationBundle,
        callback: F,
    ) -> RequestId
    where
        F: FnOnce(RequestId, Result<Claims>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            RequestSlot {
                state: RequestState::Submitted,
                handle: None,
            },
        );

        let requests = self.requests.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            set_state(&requests, id, RequestState::FetchingEndorsements);
            let outcome = run_request(id, options, bundle, &requests, &client).await;
            let state = match &outcome {
                Ok(claims) => RequestState::Complete(claims.clone()),
                Err(e) => RequestState::Failed(e.to_string()),
            };
            set_state(&requests, id, state);
            callback(id, outcome);
        });

        if let Some(slot) = self.lock().get_mut(&id) {
            slot.handle = Some(handle);
        } else {
            // Erased before the handle landed; stop the task.
            handle.abort();
        }
        debug!(id, "verification request submitted");
        id
    }

    /// Snapshot of a request's state; `None` for unknown ids.
    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.lock().get(&id).map(|slot| slot.state.clone())
    }

    /// The claims of a completed request: `None` while pending or unknown,
    /// `Some(Err(message))` for failures.
    pub fn result(&self, id: RequestId) -> Option<Result<Claims, String>> {
        match self.state(id)? {
            RequestState::Complete(claims) => Some(Ok(claims)),
            RequestState::Failed(message) => Some(Err(message)),
            _ => None,
        }
    }

    /// Drop a request, cancelling outstanding work. Valid in any state.
    pub fn erase(&self, id: RequestId) {
        if let Some(slot) = self.lock().remove(&id) {
            if let Some(handle) = slot.handle {
                handle.abort();
            }
            debug!(id, "verification request erased");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, RequestSlot>> {
        self.requests.lock().expect("request table mutex poisoned")
    }
}

impl Drop for VerifierService {
    fn drop(&mut self) {
        for slot in self.lock().values() {
            if let Some(handle) = &slot.handle {
                handle.abort();
            }
        }
    }
}

async fn run_request(
    id: RequestId,
    options: Options,
    bundle: AttestationBundle,
    requests: &RequestTable,
    client: &reqwest::Client,
) -> Result<Claims> {
    let endorsements = crate::prepare_endorsements(&bundle, &options, client).await?;
    let prepared = AttestationBundle {
        endorsements,
        ..bundle
    };
    set_state(requests, id, RequestState::Verifying);

    // The endorsements are resolved; make sure verification does not
    // refetch them.
    let mut options = options;
    options.fresh_endorsements = false;
    crate::verify(&prepared, &options, client).await
}

fn set_state(requests: &RequestTable, id: RequestId, state: RequestState) {
    if let Some(slot) = requests
        .lock()
        .expect("request table mutex poisoned")
        .get_mut(&id)
    {
        debug!(id, state = state.name(), "request state change");
        slot.state = state;
    }
}
