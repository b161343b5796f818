// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Background request tracking with a submit / poll / callback lifecycle.
//!
//! Each submitted batch runs on its own task; the callback fires exactly
//! once with the indexed responses (or the batch error). Erasing a set, or
//! dropping the tracker, aborts outstanding work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use attest_types::Result;
use tracing::debug;

use crate::{fetch_all, Request, Response};

pub type RequestSetId = u64;

struct TrackedSet {
    handle: tokio::task::JoinHandle<()>,
    done: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct RequestTracker {
    client: reqwest::Client,
    next_id: AtomicU64,
    sets: Mutex<HashMap<RequestSetId, TrackedSet>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a request batch in the background. The callback receives the
    /// responses in request order, or the error that failed the batch.
    pub fn submit(
        &self,
        requests: Vec<Request>,
        callback: impl FnOnce(Result<Vec<Response>>) + Send + 'static,
    ) -> RequestSetId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let done = Arc::new(AtomicBool::new(false));
        let task_done = done.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            let result = fetch_all(&client, requests).await;
            task_done.store(true, Ordering::Release);
            callback(result);
        });
        self.sets
            .lock()
            .expect("request tracker mutex poisoned")
            .insert(id, TrackedSet { handle, done });
        debug!(id, "request set submitted");
        id
    }

    /// Whether the batch has finished fetching (the callback may still be
    /// running). Unknown ids read as complete.
    pub fn is_complete(&self, id: RequestSetId) -> bool {
        self.sets
            .lock()
            .expect("request tracker mutex poisoned")
            .get(&id)
            .map(|set| set.done.load(Ordering::Acquire))
            .unwrap_or(true)
    }

    /// Cancel outstanding work for a set and forget it.
    pub fn erase(&self, id: RequestSetId) {
        if let Some(set) = self
            .sets
            .lock()
            .expect("request tracker mutex poisoned")
            .remove(&id)
        {
            set.handle.abort();
            debug!(id, "request set erased");
        }
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        let sets = self.sets.lock().expect("request tracker mutex poisoned");
        for set in sets.values() {
            set.handle.abort();
        }
    }
}
