//! Request correlation.
//!
//! Each outbound call gets a fresh id and an entry in the [`PendingTable`].
//! The entry is removed by whichever happens first:
//!
//! - the matching reply arrives,
//! - its timer fires,
//! - the link it was sent on goes down,
//! - the caller stops waiting.
//!
//! Removal happens under the table lock and only the remover resolves the
//! caller, so an entry is resolved at most once no matter how those paths
//! race.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use hostbridge_types::{BridgeError, Envelope, Result};

use crate::endpoint::{Endpoint, EndpointConfig, EndpointListener};

struct PendingRequest {
    method: String,
    generation: u64,
    issued_at: Instant,
    completion: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn finish(self, id: &str, outcome: Result<Value>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        tracing::debug!(
            request_id = id,
            method = %self.method,
            elapsed_ms = self.issued_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "request resolved"
        );
        let _ = self.completion.send(outcome);
    }
}

/// Outstanding requests, keyed by id.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request sent on the link of `generation`.
    pub fn insert(
        &self,
        id: &str,
        method: &str,
        generation: u64,
    ) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            id.to_string(),
            PendingRequest {
                method: method.to_string(),
                generation,
                issued_at: Instant::now(),
                completion: tx,
                timer: None,
            },
        );
        rx
    }

    /// Attach the timeout timer. If the entry is already gone the timer is
    /// aborted instead.
    pub fn set_timer(&self, id: &str, timer: JoinHandle<()>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Resolve `id` with `outcome`. Returns false if it was already resolved
    /// (or never existed).
    pub fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.finish(id, outcome);
                true
            }
            None => false,
        }
    }

    /// Reject every request sent on a link up to and including `generation`.
    /// Returns how many were rejected.
    pub fn reject_generation(&self, generation: u64, reason: &str) -> usize {
        let rejected: Vec<(String, PendingRequest)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.generation <= generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = rejected.len();
        for (id, entry) in rejected {
            let err = BridgeError::connection(format!(
                "connection to host lost before '{}' completed: {}",
                entry.method, reason
            ));
            entry.finish(&id, Err(err));
        }
        count
    }

    /// Drop `id` without resolving it (the caller went away).
    pub fn cancel(&self, id: &str) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                tracing::debug!(request_id = id, method = %entry.method, "request abandoned by caller");
                true
            }
            None => false,
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    fn expire(&self, id: &str, timeout: Duration) {
        let entry = self.entries.lock().remove(id);
        if let Some(entry) = entry {
            tracing::warn!(
                request_id = id,
                method = %entry.method,
                timeout_ms = timeout.as_millis() as u64,
                "request timed out"
            );
            let err = BridgeError::timeout(format!(
                "no response to '{}' within {} ms",
                entry.method,
                timeout.as_millis()
            ));
            // The timer is this task; nothing to abort.
            let _ = entry.completion.send(Err(err));
        }
    }
}

impl EndpointListener for PendingTable {
    fn on_envelope(&self, envelope: Envelope) {
        if envelope.is_request() {
            tracing::warn!(id = %envelope.id(), "ignoring request sent by the host");
            return;
        }
        let id = envelope.id().to_string();
        if !self.resolve(&id, envelope.into_outcome()) {
            tracing::debug!(request_id = %id, "discarding response with no pending request");
        }
    }

    fn on_disconnected(&self, generation: u64, reason: &str) {
        let rejected = self.reject_generation(generation, reason);
        if rejected > 0 {
            tracing::warn!(generation, rejected, "rejected in-flight requests");
        }
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("pending", &self.len())
            .finish()
    }
}

/// A sent request awaiting its reply.
///
/// Dropping the handle abandons the request: its entry and timer are
/// removed, and a reply arriving later is discarded.
#[must_use = "a dropped ResponseHandle abandons the request"]
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<Result<Value>>,
    pending: Weak<PendingTable>,
}

impl ResponseHandle {
    /// Id of the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> Result<Value> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::internal(format!(
                "request {} was dropped without a result",
                self.id
            ))),
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.cancel(&self.id);
        }
    }
}

/// Issues requests over an [`Endpoint`] and matches the replies.
pub struct Correlator {
    endpoint: Endpoint,
    pending: Arc<PendingTable>,
    default_timeout: Duration,
}

impl Correlator {
    /// Create a correlator with its own endpoint.
    ///
    /// `default_timeout` applies to requests issued without an explicit one.
    pub fn new(config: EndpointConfig, default_timeout: Duration) -> Self {
        let pending = Arc::new(PendingTable::new());
        let listener: Arc<dyn EndpointListener> = pending.clone();
        Self {
            endpoint: Endpoint::new(config, listener),
            pending,
            default_timeout,
        }
    }

    /// The underlying endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The pending table.
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Timeout used when none is given.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issue a request and wait for its outcome.
    pub async fn issue(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.send_request(method, params, timeout).await?.wait().await
    }

    /// Send a request and return a handle to its outcome.
    ///
    /// Connects first if needed; fails with `connection` if that fails.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let generation = self.endpoint.connect().await?;

        let id = Uuid::new_v4().to_string();
        let rx = self.pending.insert(&id, method, generation);
        let handle = ResponseHandle {
            id: id.clone(),
            rx,
            pending: Arc::downgrade(&self.pending),
        };

        let table = Arc::clone(&self.pending);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(&timer_id, timeout);
        });
        self.pending.set_timer(&id, timer);

        tracing::debug!(request_id = %id, method, generation, "sending request");
        let envelope = Envelope::request(id.as_str(), method, params);
        if let Err(err) = self.endpoint.send_on(generation, &envelope) {
            self.pending.resolve(&id, Err(err));
        }
        Ok(handle)
    }

    /// Close the link. Outstanding requests fail with `connection`.
    pub fn disconnect(&self) {
        self.endpoint.disconnect();
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("endpoint", &self.endpoint)
            .field("pending", &self.pending.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
