//! Completion handle for asynchronous handlers.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use hostbridge_types::{BridgeError, ErrorKind, Result};

use crate::context::ExecutionContext;

pub(crate) type CompletionSlot = Arc<Mutex<Option<oneshot::Sender<Result<Value>>>>>;

/// Token an asynchronous handler uses to report its eventual result.
///
/// Exactly one of [`fulfill`](Self::fulfill), [`fail`](Self::fail) or
/// [`complete`](Self::complete) may be called; each consumes the handle.
/// Dropping the handle without calling any of them answers the caller with
/// an `internal` error. A result reported after the dispatcher gave up on
/// the call (timeout) is discarded.
pub struct CompletionHandle {
    request_id: String,
    method: String,
    slot: CompletionSlot,
    context: ExecutionContext,
}

impl CompletionHandle {
    pub(crate) fn new(
        request_id: String,
        method: String,
        slot: CompletionSlot,
        context: ExecutionContext,
    ) -> Self {
        Self {
            request_id,
            method,
            slot,
            context,
        }
    }

    /// Id of the request being answered.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Name of the operation being answered.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The execution context, for scheduling follow-up steps on the host
    /// thread.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Whether the caller has stopped waiting (timed out or went away).
    pub fn is_abandoned(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }

    /// Report success.
    pub fn fulfill(self, result: impl Into<Value>) {
        self.complete(Ok(result.into()));
    }

    /// Report failure.
    pub fn fail(self, kind: ErrorKind, message: impl Into<String>) {
        self.complete(Err(BridgeError::new(kind, message)));
    }

    /// Report an outcome.
    pub fn complete(self, outcome: Result<Value>) {
        deliver(&self.slot, &self.request_id, &self.method, outcome);
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .finish()
    }
}

/// Deliver an outcome through a slot, at most once. Returns whether the
/// outcome reached a waiting caller.
pub(crate) fn deliver(
    slot: &CompletionSlot,
    request_id: &str,
    method: &str,
    outcome: Result<Value>,
) -> bool {
    let Some(sender) = slot.lock().take() else {
        tracing::debug!(request_id, method, "completion already reported; ignoring");
        return false;
    };
    if sender.send(outcome).is_err() {
        tracing::debug!(
            request_id,
            method,
            "caller no longer waiting; discarding late completion"
        );
        return false;
    }
    true
}
