//! Host dispatcher.
//!
//! Turns an inbound request into a reply envelope:
//!
//! 1. the method must be non-empty and registered (`validation` otherwise),
//! 2. parameters are checked against the operation's schema,
//! 3. the handler is posted onto the [`ExecutionContext`] and the reply waits
//!    for its outcome, bounded by the dispatcher's deadline.
//!
//! Submission and waiting are split ([`Dispatcher::submit`] /
//! [`PendingDispatch::wait`]) so a connection can post calls in arrival
//! order from its receive loop while the waits run concurrently.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use hostbridge_types::{BridgeError, Envelope, Request, Result};

use crate::completion::{CompletionHandle, CompletionSlot, deliver};
use crate::context::{ExecutionContext, panic_message};
use crate::registry::{Handler, OperationDefinition, Registry};
use crate::schema::validate_params;

/// Executes inbound calls on the host's execution context.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    context: ExecutionContext,
    timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher. `timeout` bounds each call from submission to
    /// reply, including time spent queued.
    pub fn new(registry: Arc<Registry>, context: ExecutionContext, timeout: Duration) -> Self {
        Self {
            registry,
            context,
            timeout,
        }
    }

    /// The registry calls are resolved against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The execution context handlers run on.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dispatch a request and wait for its reply.
    pub async fn dispatch(&self, request: Request) -> Envelope {
        self.submit(request).await.wait().await
    }

    /// Validate a request and post its handler onto the execution context.
    ///
    /// Returns once the work item is queued (or the request was rejected);
    /// the reply is obtained from the returned [`PendingDispatch`].
    pub async fn submit(&self, request: Request) -> PendingDispatch {
        let deadline = Instant::now() + self.timeout;
        let Request { id, method, params } = request;

        let definition = match self.resolve(&method, &params) {
            Ok(definition) => definition,
            Err(err) => {
                tracing::debug!(request_id = %id, method = %method, error = %err, "rejected request");
                return PendingDispatch::ready(id, method, Err(err));
            }
        };

        let (tx, rx) = oneshot::channel();
        let slot: CompletionSlot = Arc::new(Mutex::new(Some(tx)));
        let job = self.build_job(&id, &definition, params, slot);

        let label = format!("{} ({})", method, id);
        let posted = tokio::time::timeout_at(deadline, self.context.post(label, job)).await;
        match posted {
            Ok(Ok(())) => {
                tracing::debug!(request_id = %id, method = %method, "request queued");
                PendingDispatch {
                    id,
                    method,
                    timeout: self.timeout,
                    state: PendingState::Waiting { rx, deadline },
                }
            }
            Ok(Err(err)) => {
                tracing::error!(request_id = %id, method = %method, error = %err, "failed to queue request");
                PendingDispatch::ready(id, method, Err(err))
            }
            Err(_) => {
                let err = timeout_error(&method, self.timeout);
                tracing::warn!(request_id = %id, method = %method, "timed out waiting for queue space");
                PendingDispatch::ready(id, method, Err(err))
            }
        }
    }

    fn resolve(&self, method: &str, params: &Value) -> Result<Arc<OperationDefinition>> {
        if method.trim().is_empty() {
            return Err(BridgeError::validation("missing method"));
        }
        let definition = self
            .registry
            .lookup(method)
            .ok_or_else(|| BridgeError::validation(format!("unknown method '{}'", method)))?;
        validate_params(definition.parameter_schema(), params)?;
        Ok(definition)
    }

    fn build_job(
        &self,
        id: &str,
        definition: &Arc<OperationDefinition>,
        params: Value,
        slot: CompletionSlot,
    ) -> impl FnOnce() + Send + 'static {
        let id = id.to_string();
        let method = definition.name().to_string();
        let handler = definition.handler().clone();
        let context = self.context.clone();

        move || match handler {
            Handler::Sync(f) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| f(params)))
                    .unwrap_or_else(|payload| Err(panic_error(&id, &method, payload.as_ref())));
                deliver(&slot, &id, &method, outcome);
            }
            Handler::Async(f) => {
                let completion =
                    CompletionHandle::new(id.clone(), method.clone(), Arc::clone(&slot), context);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(params, completion))) {
                    let err = panic_error(&id, &method, payload.as_ref());
                    deliver(&slot, &id, &method, Err(err));
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A submitted call whose reply has not been collected yet.
pub struct PendingDispatch {
    id: String,
    method: String,
    timeout: Duration,
    state: PendingState,
}

enum PendingState {
    Ready(Result<Value>),
    Waiting {
        rx: oneshot::Receiver<Result<Value>>,
        deadline: Instant,
    },
}

impl PendingDispatch {
    fn ready(id: String, method: String, outcome: Result<Value>) -> Self {
        Self {
            id,
            method,
            timeout: Duration::ZERO,
            state: PendingState::Ready(outcome),
        }
    }

    /// Id of the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the handler's outcome (or the deadline) and build the reply.
    pub async fn wait(self) -> Envelope {
        let Self {
            id,
            method,
            timeout,
            state,
        } = self;

        let outcome = match state {
            PendingState::Ready(outcome) => outcome,
            PendingState::Waiting { rx, deadline } => {
                match tokio::time::timeout_at(deadline, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => {
                        tracing::error!(
                            request_id = %id,
                            method = %method,
                            "handler finished without reporting a result"
                        );
                        Err(BridgeError::internal(format!(
                            "operation '{}' finished without reporting a result",
                            method
                        )))
                    }
                    Err(_) => {
                        tracing::warn!(
                            request_id = %id,
                            method = %method,
                            timeout_ms = timeout.as_millis() as u64,
                            "request timed out"
                        );
                        Err(timeout_error(&method, timeout))
                    }
                }
            }
        };

        if let Err(err) = &outcome {
            tracing::debug!(request_id = %id, method = %method, error = %err, "request failed");
        }
        Envelope::reply(id, outcome)
    }
}

fn timeout_error(method: &str, timeout: Duration) -> BridgeError {
    BridgeError::timeout(format!(
        "operation '{}' did not complete within {} ms",
        method,
        timeout.as_millis()
    ))
}

fn panic_error(id: &str, method: &str, payload: &(dyn std::any::Any + Send)) -> BridgeError {
    let message = panic_message(payload);
    tracing::error!(request_id = %id, method = %method, panic = %message, "handler panicked");
    BridgeError::wrap_internal(format!("operation '{}' failed unexpectedly", method), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_types::ErrorKind;
    use serde_json::json;
    use std::time::Instant as StdInstant;

    fn dispatcher_with(ops: Vec<OperationDefinition>, timeout: Duration) -> Dispatcher {
        let mut registry = Registry::new();
        for op in ops {
            registry.register(op).unwrap();
        }
        let (context, _thread) = ExecutionContext::spawn("dispatch-test", 64).unwrap();
        Dispatcher::new(Arc::new(registry), context, timeout)
    }

    fn request(id: &str, method: &str, params: Value) -> Request {
        Request::new(id, method, params)
    }

    fn expect_error(reply: Envelope) -> BridgeError {
        reply.into_outcome().expect_err("expected an error reply")
    }

    #[tokio::test]
    async fn test_round_trip_echoes_id() {
        let dispatcher = dispatcher_with(
            vec![OperationDefinition::tool("echo", Ok)],
            Duration::from_secs(5),
        );
        let reply = dispatcher
            .dispatch(request("req-42", "echo", json!({"x": 1})))
            .await;

        assert_eq!(reply.id(), "req-42");
        assert_eq!(reply.into_outcome().unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_missing_method() {
        let dispatcher = dispatcher_with(vec![], Duration::from_secs(5));
        let reply = dispatcher.dispatch(request("1", "", json!({}))).await;
        assert_eq!(reply.id(), "1");
        assert_eq!(expect_error(reply).kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dispatcher = dispatcher_with(vec![], Duration::from_secs(5));
        let reply = dispatcher.dispatch(request("2", "nope", json!({}))).await;
        assert_eq!(reply.id(), "2");
        let err = expect_error(reply);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("unknown method 'nope'"));
    }

    #[tokio::test]
    async fn test_schema_rejection_never_runs_handler() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let op = OperationDefinition::tool("execute_menu_item", move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(json!({"success": true}))
        })
        .with_schema(json!({
            "type": "object",
            "properties": {"menuPath": {"type": "string"}},
            "required": ["menuPath"]
        }));
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));

        let err = expect_error(
            dispatcher
                .dispatch(request("3", "execute_menu_item", json!({})))
                .await,
        );
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.details.is_some());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_business_failure_passes_through() {
        let op = OperationDefinition::resource("get_logs", |_| {
            Err(BridgeError::resource_fetch("log buffer unavailable"))
        });
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));
        let err = expect_error(dispatcher.dispatch(request("4", "get_logs", json!({}))).await);
        assert_eq!(err.kind, ErrorKind::ResourceFetch);
        assert_eq!(err.message, "log buffer unavailable");
    }

    #[tokio::test]
    async fn test_sync_panic_becomes_internal() {
        let op = OperationDefinition::tool("explode", |_| panic!("index out of range"));
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));

        let err = expect_error(dispatcher.dispatch(request("5", "explode", json!({}))).await);
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.details, Some(json!("index out of range")));

        // The context keeps serving after a panic.
        let dispatcher = Dispatcher::new(
            Arc::clone(dispatcher.registry()),
            dispatcher.context().clone(),
            Duration::from_secs(5),
        );
        let err = expect_error(dispatcher.dispatch(request("6", "explode", json!({}))).await);
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_async_panic_becomes_internal() {
        let op = OperationDefinition::async_tool("explode_later", |_, _completion| {
            panic!("lost the handle")
        });
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));
        let err = expect_error(
            dispatcher
                .dispatch(request("7", "explode_later", json!({})))
                .await,
        );
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.details, Some(json!("lost the handle")));
    }

    #[tokio::test]
    async fn test_async_completion_from_continuation() {
        let op = OperationDefinition::async_tool("build", |params, completion| {
            let context = completion.context().clone();
            context
                .try_post("build step 2", move || {
                    completion.fulfill(json!({"success": true, "target": params["target"]}));
                })
                .unwrap();
        });
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));
        let reply = dispatcher
            .dispatch(request("8", "build", json!({"target": "linux"})))
            .await;
        assert_eq!(
            reply.into_outcome().unwrap(),
            json!({"success": true, "target": "linux"})
        );
    }

    #[tokio::test]
    async fn test_async_completion_from_other_thread() {
        let op = OperationDefinition::async_tool("import_package", |_, completion| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                completion.fail(ErrorKind::ToolExecution, "package not found");
            });
        });
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));
        let err = expect_error(
            dispatcher
                .dispatch(request("9", "import_package", json!({})))
                .await,
        );
        assert_eq!(err.kind, ErrorKind::ToolExecution);
    }

    #[tokio::test]
    async fn test_dropped_handle_becomes_internal() {
        let op = OperationDefinition::async_tool("forgetful", |_, completion| drop(completion));
        let dispatcher = dispatcher_with(vec![op], Duration::from_secs(5));
        let err = expect_error(dispatcher.dispatch(request("10", "forgetful", json!({}))).await);
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_never_completing_handler_times_out_and_late_result_is_discarded() {
        let parked: Arc<Mutex<Option<CompletionHandle>>> = Arc::new(Mutex::new(None));
        let stash = Arc::clone(&parked);
        let op = OperationDefinition::async_tool("hang", move |_, completion| {
            *stash.lock() = Some(completion);
        });
        let dispatcher = dispatcher_with(vec![op], Duration::from_millis(200));

        let started = StdInstant::now();
        let reply = dispatcher.dispatch(request("11", "hang", json!({}))).await;
        let elapsed = started.elapsed();

        assert_eq!(reply.id(), "11");
        assert_eq!(expect_error(reply).kind, ErrorKind::Timeout);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(3));

        let completion = parked.lock().take().expect("handler ran");
        assert!(completion.is_abandoned());
        completion.fulfill(json!({"success": true}));
    }

    #[tokio::test]
    async fn test_fifo_execution() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = Arc::clone(&log);
        let slow = OperationDefinition::tool("slow", move |_| {
            slow_log.lock().push("A start");
            std::thread::sleep(Duration::from_millis(150));
            slow_log.lock().push("A end");
            Ok(json!({"success": true}))
        });
        let fast_log = Arc::clone(&log);
        let fast = OperationDefinition::tool("fast", move |_| {
            fast_log.lock().push("B start");
            Ok(json!({"success": true}))
        });
        let dispatcher = dispatcher_with(vec![slow, fast], Duration::from_secs(5));

        let a = dispatcher.submit(request("a", "slow", json!({}))).await;
        let b = dispatcher.submit(request("b", "fast", json!({}))).await;
        let (ra, rb) = tokio::join!(a.wait(), b.wait());
        assert!(ra.into_outcome().is_ok());
        assert!(rb.into_outcome().is_ok());

        assert_eq!(*log.lock(), vec!["A start", "A end", "B start"]);
    }

    #[tokio::test]
    async fn test_queued_call_counts_against_deadline() {
        let blocker = OperationDefinition::tool("blocker", |_| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(json!({}))
        });
        let dispatcher = dispatcher_with(
            vec![blocker, OperationDefinition::tool("echo", Ok)],
            Duration::from_millis(150),
        );

        let first = dispatcher.submit(request("x", "blocker", json!({}))).await;
        let second = dispatcher.submit(request("y", "echo", json!({}))).await;
        let (r1, r2) = tokio::join!(first.wait(), second.wait());
        assert_eq!(expect_error(r1).kind, ErrorKind::Timeout);
        assert_eq!(expect_error(r2).kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_stopped_context_is_internal() {
        let mut registry = Registry::new();
        registry
            .register(OperationDefinition::tool("echo", Ok))
            .unwrap();
        let (context, runner) = ExecutionContext::new("stopped", 4);
        drop(runner);
        let dispatcher = Dispatcher::new(Arc::new(registry), context, Duration::from_secs(1));

        let err = expect_error(dispatcher.dispatch(request("z", "echo", json!({}))).await);
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
