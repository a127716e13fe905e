//! Built-in operations served by `hostbridge serve`.
//!
//! Real hosts plug their own tools and resources into the registry; these
//! exercise every handler shape end to end.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::runtime::Handle;

use hostbridge_host::{CompletionHandle, Operation, OperationKind, Registry};
use hostbridge_types::{BridgeError, OperationResult, Result};

/// Build the registry of built-in operations.
///
/// `runtime` runs the timers of asynchronous operations.
pub fn registry(runtime: Handle) -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register_operation(Echo)?;
    registry.register_operation(Add)?;
    registry.register_operation(DelayedEcho { runtime })?;
    registry.register_operation(ServerInfo)?;
    Ok(registry)
}

/// Returns its parameters unchanged.
struct Echo;

impl Operation for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the parameters unchanged"
    }

    fn execute(&self, params: Value) -> Result<Value> {
        Ok(params)
    }
}

/// Adds two numbers.
struct Add;

impl Operation for Add {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "description": "First operand"},
                "b": {"type": "number", "description": "Second operand"}
            },
            "required": ["a", "b"]
        })
    }

    fn execute(&self, params: Value) -> Result<Value> {
        let a = number(&params, "a")?;
        let b = number(&params, "b")?;
        let sum = a + b;
        if !sum.is_finite() {
            return Err(self.kind().failure(format!("{} + {} is not finite", a, b)));
        }
        Ok(OperationResult::success(format!("{} + {} = {}", a, b, sum))
            .with_field("sum", sum)
            .into_value())
    }
}

fn number(params: &Value, name: &str) -> Result<f64> {
    params
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| BridgeError::validation(format!("'{}' must be a number", name)))
}

/// Echoes a message after a delay without blocking the host thread.
///
/// The handler returns at once; a timer on the runtime posts the second step
/// back onto the execution context, which completes the call.
struct DelayedEcho {
    runtime: Handle,
}

impl Operation for DelayedEcho {
    fn name(&self) -> &str {
        "delayed_echo"
    }

    fn description(&self) -> &str {
        "Return the message after delay_ms milliseconds"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "delay_ms": {"type": "integer"}
            },
            "required": ["message"]
        })
    }

    fn is_asynchronous(&self) -> bool {
        true
    }

    fn execute_async(&self, params: Value, completion: CompletionHandle) {
        let message = params["message"].as_str().unwrap_or_default().to_string();
        let delay = Duration::from_millis(params["delay_ms"].as_u64().unwrap_or(1000));
        let context = completion.context().clone();

        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if completion.is_abandoned() {
                tracing::debug!(request_id = %completion.request_id(), "delayed_echo abandoned");
                return;
            }
            let posted = context
                .post("delayed_echo: complete", move || {
                    completion.fulfill(
                        OperationResult::success(message)
                            .with_field("delay_ms", delay.as_millis() as u64)
                            .into_value(),
                    );
                })
                .await;
            if let Err(e) = posted {
                tracing::warn!(error = %e, "delayed_echo could not schedule its completion");
            }
        });
    }
}

/// Describes the running host.
struct ServerInfo;

impl Operation for ServerInfo {
    fn name(&self) -> &str {
        "server_info"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Resource
    }

    fn description(&self) -> &str {
        "Name, version and process of the running host"
    }

    fn execute(&self, _params: Value) -> Result<Value> {
        let thread = std::thread::current();
        Ok(OperationResult::ok()
            .with_field("name", "hostbridge")
            .with_field("version", env!("CARGO_PKG_VERSION"))
            .with_field("pid", std::process::id())
            .with_field("thread", thread.name().unwrap_or("unnamed"))
            .into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hostbridge_host::{Dispatcher, ExecutionContext};
    use hostbridge_types::{ErrorKind, Request};

    fn dispatcher() -> Dispatcher {
        let registry = registry(Handle::current()).unwrap();
        let (context, _thread) = ExecutionContext::spawn("ops-test", 16).unwrap();
        Dispatcher::new(Arc::new(registry), context, Duration::from_secs(5))
    }

    async fn call(dispatcher: &Dispatcher, method: &str, params: Value) -> Result<Value> {
        dispatcher
            .dispatch(Request::new("t", method, params))
            .await
            .into_outcome()
    }

    #[tokio::test]
    async fn test_registry_contents() {
        let registry = registry(Handle::current()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["add", "delayed_echo", "echo", "server_info"]
        );
        assert!(registry.lookup("delayed_echo").unwrap().is_asynchronous());
        assert_eq!(
            registry.lookup("server_info").unwrap().kind(),
            OperationKind::Resource
        );
    }

    #[tokio::test]
    async fn test_echo() {
        let dispatcher = dispatcher();
        let result = call(&dispatcher, "echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_add() {
        let dispatcher = dispatcher();
        let result = call(&dispatcher, "add", json!({"a": 2, "b": 3.5}))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["sum"], 5.5);
    }

    #[tokio::test]
    async fn test_add_requires_both_operands() {
        let dispatcher = dispatcher();
        let err = call(&dispatcher, "add", json!({"a": 2})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = call(&dispatcher, "add", json!({"a": 2, "b": "3"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delayed_echo_completes_through_continuation() {
        let dispatcher = dispatcher();
        let result = call(
            &dispatcher,
            "delayed_echo",
            json!({"message": "hello", "delay_ms": 50}),
        )
        .await
        .unwrap();
        assert_eq!(result["message"], "hello");
        assert_eq!(result["delay_ms"], 50);
    }

    #[tokio::test]
    async fn test_server_info_runs_on_host_thread() {
        let dispatcher = dispatcher();
        let result = call(&dispatcher, "server_info", json!({})).await.unwrap();
        assert_eq!(result["name"], "hostbridge");
        assert_eq!(result["thread"], "ops-test");
    }
}
