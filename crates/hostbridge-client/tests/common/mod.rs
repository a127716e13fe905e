//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use hostbridge_client::{BridgeClient, EndpointConfig};
use hostbridge_config::HostConfig;
use hostbridge_host::{
    ClientInfo, CompletionHandle, Dispatcher, ExecutionContext, HostServer, HostState,
    OperationDefinition, Registry,
};
use hostbridge_types::BridgeError;

/// A host listener running in the background on an ephemeral port.
pub struct TestHost {
    /// The listener's address.
    pub addr: SocketAddr,
    state: HostState,
    parked: Arc<Mutex<Vec<CompletionHandle>>>,
    released: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestHost {
    /// Start a host with a generous dispatcher timeout.
    pub async fn start() -> Result<Self> {
        Self::start_with_timeout(Duration::from_secs(10)).await
    }

    /// Start a host whose dispatcher gives up after `timeout`.
    pub async fn start_with_timeout(timeout: Duration) -> Result<Self> {
        Self::start_with(timeout, 64).await
    }

    /// Start a host with the given dispatcher timeout and work queue size.
    pub async fn start_with(timeout: Duration, queue_capacity: usize) -> Result<Self> {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));
        let registry = test_registry(Arc::clone(&parked), Arc::clone(&released))?;

        let (context, _thread) = ExecutionContext::spawn("test-host", queue_capacity)?;
        let dispatcher = Dispatcher::new(Arc::new(registry), context, timeout);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = HostServer::new(dispatcher, HostConfig::default());
        let state = server.state().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            addr,
            state,
            parked,
            released,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    /// WebSocket URL of the bridge endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/bridge", self.addr)
    }

    /// Endpoint settings pointing at this host.
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig::new(&self.url())
            .expect("valid test URL")
            .with_connect_timeout(Duration::from_secs(2))
    }

    /// A client for this host with a 5 s default timeout.
    pub fn client(&self) -> BridgeClient {
        BridgeClient::with_timeout(self.endpoint_config(), Duration::from_secs(5))
    }

    /// Listener state (active connection diagnostics).
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Number of `hang` calls whose completion handles are being held.
    pub fn parked(&self) -> usize {
        self.parked.lock().len()
    }

    /// Wait until `n` `hang` calls have reached their handler.
    pub async fn wait_for_parked(&self, n: usize) -> Result<()> {
        wait_until(|| self.parked() >= n)
            .await
            .with_context(|| format!("expected {} parked calls, saw {}", n, self.parked()))
    }

    /// Wait until an orchestrator link is active and return its diagnostics.
    pub async fn wait_for_client(&self) -> Result<ClientInfo> {
        wait_until(|| self.state.active_client().is_some())
            .await
            .context("no orchestrator connected")?;
        self.state
            .active_client()
            .context("orchestrator disconnected again")
    }

    /// Let every `stall` call return.
    pub fn release_stalled(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Shut the listener down, closing the active link.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .context("host did not stop")??;
        Ok(())
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.release_stalled();
    }
}

/// Poll `condition` for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("condition not met in time")
}

/// Operations exposed by the test host:
///
/// - `echo`: returns its params
/// - `delayed_echo`: returns its params after `delay_ms`, off the host thread
/// - `hang`: never completes; the handle is parked
/// - `stall`: blocks the host thread until released
/// - `done` / `nothing`: succeed with a `null` result (async / sync)
/// - `fail`: reports a tool failure
/// - `server_info`: a resource
fn test_registry(
    parked: Arc<Mutex<Vec<CompletionHandle>>>,
    released: Arc<AtomicBool>,
) -> Result<Registry> {
    let mut registry = Registry::new();

    registry.register(OperationDefinition::tool("echo", Ok))?;

    registry.register(OperationDefinition::async_tool("done", |_params, completion| {
        completion.fulfill(())
    }))?;

    registry.register(OperationDefinition::tool("nothing", |_| Ok(Value::Null)))?;

    registry.register(OperationDefinition::tool("stall", move |_| {
        while !released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(json!({"stalled": true}))
    }))?;

    registry.register(
        OperationDefinition::async_tool("delayed_echo", |params: Value, completion| {
            let delay = params["delay_ms"].as_u64().unwrap_or(0);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                completion.fulfill(params);
            });
        })
        .with_schema(json!({
            "type": "object",
            "properties": {"delay_ms": {"type": "integer"}},
            "required": ["delay_ms"]
        })),
    )?;

    registry.register(OperationDefinition::async_tool(
        "hang",
        move |_params, completion| parked.lock().push(completion),
    ))?;

    registry.register(OperationDefinition::tool("fail", |_| {
        Err(BridgeError::tool_execution("menu item not found"))
    }))?;

    registry.register(OperationDefinition::resource("server_info", |_| {
        Ok(json!({"success": true, "name": "test-host"}))
    }))?;

    Ok(registry)
}
