//! High-level client for invoking host operations.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use hostbridge_config::ClientConfig;
use hostbridge_types::Result;

use crate::correlator::{Correlator, ResponseHandle};
use crate::endpoint::{ConnectionState, EndpointConfig};

/// Orchestrator-side client.
///
/// Connects lazily: the first call opens the link, and a call made after the
/// link dropped reopens it.
#[derive(Debug)]
pub struct BridgeClient {
    correlator: Correlator,
}

impl BridgeClient {
    /// Create a client from the `[client]` configuration section.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = EndpointConfig::from_client_config(config)?;
        Ok(Self::with_timeout(endpoint, config.request_timeout()))
    }

    /// Create a client with an explicit default request timeout.
    pub fn with_timeout(endpoint: EndpointConfig, request_timeout: Duration) -> Self {
        Self {
            correlator: Correlator::new(endpoint, request_timeout),
        }
    }

    /// Open the link now rather than on the first call.
    pub async fn connect(&self) -> Result<()> {
        self.correlator.endpoint().connect().await.map(|_| ())
    }

    /// Close the link. Outstanding calls fail with `connection`.
    pub fn disconnect(&self) {
        self.correlator.disconnect();
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        self.correlator.endpoint().state()
    }

    /// Watch link state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.correlator.endpoint().subscribe_state()
    }

    /// Number of calls awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending().len()
    }

    /// Call an operation with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.correlator.issue(method, params, None).await
    }

    /// Call an operation with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.correlator.issue(method, params, Some(timeout)).await
    }

    /// Send a call without waiting for it.
    pub async fn start_call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle> {
        self.correlator.send_request(method, params, timeout).await
    }

    /// The underlying correlator.
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }
}
