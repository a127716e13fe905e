//! Orchestrator side of the bridge.
//!
//! The [`Endpoint`] owns the WebSocket link to the host and reconnects
//! lazily on the next send. The [`Correlator`] gives every outbound call a
//! fresh id, tracks it in a pending table with its own timer, and resolves
//! it exactly once: by the matching reply, by its timeout, or by the link
//! going down. [`BridgeClient`] wraps both for callers that just want to
//! invoke operations.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostbridge_client::BridgeClient;
//! use serde_json::json;
//!
//! let client = BridgeClient::new(&config.client())?;
//! let result = client.call("echo", json!({"x": 1})).await?;
//! ```

pub mod client;
pub mod correlator;
pub mod endpoint;

pub use client::BridgeClient;
pub use correlator::{Correlator, PendingTable, ResponseHandle};
pub use endpoint::{ConnectionState, Endpoint, EndpointConfig, EndpointListener};
pub use hostbridge_types::{BridgeError, ErrorKind, Result};
