//! Host side of the bridge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HostServer (axum, network threads)                         │
//! │  - Accepts the single active WebSocket link                 │
//! │  - Parses envelopes, hands requests to the dispatcher       │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatcher                                                 │
//! │  - Method check, registry lookup, parameter validation      │
//! │  - Posts the handler onto the execution context             │
//! │  - Enforces the overall deadline, builds the reply          │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ExecutionContext (one host thread, FIFO work queue)        │
//! │  - Runs every handler body, one at a time                   │
//! │  - Async handlers report through a CompletionHandle         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hostbridge_host::{Dispatcher, ExecutionContext, HostServer, OperationDefinition, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register(OperationDefinition::tool("echo", |params| Ok(params)))?;
//!
//! let (context, _thread) = ExecutionContext::spawn("host-main", 256)?;
//! let dispatcher = Dispatcher::new(Arc::new(registry), context, Duration::from_secs(10));
//! HostServer::new(dispatcher, host_config).run(shutdown_signal()).await?;
//! ```

pub mod completion;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod schema;
pub mod server;

pub use completion::CompletionHandle;
pub use context::{ContextRunner, ExecutionContext};
pub use dispatcher::{Dispatcher, PendingDispatch};
pub use error::{HostError, Result};
pub use registry::{Handler, Operation, OperationDefinition, OperationKind, Registry};
pub use schema::{ParameterValidationError, validate_params};
pub use server::{CLIENT_NAME_HEADER, ClientInfo, ConnectionId, HealthResponse, HostServer, HostState};
