//! Shared types for the host bridge.
//!
//! Both sides of the bridge speak the same vocabulary:
//!
//! - [`ErrorKind`] / [`BridgeError`] - the closed failure taxonomy. Nothing
//!   else ever crosses the wire as an error.
//! - [`Envelope`] - the request/response/error message unit, one per
//!   WebSocket text frame.
//! - [`OperationResult`] - the `{success, message, ...}` shape handlers
//!   produce.

pub mod envelope;
pub mod error;
pub mod result;

pub use envelope::{Envelope, Failure, Request, Response, WireError};
pub use error::{BridgeError, ErrorKind, Result};
pub use result::OperationResult;
