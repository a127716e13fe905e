//! Operation registry.
//!
//! An [`OperationDefinition`] describes one callable tool or readable
//! resource: its name, kind, parameter schema and handler. The [`Registry`]
//! is filled once at startup through explicit [`Registry::register`] calls
//! and is then shared read-only (behind an `Arc`) with the dispatcher.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostbridge_host::{CompletionHandle, OperationDefinition, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     OperationDefinition::tool("echo", |params| Ok(params))
//!         .with_description("Return the parameters unchanged"),
//! )?;
//! registry.register(OperationDefinition::async_tool(
//!     "run_tests",
//!     |params, completion: CompletionHandle| start_test_run(params, completion),
//! ))?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use hostbridge_types::{BridgeError, Result};

use crate::completion::CompletionHandle;

/// Whether an operation is a tool (acts) or a resource (reads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A callable tool.
    Tool,
    /// A read-only resource query.
    Resource,
}

impl OperationKind {
    /// The business-failure error for this kind: `tool_execution` for tools,
    /// `resource_fetch` for resources.
    pub fn failure(&self, message: impl Into<String>) -> BridgeError {
        match self {
            Self::Tool => BridgeError::tool_execution(message),
            Self::Resource => BridgeError::resource_fetch(message),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool => write!(f, "tool"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// Handler returning its result immediately.
pub type SyncHandlerFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Handler reporting its result later through a [`CompletionHandle`].
pub type AsyncHandlerFn = dyn Fn(Value, CompletionHandle) + Send + Sync;

/// The two handler shapes.
#[derive(Clone)]
pub enum Handler {
    /// Result is available when the handler returns.
    Sync(Arc<SyncHandlerFn>),
    /// Handler returns at once; the result arrives through the completion
    /// handle.
    Async(Arc<AsyncHandlerFn>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Handler::Sync"),
            Self::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Trait for operations implemented as types rather than closures.
///
/// Implement [`Operation::execute`] for a synchronous operation, or set
/// [`Operation::is_asynchronous`] and implement
/// [`Operation::execute_async`] for one that completes later.
pub trait Operation: Send + Sync {
    /// Unique name (the wire `method`).
    fn name(&self) -> &str;

    /// Tool or resource.
    fn kind(&self) -> OperationKind {
        OperationKind::Tool
    }

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema describing accepted parameters.
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    /// Whether the result arrives through a completion handle.
    fn is_asynchronous(&self) -> bool {
        false
    }

    /// Synchronous execution.
    fn execute(&self, _params: Value) -> Result<Value> {
        Err(BridgeError::internal(format!(
            "operation '{}' has no synchronous implementation",
            self.name()
        )))
    }

    /// Asynchronous execution. The default runs [`Operation::execute`] and
    /// completes immediately.
    fn execute_async(&self, params: Value, completion: CompletionHandle) {
        completion.complete(self.execute(params));
    }
}

/// Immutable descriptor of a registered operation.
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    name: String,
    kind: OperationKind,
    description: String,
    parameter_schema: Value,
    handler: Handler,
}

impl OperationDefinition {
    /// Create a definition from its parts.
    pub fn new(name: impl Into<String>, kind: OperationKind, handler: Handler) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            parameter_schema: json!({"type": "object"}),
            handler,
        }
    }

    /// A synchronous tool.
    pub fn tool<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, OperationKind::Tool, Handler::Sync(Arc::new(handler)))
    }

    /// An asynchronous tool.
    pub fn async_tool<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, CompletionHandle) + Send + Sync + 'static,
    {
        Self::new(name, OperationKind::Tool, Handler::Async(Arc::new(handler)))
    }

    /// A synchronous resource.
    pub fn resource<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, OperationKind::Resource, Handler::Sync(Arc::new(handler)))
    }

    /// An asynchronous resource.
    pub fn async_resource<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, CompletionHandle) + Send + Sync + 'static,
    {
        Self::new(
            name,
            OperationKind::Resource,
            Handler::Async(Arc::new(handler)),
        )
    }

    /// Build a definition from an [`Operation`] implementation. Metadata is
    /// read once, here.
    pub fn from_operation<O: Operation + 'static>(operation: O) -> Self {
        let operation = Arc::new(operation);
        let handler = if operation.is_asynchronous() {
            let op = Arc::clone(&operation);
            Handler::Async(Arc::new(move |params, completion| {
                op.execute_async(params, completion)
            }))
        } else {
            let op = Arc::clone(&operation);
            Handler::Sync(Arc::new(move |params| op.execute(params)))
        };

        Self {
            name: operation.name().to_string(),
            kind: operation.kind(),
            description: operation.description().to_string(),
            parameter_schema: operation.parameters(),
            handler,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the parameter schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = schema;
        self
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool or resource.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter schema.
    pub fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    /// Whether the handler completes through a completion handle.
    pub fn is_asynchronous(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }

    /// The handler.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// JSON descriptor for discovery and documentation.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "kind": self.kind,
            "description": self.description,
            "inputSchema": self.parameter_schema,
            "async": self.is_asynchronous(),
        })
    }
}

/// Name-keyed store of operation definitions.
#[derive(Default, Clone)]
pub struct Registry {
    operations: HashMap<String, Arc<OperationDefinition>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Register an operation.
    ///
    /// Fails with `validation` if the name is empty or already taken; the
    /// existing definition stays active.
    pub fn register(&mut self, definition: OperationDefinition) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(BridgeError::validation("operation name must not be empty"));
        }
        if self.operations.contains_key(&definition.name) {
            return Err(BridgeError::validation(format!(
                "operation '{}' is already registered",
                definition.name
            )));
        }

        tracing::debug!(
            operation = %definition.name,
            kind = %definition.kind,
            asynchronous = definition.is_asynchronous(),
            "registered operation"
        );
        self.operations
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Register an [`Operation`] implementation.
    pub fn register_operation<O: Operation + 'static>(&mut self, operation: O) -> Result<()> {
        self.register(OperationDefinition::from_operation(operation))
    }

    /// Look up an operation by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<OperationDefinition>> {
        self.operations.get(name).cloned()
    }

    /// Check if an operation exists.
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// All operations, ordered by name.
    pub fn list_all(&self) -> Vec<Arc<OperationDefinition>> {
        let mut all: Vec<_> = self.operations.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All operation names, ordered.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors of all operations, ordered by name.
    pub fn describe(&self) -> Vec<Value> {
        self.list_all().iter().map(|op| op.describe()).collect()
    }

    /// Get the number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("operations", &self.names())
            .finish()
    }
}
