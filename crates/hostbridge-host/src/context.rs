//! The host's single execution context.
//!
//! Every handler body runs on one thread, one work item at a time, in the
//! order the items were posted. Producers (network tasks, or handlers
//! scheduling continuations) hold cloneable [`ExecutionContext`] handles; the
//! single consumer is a [`ContextRunner`] draining a bounded queue.
//!
//! An embedding host that owns its own main loop can call
//! [`ExecutionContext::new`] and drive the runner itself; everything else
//! uses [`ExecutionContext::spawn`] to get a dedicated thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use hostbridge_types::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkItem {
    label: String,
    job: Job,
}

/// Handle for posting work onto the execution context.
#[derive(Clone)]
pub struct ExecutionContext {
    name: Arc<str>,
    tx: mpsc::Sender<WorkItem>,
}

impl ExecutionContext {
    /// Create a context and the runner that drains it.
    ///
    /// `capacity` bounds the queue; posters wait (or `try_post` fails) while
    /// it is full.
    pub fn new(name: &str, capacity: usize) -> (Self, ContextRunner) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let name: Arc<str> = Arc::from(name);
        (
            Self {
                name: Arc::clone(&name),
                tx,
            },
            ContextRunner { name, rx },
        )
    }

    /// Create a context running on a dedicated, named thread.
    ///
    /// The thread exits once every `ExecutionContext` clone has been dropped
    /// and the queue is drained.
    pub fn spawn(name: &str, capacity: usize) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (context, runner) = Self::new(name, capacity);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner.run())?;
        Ok((context, thread))
    }

    /// Name of the context (and its thread, when spawned).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a work item, waiting for queue space.
    pub async fn post<F>(&self, label: impl Into<String>, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem {
            label: label.into(),
            job: Box::new(job),
        };
        self.tx
            .send(item)
            .await
            .map_err(|_| self.stopped_error())
    }

    /// Post a work item without waiting. Use this from code already running
    /// on the context (e.g. a handler scheduling its next step).
    pub fn try_post<F>(&self, label: impl Into<String>, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem {
            label: label.into(),
            job: Box::new(job),
        };
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::internal(format!(
                "execution context '{}' queue is full",
                self.name
            )),
            mpsc::error::TrySendError::Closed(_) => self.stopped_error(),
        })
    }

    /// Check whether the runner has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn stopped_error(&self) -> BridgeError {
        BridgeError::internal(format!("execution context '{}' is not running", self.name))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The single consumer of an execution context's queue.
pub struct ContextRunner {
    name: Arc<str>,
    rx: mpsc::Receiver<WorkItem>,
}

impl ContextRunner {
    /// Drain the queue on the current thread until every producer is gone.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run(mut self) {
        tracing::debug!(context = %self.name, "execution context started");
        while let Some(item) = self.rx.blocking_recv() {
            self.execute(item);
        }
        tracing::debug!(context = %self.name, "execution context stopped");
    }

    /// Run every item currently queued, then return. Returns the number of
    /// items run. For hosts that pump the context from their own frame loop.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(item) = self.rx.try_recv() {
            self.execute(item);
            count += 1;
        }
        count
    }

    fn execute(&self, item: WorkItem) {
        let WorkItem { label, job } = item;
        tracing::trace!(context = %self.name, work = %label, "running work item");
        // Jobs built by the dispatcher catch their own panics; this keeps the
        // context alive for anything else posted directly.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                context = %self.name,
                work = %label,
                panic = %panic_message(payload.as_ref()),
                "work item panicked"
            );
        }
    }
}

/// Extract the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
