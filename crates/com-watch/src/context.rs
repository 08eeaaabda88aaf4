//! Execution contexts for event delivery
//!
//! The thread that observes a device change is rarely the thread a
//! subscriber wants callbacks on. An [`ExecutionContext`] is captured once
//! when the watcher is built and every event is handed to it as a [`Job`].
//!
//! - [`TokioContext`] runs jobs on a task of a runtime
//! - [`ChannelContext`] queues jobs for a consumer that drains a
//!   [`ContextQueue`] on its own thread (a UI loop, for example)
//!
//! A watcher built without any context runs jobs inline on the detecting
//! thread.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::DispatchError;

/// Unit of work handed to an execution context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Destination for event delivery
pub trait ExecutionContext: Send + Sync {
    /// Arrange for `job` to run on this context
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;
}

/// Runs jobs on a task of a tokio runtime
///
/// Jobs run one after another in dispatch order. Once the runtime shuts
/// down the task is gone and dispatch fails with
/// [`DispatchError::ContextClosed`].
#[derive(Debug, Clone)]
pub struct TokioContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl TokioContext {
    /// Create a context for the given runtime
    pub fn new(handle: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    /// Capture the runtime the caller is running on, if any
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl ExecutionContext for TokioContext {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.tx.send(job).map_err(|_| DispatchError::ContextClosed)
    }
}

/// Create a queued context and the queue that runs its jobs
pub fn channel_context() -> (ChannelContext, ContextQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelContext { tx }, ContextQueue { rx })
}

/// Sends jobs to a [`ContextQueue`]
#[derive(Clone)]
pub struct ChannelContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl ExecutionContext for ChannelContext {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.tx.send(job).map_err(|_| DispatchError::ContextClosed)
    }
}

/// Consumer side of a [`ChannelContext`]
///
/// Dropping the queue closes the context; later dispatches fail with
/// [`DispatchError::ContextClosed`].
pub struct ContextQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl ContextQueue {
    /// Wait for the next job and run it; false once every sender is gone
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Blocking variant of [`run_next`](Self::run_next) for non-async threads
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_run_next(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run every job already queued, returning how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }
}

/// Resolved delivery strategy of a watcher
#[derive(Clone)]
pub(crate) enum Dispatcher {
    /// Run on the detecting thread
    Inline,
    /// Hand to a captured context
    Context(Arc<dyn ExecutionContext>),
}

impl Dispatcher {
    pub(crate) fn run(&self, job: Job) -> Result<(), DispatchError> {
        match self {
            Dispatcher::Inline => {
                job();
                Ok(())
            }
            Dispatcher::Context(context) => context.dispatch(job),
        }
    }

    pub(crate) fn is_inline(&self) -> bool {
        matches!(self, Dispatcher::Inline)
    }
}
