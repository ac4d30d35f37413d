//! Owner-thread marshaling.
//!
//! Only the thread holding `&mut AccessibleTree` may run handlers or mutate
//! the tree. Everything else reaches it through an [`OwnerQueue`].
//!
//! # Architecture
//!
//! ```text
//! dispatch tasks                          owner thread
//! ┌───────────────────┐   OwnerTask     ┌──────────────────────────┐
//! │ InboundDispatcher ├────────────────►│ OwnerContext             │
//! │                   │                 │  → CallExecutor::execute │
//! │   await oneshot   │◄────────────────┤  → handlers::handle      │
//! └───────────────────┘     reply       └──────────────────────────┘
//! ```
//!
//! The owner thread drives the queue one of two ways:
//!
//! | Method | Use |
//! |--------|-----|
//! | [`OwnerContext::pump`] | From the application's own UI loop, non-blocking |
//! | [`OwnerContext::spawn`] | On a dedicated thread that owns the tree |

// ============================================================================
// Imports
// ============================================================================

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BusName, NodeId, ObjectPath};
use crate::protocol::WireValue;
use crate::registry::ObjectPathRegistry;
use crate::transport::CancelFlag;
use crate::tree::{AccessibleTree, StateFlag};

use super::handlers::{self, HandlerContext, TreeEffect};
use super::request::MethodRequest;

// ============================================================================
// Types
// ============================================================================

/// Closure run on the owner thread with the tree.
pub type TreeJob = Box<dyn FnOnce(&mut AccessibleTree) + Send>;

// ============================================================================
// OwnerTask
// ============================================================================

/// A parsed call waiting for the owner thread.
pub(crate) struct QueuedCall {
    pub(crate) node: NodeId,
    pub(crate) path: ObjectPath,
    pub(crate) request: MethodRequest,
    pub(crate) cancel: CancelFlag,
    pub(crate) reply: oneshot::Sender<Result<WireValue>>,
}

/// Work for the owner thread.
pub(crate) enum OwnerTask {
    /// Execute an inbound call.
    Call(QueuedCall),
    /// Run an application closure.
    Apply(TreeJob),
    /// Stop a blocking owner loop.
    Shutdown,
}

// ============================================================================
// OwnerQueue
// ============================================================================

/// Sending side of the owner queue. Cheap to clone.
#[derive(Clone)]
pub struct OwnerQueue {
    tx: mpsc::UnboundedSender<OwnerTask>,
}

impl std::fmt::Debug for OwnerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl OwnerQueue {
    pub(crate) fn send(&self, task: OwnerTask) -> Result<()> {
        self.tx.send(task).map_err(|_| Error::Disconnected)
    }

    /// Queues a closure to run on the owner thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the owner context is gone.
    pub fn apply(&self, job: impl FnOnce(&mut AccessibleTree) + Send + 'static) -> Result<()> {
        self.send(OwnerTask::Apply(Box::new(job)))
    }

    /// Returns `true` if the owner context is gone.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a connected queue and receiver.
pub(crate) fn channel() -> (OwnerQueue, mpsc::UnboundedReceiver<OwnerTask>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OwnerQueue { tx }, rx)
}

// ============================================================================
// CallExecutor
// ============================================================================

/// Runs queued calls against the tree.
#[derive(Clone)]
pub(crate) struct CallExecutor {
    registry: Arc<ObjectPathRegistry>,
    identity: BusName,
}

impl CallExecutor {
    pub(crate) fn new(registry: Arc<ObjectPathRegistry>, identity: BusName) -> Self {
        Self { registry, identity }
    }

    /// Executes one call and sends its reply.
    pub(crate) fn execute(&self, tree: &mut AccessibleTree, call: QueuedCall) {
        let QueuedCall {
            node,
            path,
            request,
            cancel,
            reply,
        } = call;

        if cancel.load(Ordering::SeqCst) || reply.is_closed() {
            trace!(%path, "Call cancelled before execution");
            return;
        }

        // The node may have been unregistered since the dispatch side resolved it
        let snapshot = self.registry.snapshot();
        if snapshot.resolve(&path).ok() != Some(node) || !tree.contains(node) {
            debug!(%path, "Target gone before execution");
            let _ = reply.send(Err(Error::not_found(&path)));
            return;
        }

        let ctx = HandlerContext {
            snapshot: &snapshot,
            identity: &self.identity,
        };
        let result = handlers::handle(tree, node, &request, &ctx).map(|outcome| {
            if let Some(effect) = outcome.effect {
                self.apply_effect(tree, node, effect);
            }
            outcome.value
        });

        if reply.send(result).is_err() {
            trace!(%path, "Caller stopped waiting");
        }
    }

    /// Applies a handler-requested effect if `node` is still alive and registered.
    fn apply_effect(&self, tree: &mut AccessibleTree, node: NodeId, effect: TreeEffect) {
        if !tree.contains(node) || !self.registry.contains(node) {
            debug!(%node, ?effect, "Effect discarded, node gone");
            return;
        }

        match effect {
            TreeEffect::Focus => {
                if let Err(e) = tree.set_focus(node) {
                    warn!(error = %e, %node, "Focus effect failed");
                }
            }
            TreeEffect::SyncSelection => {
                let Some(target) = tree.node(node) else {
                    return;
                };
                let selected = target
                    .capabilities()
                    .selection()
                    .map(|s| s.selected())
                    .unwrap_or_default();
                let children = target.children().to_vec();
                for (position, child) in children.into_iter().enumerate() {
                    if let Err(e) =
                        tree.set_state(child, StateFlag::Selected, selected.contains(&position))
                    {
                        warn!(error = %e, %child, "Selection sync failed");
                    }
                }
            }
        }
    }
}

// ============================================================================
// OwnerContext
// ============================================================================

/// Receiving side of the owner queue, held by the owner thread.
///
/// # Example
///
/// ```ignore
/// // In the application's UI loop
/// loop {
///     handle_input(&mut tree);
///     owner.pump(&mut tree);
/// }
/// ```
pub struct OwnerContext {
    rx: mpsc::UnboundedReceiver<OwnerTask>,
    queue: OwnerQueue,
    executor: CallExecutor,
    stopped: bool,
}

impl std::fmt::Debug for OwnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerContext")
            .field("pending", &self.rx.len())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl OwnerContext {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<OwnerTask>,
        queue: OwnerQueue,
        executor: CallExecutor,
    ) -> Self {
        Self {
            rx,
            queue,
            executor,
            stopped: false,
        }
    }

    /// Returns a queue handle for this context.
    #[must_use]
    pub fn queue(&self) -> OwnerQueue {
        self.queue.clone()
    }

    /// Returns the number of queued tasks.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Runs every task queued so far without blocking.
    ///
    /// Returns the number of tasks handled.
    pub fn pump(&mut self, tree: &mut AccessibleTree) -> usize {
        let mut handled = 0;
        while !self.stopped {
            let Ok(task) = self.rx.try_recv() else {
                break;
            };
            handled += 1;
            if self.run(tree, task).is_break() {
                self.stopped = true;
            }
        }
        handled
    }

    /// Runs tasks until shut down.
    ///
    /// Blocks the current thread; must not be called from async code.
    pub fn run_blocking(&mut self, tree: &mut AccessibleTree) {
        while !self.stopped {
            let Some(task) = self.rx.blocking_recv() else {
                break;
            };
            if self.run(tree, task).is_break() {
                self.stopped = true;
            }
        }
        debug!("Owner loop stopped");
    }

    /// Moves the tree to a dedicated owner thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned.
    pub fn spawn(mut self, mut tree: AccessibleTree) -> Result<OwnerThread> {
        let queue = self.queue.clone();
        let handle = std::thread::Builder::new()
            .name("a11y-owner".to_string())
            .spawn(move || {
                self.run_blocking(&mut tree);
                tree
            })?;
        Ok(OwnerThread {
            queue,
            handle: Some(handle),
        })
    }

    fn run(&self, tree: &mut AccessibleTree, task: OwnerTask) -> ControlFlow<()> {
        match task {
            OwnerTask::Call(call) => self.executor.execute(tree, call),
            OwnerTask::Apply(job) => job(tree),
            OwnerTask::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}

// ============================================================================
// OwnerThread
// ============================================================================

/// A dedicated thread owning the tree.
///
/// # Example
///
/// ```ignore
/// let owner = owner.spawn(tree)?;
/// let button = owner
///     .with_tree(|tree| tree.insert(root, None, NodeBuilder::new(Role::Button)))
///     .await??;
/// ```
pub struct OwnerThread {
    queue: OwnerQueue,
    handle: Option<JoinHandle<AccessibleTree>>,
}

impl std::fmt::Debug for OwnerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerThread")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl OwnerThread {
    /// Runs a closure on the owner thread and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the thread has stopped.
    pub async fn with_tree<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut AccessibleTree) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.queue.apply(move |tree| {
            let _ = tx.send(f(tree));
        })?;
        rx.await.map_err(|_| Error::Disconnected)
    }

    /// Returns a queue handle for the thread.
    #[must_use]
    pub fn queue(&self) -> OwnerQueue {
        self.queue.clone()
    }

    /// Stops the thread and returns the tree.
    ///
    /// Blocks until the thread exits. Returns `None` if it panicked.
    pub fn shutdown(mut self) -> Option<AccessibleTree> {
        let _ = self.queue.send(OwnerTask::Shutdown);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(tree) => Some(tree),
            Err(_) => {
                warn!("Owner thread panicked");
                None
            }
        }
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.queue.send(OwnerTask::Shutdown);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
