//! Inbound call routing on the dispatch side.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::NodeId;
use crate::protocol::{MethodCall, WireValue, interfaces};
use crate::registry::ObjectPathRegistry;
use crate::transport::{CallRouter, CancelFlag};
use crate::tree::Capability;

use super::owner::{OwnerQueue, OwnerTask, QueuedCall};
use super::request::MethodRequest;

// ============================================================================
// Constants
// ============================================================================

/// Default time a call may spend queued and executing.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// InboundDispatcher
// ============================================================================

/// Routes inbound calls to the owner thread.
///
/// Runs on dispatch tasks and never touches the tree. Resolution,
/// interface checks and argument parsing all happen here against a
/// registry snapshot; only well-formed calls are queued.
pub struct InboundDispatcher {
    registry: Arc<ObjectPathRegistry>,
    queue: OwnerQueue,
    call_timeout: Duration,
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDispatcher")
            .field("registered", &self.registry.len())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl InboundDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(registry: Arc<ObjectPathRegistry>, queue: OwnerQueue, call_timeout: Duration) -> Self {
        Self {
            registry,
            queue,
            call_timeout,
        }
    }

    /// Returns the call timeout.
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Resolves, checks and parses a call.
    fn prepare(&self, call: &MethodCall) -> Result<(NodeId, MethodRequest)> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .entry(&call.path)
            .ok_or_else(|| Error::not_found(&call.path))?;

        if call.interface != interfaces::ACCESSIBLE {
            let capability = Capability::from_interface(&call.interface)
                .ok_or_else(|| Error::unsupported(format!("interface {}", call.interface)))?;
            if !entry.capabilities().contains(capability) {
                return Err(Error::unsupported(format!(
                    "{} on {}",
                    call.interface, call.path
                )));
            }
        }

        let request = MethodRequest::parse(&call.interface, &call.member, &call.args)?;
        Ok((entry.node(), request))
    }
}

#[async_trait]
impl CallRouter for InboundDispatcher {
    async fn route(&self, call: MethodCall, cancel: CancelFlag) -> Result<WireValue> {
        let (node, request) = self.prepare(&call).inspect_err(|e| {
            debug!(error = %e, path = %call.path, member = %call.member, "Call rejected");
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue.send(OwnerTask::Call(QueuedCall {
            node,
            path: call.path.clone(),
            request,
            cancel: Arc::clone(&cancel),
            reply: reply_tx,
        }))?;
        trace!(path = %call.path, member = %call.member, "Call queued to owner");

        match timeout(self.call_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // Owner dropped the call: cancelled or owner gone
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                debug!(path = %call.path, member = %call.member, "Call timed out");
                Err(Error::timeout(
                    format!("{}.{}", call.interface, call.member),
                    self.call_timeout.as_millis() as u64,
                ))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    use crate::dispatch::owner::{CallExecutor, OwnerContext, channel};
    use crate::identifiers::{BusName, ObjectPath};
    use crate::protocol::{Args, DecodeError};
    use crate::tree::{AccessibleTree, ActionList, NodeBuilder, Role};

    struct Setup {
        dispatcher: InboundDispatcher,
        context: OwnerContext,
        tree: AccessibleTree,
        path: ObjectPath,
    }

    fn setup(call_timeout: Duration) -> Setup {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(
            NodeBuilder::new(Role::Button)
                .name("OK")
                .action(ActionList::new().with("press", || true)),
        );
        let registry = Arc::new(ObjectPathRegistry::new());
        let path = registry.register(root, tree.node(root).expect("root").capabilities().set());
        let (queue, rx) = channel();
        let executor = CallExecutor::new(
            Arc::clone(&registry),
            BusName::new("org.example.App").expect("name"),
        );
        Setup {
            dispatcher: InboundDispatcher::new(registry, queue.clone(), call_timeout),
            context: OwnerContext::new(rx, queue, executor),
            tree,
            path,
        }
    }

    fn flag() -> CancelFlag {
        Arc::new(AtomicBool::new(false))
    }

    fn call(path: &ObjectPath, interface: &str, member: &str, args: Args) -> MethodCall {
        MethodCall::new(path.clone(), interface, member, args)
    }

    #[tokio::test]
    async fn test_round_trip_through_owner() {
        let Setup {
            dispatcher,
            mut context,
            mut tree,
            path,
        } = setup(DEFAULT_CALL_TIMEOUT);
        let routed = dispatcher.route(call(&path, interfaces::ACCESSIBLE, "GetName", Args::empty()), flag());
        let pump = async {
            while context.pump(&mut tree) == 0 {
                tokio::task::yield_now().await;
            }
        };
        let (result, ()) = tokio::join!(routed, pump);
        assert_eq!(result.expect("reply"), WireValue::Str("OK".into()));
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let s = setup(DEFAULT_CALL_TIMEOUT);
        let stale = ObjectPath::new("/org/a11y/bridge/accessible/999").expect("path");
        let err = s
            .dispatcher
            .route(call(&stale, interfaces::ACCESSIBLE, "GetName", Args::empty()), flag())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(s.context.pending(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_interface_unsupported() {
        let s = setup(DEFAULT_CALL_TIMEOUT);
        let err = s
            .dispatcher
            .route(call(&s.path, interfaces::TEXT, "GetCaretOffset", Args::empty()), flag())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));

        let err = s
            .dispatcher
            .route(call(&s.path, "org.example.Custom", "Poke", Args::empty()), flag())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert_eq!(s.context.pending(), 0);
    }

    #[tokio::test]
    async fn test_bad_args_decode_error() {
        let s = setup(DEFAULT_CALL_TIMEOUT);
        let err = s
            .dispatcher
            .route(
                call(&s.path, interfaces::ACTION, "DoAction", Args::empty().with("first")),
                flag(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Mismatch { .. })));
    }

    #[tokio::test]
    async fn test_timeout_cancels_queued_call() {
        let mut s = setup(Duration::from_millis(20));
        let cancel = flag();
        let err = s
            .dispatcher
            .route(
                call(&s.path, interfaces::ACTION, "DoAction", Args::empty().with(0i32)),
                Arc::clone(&cancel),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(cancel.load(Ordering::SeqCst));

        // The owner wakes up late: the call must not run
        assert_eq!(s.context.pump(&mut s.tree), 1);
    }

    #[tokio::test]
    async fn test_owner_gone_is_disconnected() {
        let Setup {
            dispatcher, context, ..
        } = setup(DEFAULT_CALL_TIMEOUT);
        drop(context);
        let path = dispatcher.registry.snapshot().iter().next().expect("entry").path().clone();
        let err = dispatcher
            .route(call(&path, interfaces::ACCESSIBLE, "GetRole", Args::empty()), flag())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }
}
