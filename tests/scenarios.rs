//! End-to-end scenarios: a bridge and a remote client on one bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use a11y_bus_bridge::protocol::{Args, Message, MethodCall, WireValue, encode_message, interfaces};
use a11y_bus_bridge::tree::StaticText;
use a11y_bus_bridge::{
    AccessibleTree, ActionList, Bridge, BusClient, BusName, Error, EventKind, MemoryBus,
    NodeBuilder, NodeId, ObjectPath, OwnerContext, Role, StateFlag, StateSet,
};
use anyhow::{Context, Result, bail};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn identity() -> BusName {
    BusName::new("org.example.App").expect("identity")
}

fn bridge_on(bus: &MemoryBus, call_timeout: Duration) -> Result<(Bridge, OwnerContext)> {
    init_tracing();
    Ok(Bridge::builder()
        .identity(identity().as_str())
        .transport(bus.transport())
        .call_timeout(call_timeout)
        .reconnect(Duration::from_millis(10), Duration::from_millis(50))
        .build()?)
}

async fn until(mut check: impl FnMut() -> bool) -> Result<()> {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("condition not reached in time")
}

fn path_of(bridge: &Bridge, node: NodeId) -> Result<ObjectPath> {
    bridge.registry().path_of(node).context("node not registered")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_do_action_then_not_found_after_removal() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let pressed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pressed);
    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Window).name("Main"));
    let button = tree.insert(
        root,
        None,
        NodeBuilder::new(Role::Button).name("A").action(ActionList::new().with("press", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })),
    )?;

    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;

    let path = path_of(&bridge, button)?;
    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let done = client
        .call(&identity(), &path, interfaces::ACTION, "DoAction", Args::empty().with(0i32))
        .await?;
    assert_eq!(done, WireValue::Bool(true));
    assert_eq!(pressed.load(Ordering::SeqCst), 1);

    owner.with_tree(move |tree| tree.remove(button)).await??;
    assert!(bridge.registry().path_of(button).is_none());

    let err = client
        .call(&identity(), &path, interfaces::ACTION, "DoAction", Args::empty().with(0i32))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");
    assert_eq!(pressed.load(Ordering::SeqCst), 1);

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_bus_loss_during_call_then_same_path_after_reconnect() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let (started_tx, started_rx) = std_mpsc::channel();
    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Window));
    let b = tree.insert(
        root,
        None,
        NodeBuilder::new(Role::Button).name("B").action(ActionList::new().with("slow", move || {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(300));
            true
        })),
    )?;

    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;
    let path = path_of(&bridge, b)?;

    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let caller = identity();
    let call = client.call(&caller, &path, interfaces::ACTION, "DoAction", Args::empty().with(0i32));
    let drop_bridge = async {
        tokio::task::spawn_blocking(move || started_rx.recv_timeout(WAIT))
            .await
            .expect("join")
            .expect("action started");
        assert!(bus.drop_peer(&identity()));
    };
    let (result, ()) = tokio::join!(call, drop_bridge);
    assert!(matches!(result, Err(Error::Disconnected)), "got {result:?}");

    until(|| bridge.is_registered() && bus.has_name(&identity())).await?;
    assert_eq!(bridge.registry().resolve(&path)?, b);
    until(|| bus.published(&identity()).contains(&path)).await?;

    let name = client
        .call(&identity(), &path, interfaces::ACCESSIBLE, "GetName", Args::empty())
        .await?;
    assert_eq!(name, WireValue::Str("B".into()));

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_signals_keep_raise_order() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Window));
    let check = tree.insert(root, None, NodeBuilder::new(Role::CheckBox).name("Wrap"))?;
    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;

    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let mut signals = client.take_signals().context("signal stream")?;

    owner
        .with_tree(move |tree| -> a11y_bus_bridge::Result<()> {
            for on in [true, false, true, false, true] {
                tree.set_state(check, StateFlag::Checked, on)?;
            }
            Ok(())
        })
        .await??;

    let path = path_of(&bridge, check)?;
    let mut seen = Vec::new();
    while seen.len() < 5 {
        let signal = timeout(WAIT, signals.recv())
            .await
            .context("signal in time")?
            .context("signal stream open")?;
        if signal.path != path {
            continue;
        }
        assert_eq!(signal.member, interfaces::signals::STATE_CHANGED);
        let new: StateSet = signal.args.get(1)?;
        seen.push(new.contains(StateFlag::Checked));
    }
    assert_eq!(seen, vec![true, false, true, false, true]);

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_undeclared_interface_is_unsupported() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Button).name("OK"));
    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;

    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let path = path_of(&bridge, root)?;
    let err = client
        .call(&identity(), &path, interfaces::TEXT, "GetCaretOffset", Args::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }), "got {err:?}");

    let err = client
        .call(&identity(), &path, interfaces::ACCESSIBLE, "Explode", Args::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }), "got {err:?}");

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_timed_out_call_never_runs_late() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, mut owner) = bridge_on(&bus, Duration::from_millis(50))?;

    let pressed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pressed);
    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Button).action(ActionList::new().with(
        "press",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
    )));
    bridge.attach(&mut tree)?;
    bridge.start()?;
    bridge.wait_registered(WAIT).await?;

    // The owner is busy: nothing pumps the queue during the call
    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let path = path_of(&bridge, root)?;
    let err = client
        .call(&identity(), &path, interfaces::ACTION, "DoAction", Args::empty().with(0i32))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");

    assert_eq!(owner.pump(&mut tree), 1);
    assert_eq!(pressed.load(Ordering::SeqCst), 0);

    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_undecodable_frames_get_decode_errors() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let mut tree = AccessibleTree::new();
    let root = tree.set_root(
        NodeBuilder::new(Role::Button).action(ActionList::new().with("press", || true)),
    );
    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;

    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let path = path_of(&bridge, root)?;

    // Well-formed frame, wrong argument type
    let err = client
        .call(&identity(), &path, interfaces::ACTION, "DoAction", Args::empty().with("first"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {err:?}");

    // Broken frame: the value does not match its tag
    let call = MethodCall::new(path.clone(), interfaces::ACTION, "DoAction", Args::empty())
        .to(identity());
    let serial = call.serial;
    let mut frame: serde_json::Value = serde_json::from_slice(&encode_message(&Message::Call(call))?)?;
    frame["message"]["args"] = serde_json::json!([{ "type": "i32", "value": "zero" }]);
    let reply = client.expect_reply(serial);
    client.send_raw(serde_json::to_vec(&frame)?)?;
    let result = timeout(WAIT, reply).await.context("reply in time")??;
    assert!(matches!(result, Err(Error::Decode(_))), "got {result:?}");

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_bridge_over_websocket() -> Result<()> {
    let bus = MemoryBus::new();
    let addr = bus.serve_websocket("127.0.0.1:0".parse()?).await?;

    let (bridge, owner) = Bridge::builder()
        .identity(identity().as_str())
        .bus_url(format!("ws://{addr}"))
        .build()?;
    let mut tree = AccessibleTree::new();
    let root = tree.set_root(
        NodeBuilder::new(Role::TextInput)
            .name("Search")
            .text(StaticText::new("hello world")),
    );
    bridge.attach(&mut tree)?;
    bridge.start()?;
    let owner = owner.spawn(tree)?;
    bridge.wait_registered(WAIT).await?;

    let client = BusClient::connect(&bus.transport(), WAIT).await?;
    let path = path_of(&bridge, root)?;
    let text = client
        .call(
            &identity(),
            &path,
            interfaces::TEXT,
            "GetText",
            Args::empty().with(0i32).with(5i32),
        )
        .await?;
    assert_eq!(text, WireValue::Str("hello".into()));

    owner.shutdown();
    bridge.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_registration_has_no_torn_reads() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;

    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::List));
    bridge.attach(&mut tree)?;
    let owner = owner.spawn(tree)?;

    let registry = Arc::clone(bridge.registry());
    let reader = tokio::spawn(async move {
        let mut checked = 0usize;
        for round in 0..2_000u32 {
            let snapshot = registry.snapshot();
            for entry in snapshot.iter() {
                if snapshot.resolve(entry.path()).ok() != Some(entry.node()) {
                    bail!("path {} resolves to another node", entry.path());
                }
                if *entry.path() != ObjectPath::for_node(entry.node()) {
                    bail!("path {} does not belong to {}", entry.path(), entry.node());
                }
                checked += 1;
            }
            let probe = ObjectPath::for_node(NodeId::new(round % 64, 0));
            if let Ok(node) = snapshot.resolve(&probe)
                && snapshot.path_of(node) != Some(&probe)
            {
                bail!("torn entry for {probe}");
            }
            tokio::task::yield_now().await;
        }
        Ok(checked)
    });

    let (c, d) = owner
        .with_tree(move |tree| -> a11y_bus_bridge::Result<(NodeId, NodeId)> {
            let mut last = (root, root);
            for i in 0..32 {
                let c = tree.insert(root, None, NodeBuilder::new(Role::ListItem).name(format!("C{i}")))?;
                let d = tree.insert(root, None, NodeBuilder::new(Role::ListItem).name(format!("D{i}")))?;
                if i % 2 == 0 {
                    tree.remove(c)?;
                }
                last = (c, d);
            }
            Ok(last)
        })
        .await??;

    reader.await??;
    assert!(bridge.registry().path_of(c).is_some());
    assert!(bridge.registry().path_of(d).is_some());
    assert_eq!(bridge.registry().len(), 1 + 16 + 32);

    owner.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_tree_changes_reach_event_handler() -> Result<()> {
    let bus = MemoryBus::new();
    let (bridge, owner) = bridge_on(&bus, Duration::from_secs(2))?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bridge.on_event(move |event| {
        let _ = tx.send(event.kind());
    });

    let mut tree = AccessibleTree::new();
    let root = tree.set_root(NodeBuilder::new(Role::Window));
    bridge.attach(&mut tree)?;
    let owner = owner.spawn(tree)?;

    let removed = owner
        .with_tree(move |tree| -> a11y_bus_bridge::Result<Vec<NodeId>> {
            let item = tree.insert(root, None, NodeBuilder::new(Role::Label))?;
            tree.remove(item)
        })
        .await??;
    assert_eq!(removed.len(), 1);

    let mut kinds = Vec::new();
    while kinds.len() < 2 {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(kind)) => kinds.push(kind),
            _ => bail!("missing events, got {kinds:?}"),
        }
    }
    assert_eq!(kinds, vec![EventKind::ChildAdded, EventKind::ChildRemoved]);

    owner.shutdown();
    Ok(())
}
