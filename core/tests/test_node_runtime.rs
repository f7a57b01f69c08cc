//! Node runtime over the in-memory medium, on paused tokio time
//!
//! Run with: cargo test --test test_node_runtime

use dimy_core::bloom::BloomParams;
use dimy_core::exposure::BackendStore;
use dimy_core::node::NodeEvent;
use dimy_core::store::{MatchPolicy, MemoryStorage, PositiveFilterStore};
use dimy_core::transport::{MemoryMedium, MemoryTransport};
use dimy_core::{Location, NodeHandle, NodeRuntime, ProtocolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn config() -> ProtocolConfig {
    ProtocolConfig {
        bloom: BloomParams::new(65_536, 3).unwrap(),
        ..ProtocolConfig::default()
    }
}

fn spawn_node(
    transport: MemoryTransport,
    config: ProtocolConfig,
    backend: Option<Arc<dyn BackendStore>>,
) -> (NodeHandle, broadcast::Receiver<NodeEvent>) {
    let runtime = NodeRuntime::new(config, Arc::new(transport), backend).unwrap();
    let (handle, _task) = runtime.spawn();
    let events = handle.subscribe();
    (handle, events)
}

/// Next event matching `pred`, or None if `within` elapses first
async fn wait_for<F>(
    events: &mut broadcast::Receiver<NodeEvent>,
    within: Duration,
    mut pred: F,
) -> Option<NodeEvent>
where
    F: FnMut(&NodeEvent) -> bool,
{
    timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("node event channel closed"),
            }
        }
    })
    .await
    .ok()
}

fn is_encounter(event: &NodeEvent) -> bool {
    matches!(event, NodeEvent::Encounter(_))
}

#[tokio::test(start_paused = true)]
async fn test_colocated_nodes_derive_same_enc_id() {
    let medium = MemoryMedium::new();
    let (alice, mut alice_events) = spawn_node(medium.attach(Location(50050)), config(), None);
    let (bob, mut bob_events) = spawn_node(medium.attach(Location(50050)), config(), None);

    let at_alice = wait_for(&mut alice_events, Duration::from_secs(15), is_encounter).await;
    let at_bob = wait_for(&mut bob_events, Duration::from_secs(15), is_encounter).await;

    assert!(at_alice.is_some());
    assert_eq!(at_alice, at_bob);

    alice.stop().await.unwrap();
    bob.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_separated_nodes_meet_after_move() {
    let medium = MemoryMedium::new();
    let (_alice, mut alice_events) = spawn_node(medium.attach(Location(50050)), config(), None);
    let (bob, mut bob_events) = spawn_node(medium.attach(Location(60060)), config(), None);

    let early = wait_for(&mut alice_events, Duration::from_secs(45), is_encounter).await;
    assert!(early.is_none());

    bob.move_to(Location(50050)).await.unwrap();
    let moved = wait_for(&mut bob_events, Duration::from_secs(1), |e| {
        matches!(e, NodeEvent::Moved(_))
    })
    .await;
    assert_eq!(moved, Some(NodeEvent::Moved(Location(50050))));

    // A full epoch guarantees three consecutive slots of the other node
    let met = wait_for(&mut bob_events, Duration::from_secs(31), is_encounter).await;
    assert!(met.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_fully_lossy_broadcast_yields_no_encounter() {
    let lossy = ProtocolConfig {
        broadcast_drop_probability: 1.0,
        ..config()
    };
    let medium = MemoryMedium::new();
    let (_alice, mut alice_events) = spawn_node(medium.attach(Location(1)), lossy.clone(), None);
    let (_bob, _bob_events) = spawn_node(medium.attach(Location(1)), lossy, None);

    let rotated = wait_for(&mut alice_events, Duration::from_secs(1), |e| {
        matches!(e, NodeEvent::Rotated { version: 1 })
    })
    .await;
    assert!(rotated.is_some());
    assert!(wait_for(&mut alice_events, Duration::from_secs(60), is_encounter)
        .await
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_positive_report_reaches_contact_only() {
    let params = config().bloom;
    let store = Arc::new(
        PositiveFilterStore::new(Arc::new(MemoryStorage::new()), params, MatchPolicy::for_params(params))
            .unwrap(),
    );
    let backend: Arc<dyn BackendStore> = store.clone();
    let medium = MemoryMedium::new();

    let (alice, mut alice_events) =
        spawn_node(medium.attach(Location(1)), config(), Some(backend.clone()));
    let (bob, mut bob_events) =
        spawn_node(medium.attach(Location(1)), config(), Some(backend.clone()));
    let (carol, mut carol_events) =
        spawn_node(medium.attach(Location(2)), config(), Some(backend));

    assert!(wait_for(&mut alice_events, Duration::from_secs(15), is_encounter).await.is_some());
    assert!(wait_for(&mut bob_events, Duration::from_secs(15), is_encounter).await.is_some());

    alice.report_positive(Duration::ZERO).await.unwrap();
    let uploaded = wait_for(&mut alice_events, Duration::from_secs(5), |e| {
        matches!(e, NodeEvent::Uploaded { .. })
    })
    .await;
    assert!(uploaded.is_some());
    assert_eq!(store.len().unwrap(), 1);

    let is_verdict = |e: &NodeEvent| matches!(e, NodeEvent::Verdict(_));

    bob.query().await.unwrap();
    match wait_for(&mut bob_events, Duration::from_secs(5), is_verdict).await {
        Some(NodeEvent::Verdict(verdict)) => assert!(verdict.matched),
        other => panic!("expected verdict, got {:?}", other),
    }

    carol.query().await.unwrap();
    match wait_for(&mut carol_events, Duration::from_secs(5), is_verdict).await {
        Some(NodeEvent::Verdict(verdict)) => assert!(!verdict.matched),
        other => panic!("expected verdict, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stopped_node_rejects_commands() {
    let medium = MemoryMedium::new();
    let runtime = NodeRuntime::new(config(), Arc::new(medium.attach(Location(7))), None).unwrap();
    let (handle, task) = runtime.spawn();

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
    assert!(handle.query().await.is_err());
}
