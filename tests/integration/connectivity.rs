use crate::*;
use tether::ConnectionState;

#[tokio::test]
async fn joining_reaches_connected_and_signals_readiness() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    assert_eq!(a.state(), ConnectionState::Connected);
    assert!(a.is_connected());

    let log = observe(&a);
    // late registration still learns the connection is up
    log.wait_for(|e| matches!(e, Event::ApiConnected).then_some(()))
        .await;
}

#[tokio::test]
async fn initial_ready_signals_fire_once_per_epoch() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let log = observe(&a);

    // suspension and resume stay within the same epoch
    a.handle_suspended();
    a.handle_connected().await;
    assert_eq!(log.count(|e| matches!(e, Event::InitialNodesReady)), 0);
    assert_eq!(
        log.count(|e| matches!(e, Event::InitialCapabilitiesReady)),
        0
    );

    // a full disconnect opens a new epoch
    a.handle_disconnected();
    assert_eq!(a.state(), ConnectionState::Disconnected);
    a.handle_connected().await;
    assert_eq!(log.count(|e| matches!(e, Event::InitialNodesReady)), 1);
    assert_eq!(
        log.count(|e| matches!(e, Event::InitialCapabilitiesReady)),
        1
    );
}

#[tokio::test]
async fn peers_see_each_other_join() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let log = observe(&a);

    let _b = mesh.join("b", true).await;

    log.wait_for(|e| match e {
        Event::NodeConnected(node) if node.id == "b" => Some(()),
        _ => None,
    })
    .await;

    let nodes = a.connected_nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "b");
    assert!(a.node_by_id("b").is_some());
    assert!(a.node_by_id("missing").is_none());
}

#[tokio::test]
async fn shutdown_retracts_declared_capabilities() {
    let mesh = Mesh::new();
    let mut config = TetherConfig::default();
    config.capabilities.push("http_relay".to_owned());
    let a = mesh.join_with("a", true, config).await;

    assert_eq!(mesh.capability_holders("http_relay").len(), 1);
    a.shutdown().await;
    assert!(mesh.capability_holders("http_relay").is_empty());
}

#[tokio::test]
async fn disconnected_engine_refuses_operations() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    a.handle_disconnected();

    let err = a
        .send_message("b", "/app/ping", Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, tether::Error::NotConnected));
}
