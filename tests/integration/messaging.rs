use crate::*;
use tether::{routes, status, LaunchRequest};

#[tokio::test]
async fn messages_reach_peer_observers() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let b = mesh.join("b", true).await;
    let log = observe(&b);

    a.send_message("b", "/app/ping", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    let (source, payload) = log
        .wait_for(|e| match e {
            Event::MessageReceived {
                source,
                route,
                payload,
            } if route == "/app/ping" => Some((source.clone(), payload.clone())),
            _ => None,
        })
        .await;
    assert_eq!(source, "a");
    assert_eq!(&payload[..], b"hello");
}

#[tokio::test]
async fn send_to_unknown_node_reports_failure() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let log = observe(&a);

    // delivery failure is not an error at the call site
    a.send_message("ghost", "/app/ping", Bytes::new())
        .await
        .unwrap();

    let outcome = log
        .wait_for(|e| match e {
            Event::MessageSendResult(code) => Some(*code),
            _ => None,
        })
        .await;
    assert_eq!(outcome, status::REQUEST_FAILED);
}

#[tokio::test]
async fn launch_route_is_intercepted_not_forwarded() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let b = mesh.join("b", true).await;
    let log = observe(&b);

    let request = LaunchRequest::new("app/player")
        .extras(serde_json::json!({ "track": 3 }))
        .relaunch_if_running(true);
    a.launch_on_node("b", &request).await.unwrap();

    let (component, extras) = log
        .wait_for(|e| match e {
            Event::LaunchRequested {
                component, extras, ..
            } => Some((component.clone(), extras.clone())),
            _ => None,
        })
        .await;
    assert_eq!(component.as_deref(), Some("app/player"));
    assert_eq!(extras["track"], 3);

    // the reserved route never surfaces as a generic message
    assert_eq!(
        log.count(|e| matches!(e, Event::MessageReceived { route, .. } if route == routes::LAUNCH_ROUTE)),
        0
    );
}

#[tokio::test]
async fn capability_launch_targets_only_nearby_by_default() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let near = mesh.join("near", true).await;
    let far = mesh.join("far", false).await;

    near.add_capabilities(&["player"]).await.unwrap();
    far.add_capabilities(&["player"]).await.unwrap();
    settle().await;

    let near_log = observe(&near);
    let far_log = observe(&far);

    let launched = a
        .launch_on_nodes("player", None, &LaunchRequest::new("app/player"))
        .await
        .unwrap();
    assert!(launched);

    near_log
        .wait_for(|e| matches!(e, Event::LaunchRequested { .. }).then_some(()))
        .await;
    assert_eq!(
        far_log.count(|e| matches!(e, Event::LaunchRequested { .. })),
        0
    );
}

#[tokio::test]
async fn data_items_flow_through_the_shared_layer() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let b = mesh.join("b", true).await;
    let log = observe(&b);

    a.put_data("/state/track", Bytes::from_static(b"7"))
        .await
        .unwrap();

    log.wait_for(|e| match e {
        Event::DataChanged { path, .. } if path == "/state/track" => Some(()),
        _ => None,
    })
    .await;

    let items = b.get_data("/state").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(&items[0].1[..], b"7");

    b.delete_data("/state").await.unwrap();
    assert!(a.get_data("/state").await.unwrap().is_empty());
}
