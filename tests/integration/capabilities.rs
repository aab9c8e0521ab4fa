use crate::*;
use tether::{status, NearbyFilter, SingleNodeFilter};

#[tokio::test]
async fn runtime_capability_changes_propagate() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let b = mesh.join("b", true).await;
    let log = observe(&a);

    b.add_capabilities(&["player"]).await.unwrap();

    log.wait_for(|e| match e {
        Event::CapabilityChanged { name, nodes } if name == "player" && !nodes.is_empty() => {
            Some(())
        }
        _ => None,
    })
    .await;
    assert_eq!(a.nodes_for_capability("player").len(), 1);

    b.remove_capabilities(&["player"]).await.unwrap();
    settle().await;
    assert!(a.nodes_for_capability("player").is_empty());
}

#[tokio::test]
async fn latest_capability_event_wins() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;

    let mut first = HashSet::new();
    first.insert(Node::new("x", "x", true));
    first.insert(Node::new("y", "y", true));
    a.handle_capability_changed("player", first);
    assert_eq!(a.nodes_for_capability("player").len(), 2);

    // a newer, smaller set replaces the old one wholesale
    let mut second = HashSet::new();
    second.insert(Node::new("y", "y", true));
    a.handle_capability_changed("player", second);

    let current = a.nodes_for_capability("player");
    assert_eq!(current.len(), 1);
    assert!(current.iter().any(|n| n.id == "y"));
}

#[tokio::test]
async fn single_arbitrary_nearby_selection() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;

    let mut nodes = HashSet::new();
    for id in ["n1", "n2", "n3"] {
        nodes.insert(Node::new(id, id, true));
    }
    nodes.insert(Node::new("f1", "f1", false));
    nodes.insert(Node::new("f2", "f2", false));
    a.handle_capability_changed("player", nodes);

    let filter = SingleNodeFilter::wrapping(Box::new(NearbyFilter));
    let picked = a.nodes_for_capability_filtered("player", &filter);
    assert_eq!(picked.len(), 1);
    assert!(picked.iter().all(|n| n.nearby));
}

#[tokio::test]
async fn capability_results_are_broadcast() {
    let mesh = Mesh::new();
    let a = mesh.join("a", true).await;
    let log = observe(&a);

    a.add_capabilities(&["player", "relay"]).await.unwrap();

    let outcome = log
        .wait_for(|e| match e {
            Event::CapabilityAddResult { name, status } if name == "relay" => Some(*status),
            _ => None,
        })
        .await;
    assert_eq!(outcome, status::SUCCESS);
}
