//! Tether integration test harness.
//!
//! Tests run against an in-memory mesh: every endpoint is a real engine over
//! a [`LinkTransport`] that delivers messages, channels, capability changes,
//! and data items to the other engines in the same mesh. No sockets, no
//! external processes — the transport layer is the only thing faked.
//!
//! The mesh is shared mutable state; each test builds its own [`Mesh`] and
//! must not assume anything about endpoint ids used by other tests.

pub use std::collections::{BTreeMap, HashMap, HashSet};
pub use std::sync::{Arc, Mutex};
pub use std::time::Duration;

pub use bytes::Bytes;

pub use tether::{
    Channel, Event, Node, Observer, Tether, TetherConfig, Transport, TransportError,
};

use async_trait::async_trait;

mod capabilities;
mod connectivity;
mod messaging;

// ── Harness ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MeshState {
    endpoints: Mutex<HashMap<String, (Node, Arc<Tether>)>>,
    capabilities: Mutex<HashMap<String, HashSet<Node>>>,
    data: Mutex<BTreeMap<String, Bytes>>,
}

impl MeshState {
    fn engine(&self, id: &str) -> Option<Arc<Tether>> {
        self.endpoints
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, engine)| engine.clone())
    }

    fn nodes_except(&self, id: &str) -> Vec<Node> {
        self.endpoints
            .lock()
            .unwrap()
            .values()
            .filter(|(node, _)| node.id != id)
            .map(|(node, _)| node.clone())
            .collect()
    }

    fn engines_except(&self, id: &str) -> Vec<Arc<Tether>> {
        self.endpoints
            .lock()
            .unwrap()
            .values()
            .filter(|(node, _)| node.id != id)
            .map(|(_, engine)| engine.clone())
            .collect()
    }
}

/// A little in-memory peer mesh.
#[derive(Default)]
pub struct Mesh(Arc<MeshState>);

impl Mesh {
    pub fn new() -> Self {
        // idempotent across tests sharing the process
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Self::default()
    }

    /// Adds an endpoint with a default config and drives it to connected.
    pub async fn join(&self, id: &str, nearby: bool) -> Arc<Tether> {
        self.join_with(id, nearby, TetherConfig::default()).await
    }

    pub async fn join_with(&self, id: &str, nearby: bool, config: TetherConfig) -> Arc<Tether> {
        let node = Node::new(id, id, nearby);
        let transport = LinkTransport {
            local: node.clone(),
            mesh: self.0.clone(),
        };
        let engine = Tether::new(config, Arc::new(transport));
        self.0
            .endpoints
            .lock()
            .unwrap()
            .insert(id.to_owned(), (node.clone(), engine.clone()));

        engine.handle_connecting();
        engine.handle_connected().await;

        // existing peers learn about the newcomer
        for other in self.0.engines_except(id) {
            other.handle_node_connected(node.clone());
        }
        let peers: Vec<(String, Arc<Tether>)> = self
            .0
            .endpoints
            .lock()
            .unwrap()
            .iter()
            .map(|(peer_id, (_, engine))| (peer_id.clone(), engine.clone()))
            .collect();
        for (peer_id, peer) in peers {
            peer.handle_connected_nodes(self.0.nodes_except(&peer_id));
        }
        engine
    }

    /// Nodes currently advertising `name`, as the mesh sees it.
    pub fn capability_holders(&self, name: &str) -> HashSet<Node> {
        self.0
            .capabilities
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

/// Transport that short-circuits straight into the other engines of the mesh.
struct LinkTransport {
    local: Node,
    mesh: Arc<MeshState>,
}

impl LinkTransport {
    fn fan_out_capability(&self, name: &str, nodes: HashSet<Node>) {
        let engines: Vec<Arc<Tether>> = self
            .mesh
            .endpoints
            .lock()
            .unwrap()
            .values()
            .map(|(_, engine)| engine.clone())
            .collect();
        for engine in engines {
            engine.handle_capability_changed(name, nodes.clone());
        }
    }
}

#[async_trait]
impl Transport for LinkTransport {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    async fn send_message(
        &self,
        node_id: &str,
        route: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let target = self
            .mesh
            .engine(node_id)
            .ok_or_else(|| TransportError::SendFailed(format!("unknown node {node_id}")))?;
        target.handle_message(&self.local.id, route, payload);
        Ok(())
    }

    async fn open_channel(&self, node_id: &str, route: &str) -> Result<Channel, TransportError> {
        let target = self
            .mesh
            .engine(node_id)
            .ok_or_else(|| TransportError::ChannelRefused(format!("unknown node {node_id}")))?;
        let (near, far) = tokio::io::duplex(16 * 1024);
        target.handle_channel_opened(Channel::from_duplex(&self.local.id, route, far));
        Ok(Channel::from_duplex(node_id, route, near))
    }

    async fn declare_capability(&self, name: &str) -> Result<(), TransportError> {
        let nodes = {
            let mut caps = self.mesh.capabilities.lock().unwrap();
            let set = caps.entry(name.to_owned()).or_default();
            set.insert(self.local.clone());
            set.clone()
        };
        self.fan_out_capability(name, nodes);
        Ok(())
    }

    async fn retract_capability(&self, name: &str) -> Result<(), TransportError> {
        let nodes = {
            let mut caps = self.mesh.capabilities.lock().unwrap();
            let set = caps.entry(name.to_owned()).or_default();
            set.remove(&self.local);
            set.clone()
        };
        self.fan_out_capability(name, nodes);
        Ok(())
    }

    async fn connected_nodes(&self) -> Result<Vec<Node>, TransportError> {
        Ok(self.mesh.nodes_except(&self.local.id))
    }

    async fn capability_snapshot(
        &self,
    ) -> Result<HashMap<String, HashSet<Node>>, TransportError> {
        Ok(self.mesh.capabilities.lock().unwrap().clone())
    }

    async fn put_data(&self, path: &str, payload: Bytes) -> Result<(), TransportError> {
        self.mesh
            .data
            .lock()
            .unwrap()
            .insert(path.to_owned(), payload.clone());
        for engine in self.mesh.engines_except(&self.local.id) {
            engine.handle_data_changed(path, payload.clone());
        }
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<(String, Bytes)>, TransportError> {
        Ok(self
            .mesh
            .data
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(path))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn delete_data(&self, path: &str) -> Result<(), TransportError> {
        self.mesh
            .data
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(path));
        Ok(())
    }
}

// ── Observation helpers ───────────────────────────────────────────────────────

/// Observer that records everything it sees.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<Event>>);

impl Observer for EventLog {
    fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pick: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| pick(e)).count()
    }

    /// Polls until `pick` matches a recorded event or two seconds elapse.
    pub async fn wait_for<T>(&self, pick: impl Fn(&Event) -> Option<T>) -> T {
        for _ in 0..400 {
            if let Some(found) = self.0.lock().unwrap().iter().find_map(&pick) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected event did not arrive within 2s");
    }
}

/// Attaches a fresh log to an engine.
pub fn observe(engine: &Arc<Tether>) -> Arc<EventLog> {
    let log = Arc::new(EventLog::default());
    engine.register_observer(log.clone());
    log
}

/// Lets spawned handlers and fan-out settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
