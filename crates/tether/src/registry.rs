//! Node registry — connected peers and capability-to-node-set bookkeeping.
//!
//! Mutation entry points are transport-driven only; callers get immutable
//! snapshots. Both structures are replaced wholesale, never edited in place,
//! so a concurrent reader can never observe a half-updated set.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tether_core::Node;

use crate::filter::NodeFilter;

#[derive(Default)]
pub struct NodeRegistry {
    /// The authoritative connected-node set, swapped atomically on refresh.
    connected: RwLock<Arc<Vec<Node>>>,

    /// capability name -> nodes last reported for it. Each insert replaces
    /// the previous set for that name.
    capabilities: DashMap<String, Arc<HashSet<Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable snapshot of the currently connected nodes.
    pub fn connected_nodes(&self) -> Arc<Vec<Node>> {
        self.connected.read().expect("registry lock poisoned").clone()
    }

    /// The connected node with the given id, if any.
    pub fn node_by_id(&self, id: &str) -> Option<Node> {
        self.connected_nodes().iter().find(|n| n.id == id).cloned()
    }

    /// Nodes currently offering `capability`. Unknown names yield an empty set.
    pub fn nodes_for_capability(&self, capability: &str) -> HashSet<Node> {
        self.capabilities
            .get(capability)
            .map(|entry| entry.value().as_ref().clone())
            .unwrap_or_default()
    }

    /// Capability query narrowed by a filter chain.
    pub fn nodes_for_capability_filtered(
        &self,
        capability: &str,
        filter: &dyn NodeFilter,
    ) -> HashSet<Node> {
        filter.filter(&self.nodes_for_capability(capability))
    }

    /// Replaces the whole connected set. Transport-driven.
    pub fn replace_connected_nodes(&self, nodes: Vec<Node>) {
        tracing::debug!(count = nodes.len(), "connected node set replaced");
        *self.connected.write().expect("registry lock poisoned") = Arc::new(nodes);
    }

    /// Replaces the node set for one capability. Transport-driven; the
    /// previously reported set is simply overwritten.
    pub fn update_capability(&self, capability: &str, nodes: HashSet<Node>) {
        tracing::debug!(capability, count = nodes.len(), "capability updated");
        self.capabilities
            .insert(capability.to_owned(), Arc::new(nodes));
    }
}
