//! Node — an addressable peer endpoint in the connectivity mesh.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of a peer node.
///
/// The registry replaces whole node sets on refresh and never mutates a
/// `Node` in place. Identity is the `id` alone; display name and flags are
/// advisory and may differ between snapshots of the same peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque identifier, globally unique per peer.
    pub id: String,

    /// Human-readable name for diagnostics and UIs.
    pub display_name: String,

    /// Directly, locally reachable (as opposed to reachable only via relay).
    pub nearby: bool,

    /// True for the node representing this process.
    pub is_local: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, nearby: bool) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            nearby,
            is_local: false,
        }
    }

    /// The node describing the local endpoint itself.
    pub fn local(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            nearby: true,
            is_local: true,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
