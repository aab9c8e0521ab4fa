//! Node selection filters — composable predicates over node sets.

use std::collections::HashSet;

use tether_core::Node;

/// A pure selection over a node set, used to narrow capability query results.
pub trait NodeFilter: Send + Sync {
    /// Returns the selected subset. An empty input yields an empty output.
    fn filter(&self, nodes: &HashSet<Node>) -> HashSet<Node>;

    /// Textual description, for diagnostics.
    fn describe(&self) -> String;
}

/// Keeps only nodes whose proximity flag is set.
pub struct NearbyFilter;

impl NodeFilter for NearbyFilter {
    fn filter(&self, nodes: &HashSet<Node>) -> HashSet<Node> {
        nodes.iter().filter(|n| n.nearby).cloned().collect()
    }

    fn describe(&self) -> String {
        "NearbyFilter: selects the subset of nearby nodes".to_owned()
    }
}

/// Reduces a non-empty set to exactly one arbitrary element, optionally after
/// applying a delegate filter first.
///
/// No ordering guarantee: any element of the (delegate-filtered) set may be
/// picked.
#[derive(Default)]
pub struct SingleNodeFilter {
    delegate: Option<Box<dyn NodeFilter>>,
}

impl SingleNodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `delegate` first, then picks one element of the result.
    pub fn wrapping(delegate: Box<dyn NodeFilter>) -> Self {
        Self {
            delegate: Some(delegate),
        }
    }
}

impl NodeFilter for SingleNodeFilter {
    fn filter(&self, nodes: &HashSet<Node>) -> HashSet<Node> {
        let narrowed = match &self.delegate {
            Some(delegate) => delegate.filter(nodes),
            None => nodes.clone(),
        };
        narrowed.into_iter().take(1).collect()
    }

    fn describe(&self) -> String {
        match &self.delegate {
            Some(delegate) => format!(
                "SingleNodeFilter: picks one node from [{}]",
                delegate.describe()
            ),
            None => "SingleNodeFilter: arbitrarily picks one node".to_owned(),
        }
    }
}
