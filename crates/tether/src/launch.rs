//! Remote application launch requests.
//!
//! A launch request is a discrete message on a reserved route asking the
//! receiving endpoint to start (or foreground) an application component.
//! Receivers observe [`Event::LaunchRequested`](crate::Event::LaunchRequested)
//! and decide for themselves whether to honor it.

use serde::{Deserialize, Serialize};

use tether_core::{routes, Error};

use crate::engine::Tether;
use crate::filter::{NearbyFilter, NodeFilter};

/// What to launch. `component` names an application entry point in whatever
/// scheme the receiving platform uses; `extras` is free-form JSON handed to
/// it verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub component: Option<String>,
    #[serde(default)]
    pub extras: serde_json::Value,
    #[serde(default)]
    pub relaunch_if_running: bool,
}

impl LaunchRequest {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            ..Self::default()
        }
    }

    pub fn extras(mut self, extras: serde_json::Value) -> Self {
        self.extras = extras;
        self
    }

    pub fn relaunch_if_running(mut self, relaunch: bool) -> Self {
        self.relaunch_if_running = relaunch;
        self
    }
}

impl Tether {
    /// Asks one node to launch an application component.
    pub async fn launch_on_node(&self, node_id: &str, request: &LaunchRequest) -> Result<(), Error> {
        self.assert_connected()?;
        let payload = serde_json::to_vec(request)
            .map_err(|e| Error::config(format!("unserializable launch request: {e}")))?;
        tracing::debug!(node_id, component = ?request.component, "sending launch request");
        self.send_message(node_id, routes::LAUNCH_ROUTE, payload.into())
            .await
    }

    /// Asks every node advertising `capability` and accepted by `filter` to
    /// launch. With no filter, only nearby nodes are addressed. Returns
    /// `false` when no node qualified.
    pub async fn launch_on_nodes(
        &self,
        capability: &str,
        filter: Option<&dyn NodeFilter>,
        request: &LaunchRequest,
    ) -> Result<bool, Error> {
        self.assert_connected()?;
        let targets = match filter {
            Some(filter) => self.nodes_for_capability_filtered(capability, filter),
            None => self.nodes_for_capability_filtered(capability, &NearbyFilter),
        };
        if targets.is_empty() {
            tracing::debug!(capability, "no nodes qualify for launch");
            return Ok(false);
        }
        for node in &targets {
            self.launch_on_node(&node.id, request).await?;
        }
        Ok(true)
    }
}
