//! Inbound routing and the connection state machine.
//!
//! The transport (or the host glue around it) drives these handlers. Every
//! inbound message is checked against the reserved sub-protocol routes first;
//! only unreserved traffic reaches the generic fan-out, regardless of which
//! observers are registered.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use tether_core::routes;
use tether_core::Node;

use crate::engine::Tether;
use crate::event::Event;
use crate::http::HttpRelayRequest;
use crate::launch::LaunchRequest;
use crate::transport::Channel;

/// Transport connection lifecycle.
///
/// `Disconnected → Connecting → Connected → (Suspended | Failed) →
/// Connected | Disconnected`. The initial-ready signals are one-shot per
/// epoch; an epoch ends only when the state passes through `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Suspended,
    Failed,
}

impl Tether {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().expect("state lock poisoned");
        tracing::debug!(from = ?*state, to = ?next, "connection state change");
        *state = next;
    }

    /// The transport started establishing its connection.
    pub fn handle_connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    /// The transport connection came up. Re-declares locally owned
    /// capabilities, refreshes both registry snapshots, and emits the
    /// per-epoch initial-ready signals once each snapshot has arrived.
    pub async fn handle_connected(&self) {
        self.set_state(ConnectionState::Connected);
        self.bus.set_connected(true);
        self.broadcast(Event::ApiConnected);

        let watched: Vec<String> = self
            .watched_capabilities
            .read()
            .expect("capability lock poisoned")
            .iter()
            .cloned()
            .collect();
        for name in &watched {
            if let Err(e) = self.transport.declare_capability(name).await {
                tracing::error!(capability = name, error = %e, "failed to re-declare capability");
            }
        }

        match self.transport.capability_snapshot().await {
            Ok(snapshot) => {
                for (name, nodes) in snapshot {
                    self.registry.update_capability(&name, nodes);
                }
                if !self.initial_caps_signaled.swap(true, Ordering::SeqCst) {
                    self.broadcast(Event::InitialCapabilitiesReady);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to fetch capability snapshot"),
        }

        match self.transport.connected_nodes().await {
            Ok(nodes) => {
                self.registry.replace_connected_nodes(nodes);
                if !self.initial_nodes_signaled.swap(true, Ordering::SeqCst) {
                    self.broadcast(Event::InitialNodesReady);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to fetch connected nodes"),
        }
    }

    /// The connection was suspended; it may resume without a new epoch.
    pub fn handle_suspended(&self) {
        self.set_state(ConnectionState::Suspended);
        self.bus.set_connected(false);
        self.broadcast(Event::ApiSuspended);
    }

    /// The connection attempt failed.
    pub fn handle_connection_failed(&self) {
        self.set_state(ConnectionState::Failed);
        self.bus.set_connected(false);
        self.broadcast(Event::ApiConnectionFailed);
    }

    /// The connection is gone. Ends the epoch: the next successful connect
    /// re-fires the initial-ready signals.
    pub fn handle_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.bus.set_connected(false);
        self.initial_caps_signaled.store(false, Ordering::SeqCst);
        self.initial_nodes_signaled.store(false, Ordering::SeqCst);
    }

    // ── Inbound messages ─────────────────────────────────────────────────────

    /// Dispatches one inbound message. Reserved routes are fully consumed by
    /// their sub-protocols; anything else is forwarded verbatim to the bus.
    pub fn handle_message(&self, source: &str, route: &str, payload: Bytes) {
        tracing::debug!(source, route, len = payload.len(), "message received");
        match route {
            routes::HTTP_REQUEST_ROUTE => self.handle_http_request_message(source, &payload),
            routes::HTTP_RESPONSE_ROUTE => self.handle_http_response_message(source, &payload),
            routes::LAUNCH_ROUTE => self.handle_launch_message(source, &payload),
            _ => self.broadcast(Event::MessageReceived {
                source: source.to_owned(),
                route: route.to_owned(),
                payload,
            }),
        }
    }

    fn handle_http_request_message(&self, source: &str, payload: &[u8]) {
        let request: HttpRelayRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(source, error = %e, "undecodable http relay request");
                return;
            }
        };
        self.broadcast(Event::HttpRequestReceived {
            url: request.url,
            method: request.method,
            body: request.body,
            charset: request.charset,
            source: source.to_owned(),
            request_id: request.request_id,
        });
    }

    fn handle_launch_message(&self, source: &str, payload: &[u8]) {
        let request: LaunchRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(source, error = %e, "undecodable launch request");
                return;
            }
        };
        self.broadcast(Event::LaunchRequested {
            component: request.component,
            extras: request.extras,
            relaunch_if_running: request.relaunch_if_running,
        });
    }

    // ── Node and capability changes ──────────────────────────────────────────

    pub fn handle_node_connected(&self, node: Node) {
        tracing::debug!(node = %node.id, "peer connected");
        self.broadcast(Event::NodeConnected(node));
    }

    pub fn handle_node_disconnected(&self, node: Node) {
        tracing::debug!(node = %node.id, "peer disconnected");
        self.broadcast(Event::NodeDisconnected(node));
    }

    pub fn handle_connected_nodes(&self, nodes: Vec<Node>) {
        self.registry.replace_connected_nodes(nodes.clone());
        self.broadcast(Event::ConnectedNodesChanged(nodes));
    }

    pub fn handle_capability_changed(&self, name: &str, nodes: HashSet<Node>) {
        self.registry.update_capability(name, nodes.clone());
        self.broadcast(Event::CapabilityChanged {
            name: name.to_owned(),
            nodes,
        });
    }

    pub fn handle_data_changed(&self, path: &str, payload: Bytes) {
        self.broadcast(Event::DataChanged {
            path: path.to_owned(),
            payload,
        });
    }

    // ── Inbound channels ─────────────────────────────────────────────────────

    /// Dispatches a channel a peer opened toward this endpoint. Transfer
    /// routes are consumed by the transfer protocol; other channels are
    /// parked for the host to claim.
    pub fn handle_channel_opened(self: &std::sync::Arc<Self>, channel: Channel) {
        let route = channel.route().to_owned();
        let peer = channel.peer().to_owned();
        tracing::debug!(peer, route, "channel opened");

        if route.starts_with(routes::FILE_ROUTE_PREFIX) {
            let engine = self.clone();
            tokio::spawn(async move { engine.receive_file(channel).await });
        } else if route.starts_with(routes::STREAM_ROUTE_PREFIX) {
            match routes::decode_stream_route(&route) {
                Ok(request_id) => {
                    self.parked_streams.insert(request_id.clone(), channel);
                    self.broadcast(Event::StreamOpened { peer, request_id });
                }
                Err(e) => tracing::error!(route, error = %e, "undecodable stream route"),
            }
        } else {
            self.parked_channels
                .insert((peer.clone(), route.clone()), channel);
            self.broadcast(Event::ChannelOpened { peer, route });
        }
    }

    pub fn handle_channel_closed(&self, peer: &str, route: &str, close_reason: i32) {
        self.parked_channels
            .remove(&(peer.to_owned(), route.to_owned()));
        if let Ok(request_id) = routes::decode_stream_route(route) {
            self.parked_streams.remove(&request_id);
        }
        self.broadcast(Event::ChannelClosed {
            peer: peer.to_owned(),
            route: route.to_owned(),
            close_reason,
        });
    }

    pub fn handle_input_closed(&self, peer: &str, route: &str) {
        self.broadcast(Event::ChannelInputClosed {
            peer: peer.to_owned(),
            route: route.to_owned(),
        });
    }

    /// The peer closed its output side. If this side still holds the channel
    /// open, close it too rather than leaking a half-open session.
    pub fn handle_output_closed(&self, peer: &str, route: &str) {
        let key = (peer.to_owned(), route.to_owned());
        if let Some((_, mut channel)) = self.parked_channels.remove(&key) {
            tracing::debug!(peer, route, "output closed; closing half-open channel");
            channel.close();
        }
        if let Ok(request_id) = routes::decode_stream_route(route) {
            if let Some((_, mut channel)) = self.parked_streams.remove(&request_id) {
                tracing::debug!(peer, request_id, "output closed; closing half-open stream");
                channel.close();
            }
        }
        self.broadcast(Event::ChannelOutputClosed {
            peer: peer.to_owned(),
            route: route.to_owned(),
        });
    }
}
