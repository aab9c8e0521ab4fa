//! The Tether engine — an explicitly constructed, dependency-injected service
//! instance owning registries, the event bus, and all pending state.
//!
//! Construct one per process with [`Tether::new`] (inside a tokio runtime),
//! keep it behind the returned `Arc`, and drop it on shutdown. There is no
//! global accessor.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use tether_core::config::TetherConfig;
use tether_core::{status, Error, Node};

use crate::event::{Event, EventBus, Observer, ObserverToken};
use crate::filter::NodeFilter;
use crate::http::PendingHttp;
use crate::registry::NodeRegistry;
use crate::router::ConnectionState;
use crate::transport::{Channel, Transport};

pub struct Tether {
    pub(crate) config: TetherConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: NodeRegistry,
    pub(crate) bus: EventBus,

    pub(crate) state: RwLock<ConnectionState>,

    /// Capabilities declared by this endpoint, re-declared on reconnect and
    /// retracted on shutdown.
    pub(crate) watched_capabilities: RwLock<HashSet<String>>,

    /// Outstanding HTTP relay exchanges, keyed by request id. Completion is
    /// single-assignment: whoever removes the entry owns the terminal event.
    pub(crate) pending_http: DashMap<String, PendingHttp>,

    /// Inbound channels on non-reserved routes, parked until the host claims
    /// them. Keyed by (peer id, route).
    pub(crate) parked_channels: DashMap<(String, String), Channel>,

    /// Inbound raw-stream channels, parked until claimed. Keyed by request id.
    pub(crate) parked_streams: DashMap<String, Channel>,

    /// One-shot guards for the per-epoch initial-ready signals; reset when
    /// the state machine passes through Disconnected.
    pub(crate) initial_caps_signaled: AtomicBool,
    pub(crate) initial_nodes_signaled: AtomicBool,

    /// Probe for a direct network path; when it reports true, HTTP requests
    /// skip the peer relay entirely.
    pub(crate) direct_network_probe: RwLock<Option<Box<dyn Fn() -> bool + Send + Sync>>>,

    /// Captured at construction; lets the blocking variants drive async work
    /// from threads outside the runtime.
    runtime: tokio::runtime::Handle,
}

impl Tether {
    /// Creates the engine. Must be called from within a tokio runtime; the
    /// handle is captured for the blocking query variants.
    pub fn new(config: TetherConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        tracing::info!(
            capabilities = ?config.capabilities,
            "tether engine created"
        );
        Arc::new(Self {
            watched_capabilities: RwLock::new(config.capabilities.iter().cloned().collect()),
            config,
            transport,
            registry: NodeRegistry::new(),
            bus: EventBus::new(),
            state: RwLock::new(ConnectionState::Disconnected),
            pending_http: DashMap::new(),
            parked_channels: DashMap::new(),
            parked_streams: DashMap::new(),
            initial_caps_signaled: AtomicBool::new(false),
            initial_nodes_signaled: AtomicBool::new(false),
            direct_network_probe: RwLock::new(None),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn local_node(&self) -> Node {
        self.transport.local_node()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Guard for operations that require an active transport connection.
    pub fn assert_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Installs the probe consulted before relaying HTTP requests to a peer.
    pub fn set_direct_network_probe(&self, probe: impl Fn() -> bool + Send + Sync + 'static) {
        *self
            .direct_network_probe
            .write()
            .expect("probe lock poisoned") = Some(Box::new(probe));
    }

    pub(crate) fn direct_network_available(&self) -> bool {
        self.direct_network_probe
            .read()
            .expect("probe lock poisoned")
            .as_ref()
            .map(|probe| probe())
            .unwrap_or(false)
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverToken {
        self.bus.register(observer)
    }

    pub fn unregister_observer(&self, token: ObserverToken) {
        self.bus.unregister(token)
    }

    pub(crate) fn broadcast(&self, event: Event) {
        self.bus.broadcast(&event);
    }

    // ── Registry queries ─────────────────────────────────────────────────────

    pub fn connected_nodes(&self) -> Arc<Vec<Node>> {
        self.registry.connected_nodes()
    }

    pub fn node_by_id(&self, id: &str) -> Option<Node> {
        self.registry.node_by_id(id)
    }

    pub fn nodes_for_capability(&self, capability: &str) -> HashSet<Node> {
        self.registry.nodes_for_capability(capability)
    }

    pub fn nodes_for_capability_filtered(
        &self,
        capability: &str,
        filter: &dyn NodeFilter,
    ) -> HashSet<Node> {
        self.registry.nodes_for_capability_filtered(capability, filter)
    }

    // ── Messaging ────────────────────────────────────────────────────────────

    /// Sends a discrete message. Transport failures are not raised here; the
    /// outcome is broadcast as [`Event::MessageSendResult`] and logged.
    pub async fn send_message(
        &self,
        node_id: &str,
        route: &str,
        payload: Bytes,
    ) -> Result<(), Error> {
        self.assert_connected()?;
        let outcome = match self.transport.send_message(node_id, route, payload).await {
            Ok(()) => status::SUCCESS,
            Err(e) => {
                tracing::error!(node_id, route, error = %e, "failed to send message");
                status::REQUEST_FAILED
            }
        };
        self.broadcast(Event::MessageSendResult(outcome));
        Ok(())
    }

    // ── Capabilities ─────────────────────────────────────────────────────────

    /// Declares capabilities at runtime. Balance with [`remove_capabilities`].
    ///
    /// [`remove_capabilities`]: Self::remove_capabilities
    pub async fn add_capabilities(&self, names: &[&str]) -> Result<(), Error> {
        self.assert_connected()?;
        for name in names {
            let outcome = match self.transport.declare_capability(name).await {
                Ok(()) => {
                    self.watched_capabilities
                        .write()
                        .expect("capability lock poisoned")
                        .insert((*name).to_owned());
                    status::SUCCESS
                }
                Err(e) => {
                    tracing::error!(capability = name, error = %e, "failed to add capability");
                    status::REQUEST_FAILED
                }
            };
            self.broadcast(Event::CapabilityAddResult {
                name: (*name).to_owned(),
                status: outcome,
            });
        }
        Ok(())
    }

    pub async fn remove_capabilities(&self, names: &[&str]) -> Result<(), Error> {
        self.assert_connected()?;
        for name in names {
            let outcome = match self.transport.retract_capability(name).await {
                Ok(()) => {
                    self.watched_capabilities
                        .write()
                        .expect("capability lock poisoned")
                        .remove(*name);
                    status::SUCCESS
                }
                Err(e) => {
                    tracing::error!(capability = name, error = %e, "failed to remove capability");
                    status::REQUEST_FAILED
                }
            };
            self.broadcast(Event::CapabilityRemoveResult {
                name: (*name).to_owned(),
                status: outcome,
            });
        }
        Ok(())
    }

    // ── Data layer ───────────────────────────────────────────────────────────

    pub async fn put_data(&self, path: &str, payload: Bytes) -> Result<(), Error> {
        self.assert_connected()?;
        let outcome = match self.transport.put_data(path, payload).await {
            Ok(()) => status::SUCCESS,
            Err(e) => {
                tracing::error!(path, error = %e, "failed to put data item");
                status::REQUEST_FAILED
            }
        };
        self.broadcast(Event::DataPutResult(outcome));
        Ok(())
    }

    pub async fn get_data(&self, path: &str) -> Result<Vec<(String, Bytes)>, Error> {
        self.assert_connected()?;
        match self.transport.get_data(path).await {
            Ok(items) => {
                self.broadcast(Event::DataGetResult {
                    status: status::SUCCESS,
                    items: items.clone(),
                });
                Ok(items)
            }
            Err(e) => {
                tracing::error!(path, error = %e, "failed to get data items");
                self.broadcast(Event::DataGetResult {
                    status: status::REQUEST_FAILED,
                    items: Vec::new(),
                });
                Ok(Vec::new())
            }
        }
    }

    pub async fn delete_data(&self, path: &str) -> Result<(), Error> {
        self.assert_connected()?;
        let outcome = match self.transport.delete_data(path).await {
            Ok(()) => status::SUCCESS,
            Err(e) => {
                tracing::error!(path, error = %e, "failed to delete data items");
                status::REQUEST_FAILED
            }
        };
        self.broadcast(Event::DataDeleteResult(outcome));
        Ok(())
    }

    /// Blocking variant of [`put_data`](Self::put_data). Must be called from
    /// a thread outside the runtime and waits at most `timeout`.
    pub fn put_data_sync(
        &self,
        path: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.block_on_with_timeout(timeout, self.put_data(path, payload))
    }

    /// Blocking variant of [`get_data`](Self::get_data).
    pub fn get_data_sync(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<(String, Bytes)>, Error> {
        self.block_on_with_timeout(timeout, self.get_data(path))
    }

    /// Blocking variant of [`delete_data`](Self::delete_data).
    pub fn delete_data_sync(&self, path: &str, timeout: Duration) -> Result<(), Error> {
        self.block_on_with_timeout(timeout, self.delete_data(path))
    }

    fn block_on_with_timeout<T>(
        &self,
        timeout: Duration,
        fut: impl std::future::Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        assert_blocking_context();
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| Error::Timeout(timeout))?
    }

    // ── Parked channels ──────────────────────────────────────────────────────

    /// Claims a parked inbound channel announced via [`Event::ChannelOpened`].
    pub fn take_channel(&self, peer: &str, route: &str) -> Option<Channel> {
        self.parked_channels
            .remove(&(peer.to_owned(), route.to_owned()))
            .map(|(_, ch)| ch)
    }

    /// Claims a parked inbound stream announced via [`Event::StreamOpened`].
    pub fn take_stream(&self, request_id: &str) -> Option<Channel> {
        self.parked_streams.remove(request_id).map(|(_, ch)| ch)
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Retracts watched capabilities and drops all observer registrations.
    /// Call when the engine is no longer needed.
    pub async fn shutdown(&self) {
        let watched: Vec<String> = self
            .watched_capabilities
            .read()
            .expect("capability lock poisoned")
            .iter()
            .cloned()
            .collect();
        if self.is_connected() {
            let names: Vec<&str> = watched.iter().map(String::as_str).collect();
            if let Err(e) = self.remove_capabilities(&names).await {
                tracing::warn!(error = %e, "failed to retract capabilities on shutdown");
            }
        }
        self.bus.clear();
        self.pending_http.clear();
        self.parked_channels.clear();
        self.parked_streams.clear();
        tracing::info!("tether engine shut down");
    }
}

/// The blocking variants are for worker threads only; driving them from a
/// runtime thread would deadlock the executor, so it is a usage error.
fn assert_blocking_context() {
    assert!(
        tokio::runtime::Handle::try_current().is_err(),
        "blocking variant called from within the async runtime; use the async method instead"
    );
}
