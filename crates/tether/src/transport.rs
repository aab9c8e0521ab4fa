//! Transport abstraction — the black box the engine routes through.
//!
//! The engine only ever asks the transport to send bytes to a node on a
//! route, to open a byte-stream channel, to declare or retract a capability,
//! or to fetch the current node/capability snapshots. Inbound traffic and
//! connectivity changes flow the other way: the transport implementation (or
//! the host glue around it) calls the engine's `handle_*` methods in
//! [`router`](crate::router).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use tether_core::Node;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message send failed: {0}")]
    SendFailed(String),
    #[error("channel open refused: {0}")]
    ChannelRefused(String),
    #[error("transport unavailable")]
    Unavailable,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An ephemeral bidirectional byte-stream session bound to one routing key.
///
/// Each half is single-owner and can be taken exactly once. Dropping both
/// halves (or the whole channel) closes the session; a channel is not
/// reusable after close.
pub struct Channel {
    peer: String,
    route: String,
    reader: Option<Box<dyn AsyncRead + Send + Sync + Unpin>>,
    writer: Option<Box<dyn AsyncWrite + Send + Sync + Unpin>>,
}

impl Channel {
    pub fn new(
        peer: impl Into<String>,
        route: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Sync + Unpin>,
    ) -> Self {
        Self {
            peer: peer.into(),
            route: route.into(),
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Wraps one end of an in-memory duplex pipe. Used by loopback transports
    /// and tests.
    pub fn from_duplex(
        peer: impl Into<String>,
        route: impl Into<String>,
        stream: tokio::io::DuplexStream,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(peer, route, Box::new(reader), Box::new(writer))
    }

    /// Remote node id this channel is bound to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Routing key this channel was opened on.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Claims the readable half. Returns `None` if already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        self.reader.take()
    }

    /// Claims the writable half. Returns `None` if already taken.
    pub fn take_writer(&mut self) -> Option<Box<dyn AsyncWrite + Send + Sync + Unpin>> {
        self.writer.take()
    }

    /// Closes the channel by dropping any half not yet claimed.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer)
            .field("route", &self.route)
            .field("reader_taken", &self.reader.is_none())
            .field("writer_taken", &self.writer.is_none())
            .finish()
    }
}

/// Outbound operations the engine needs from the underlying mesh transport.
///
/// Implementations are expected to be cheap to clone behind an `Arc` and to
/// report failures through `TransportError` rather than panicking; the engine
/// converts them into status-code completions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The node describing this endpoint.
    fn local_node(&self) -> Node;

    /// Sends a discrete message to `node_id` on `route`.
    async fn send_message(
        &self,
        node_id: &str,
        route: &str,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Opens a byte-stream channel to `node_id` bound to `route`.
    async fn open_channel(&self, node_id: &str, route: &str) -> Result<Channel, TransportError>;

    async fn declare_capability(&self, name: &str) -> Result<(), TransportError>;
    async fn retract_capability(&self, name: &str) -> Result<(), TransportError>;

    /// Current reachable nodes, fetched on (re)connect.
    async fn connected_nodes(&self) -> Result<Vec<Node>, TransportError>;

    /// Current reachable capability map, fetched on (re)connect.
    async fn capability_snapshot(
        &self,
    ) -> Result<HashMap<String, HashSet<Node>>, TransportError>;

    /// Shared data-layer pass-through.
    async fn put_data(&self, path: &str, payload: Bytes) -> Result<(), TransportError>;
    async fn get_data(&self, path: &str) -> Result<Vec<(String, Bytes)>, TransportError>;
    async fn delete_data(&self, path: &str) -> Result<(), TransportError>;
}
