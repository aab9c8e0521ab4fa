//! tether — connectivity, routing, and transfer engine for intermittent
//! peer-to-peer links.
//!
//! The engine tracks connected nodes and their capabilities, fans events out
//! to registered observers, correlates request/response exchanges over an
//! unreliable message transport, and drives channel-based file and stream
//! transfers. The transport itself is a black box behind the [`Transport`]
//! trait; hosts wire inbound traffic into the engine's `handle_*` methods.

pub mod engine;
pub mod event;
pub mod filter;
pub mod http;
pub mod launch;
pub mod registry;
pub mod router;
pub mod transfer;
pub mod transport;

pub use engine::Tether;
pub use event::{Event, EventBus, Observer, ObserverToken};
pub use filter::{NearbyFilter, NodeFilter, SingleNodeFilter};
pub use http::{HttpExchange, HttpMethod, HttpReply, HttpRequest};
pub use launch::LaunchRequest;
pub use registry::NodeRegistry;
pub use router::ConnectionState;
pub use transfer::FileTransfer;
pub use transport::{Channel, Transport, TransportError};

pub use tether_core::{config::TetherConfig, routes, status, Error, Node};
