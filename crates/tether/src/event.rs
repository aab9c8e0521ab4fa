//! Event fan-out bus.
//!
//! Observers register by identity and receive every broadcast event exactly
//! once. Broadcast iterates a snapshot of the observer list, so an observer
//! un/registering itself (or others) from inside a callback never skips or
//! duplicates delivery. A panicking observer is logged and isolated; it does
//! not break delivery to the rest.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tether_core::Node;

/// Everything the engine can tell its observers, as one tagged union.
/// Implementers match on the kinds they care about and ignore the rest.
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport connection came up.
    ApiConnected,
    /// The transport connection was suspended; it may resume.
    ApiSuspended,
    /// The transport connection could not be established.
    ApiConnectionFailed,

    /// An inbound message on a non-reserved route.
    MessageReceived {
        source: String,
        route: String,
        payload: Bytes,
    },

    NodeConnected(Node),
    NodeDisconnected(Node),
    /// The connected-node set was replaced wholesale.
    ConnectedNodesChanged(Vec<Node>),
    /// One-shot per connection epoch: the first node snapshot arrived.
    InitialNodesReady,

    CapabilityChanged {
        name: String,
        nodes: HashSet<Node>,
    },
    /// One-shot per connection epoch: the first capability snapshot arrived.
    InitialCapabilitiesReady,

    /// A channel on a non-reserved route was opened by a peer; claim it with
    /// [`Tether::take_channel`](crate::Tether::take_channel).
    ChannelOpened { peer: String, route: String },
    ChannelClosed {
        peer: String,
        route: String,
        close_reason: i32,
    },
    ChannelInputClosed { peer: String, route: String },
    ChannelOutputClosed { peer: String, route: String },

    /// A shared data item changed.
    DataChanged { path: String, payload: Bytes },

    /// Default-callback results for fire-and-forget operations.
    MessageSendResult(i32),
    DataPutResult(i32),
    DataGetResult { status: i32, items: Vec<(String, Bytes)> },
    DataDeleteResult(i32),
    CapabilityAddResult { name: String, status: i32 },
    CapabilityRemoveResult { name: String, status: i32 },

    /// A peer asks this endpoint to perform an HTTP call on its behalf.
    /// Answer with [`Tether::send_http_response`](crate::Tether::send_http_response).
    HttpRequestReceived {
        url: String,
        method: String,
        body: Option<String>,
        charset: String,
        source: String,
        request_id: String,
    },

    /// A peer asks this endpoint to launch an application component.
    LaunchRequested {
        component: Option<String>,
        extras: serde_json::Value,
        relaunch_if_running: bool,
    },

    /// Sender-side completion of a managed file transfer.
    SendFileResult { status: i32, request_id: String },

    /// Receiver-side completion of a managed file transfer. `original_name`
    /// is absent when the sender's name could not be decoded.
    FileReceived {
        status: i32,
        request_id: String,
        path: std::path::PathBuf,
        original_name: Option<String>,
    },

    /// A raw stream channel was opened by a peer; claim the readable half
    /// with [`Tether::take_stream`](crate::Tether::take_stream).
    StreamOpened { peer: String, request_id: String },
}

/// Receives broadcast events. Implementations must tolerate being called from
/// arbitrary tasks.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Handle identifying one registration; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<(ObserverToken, Arc<dyn Observer>)>>,
    next_token: AtomicU64,
    connected: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. If the transport connection is already up, the
    /// connected event is synthesized immediately so a late registrant cannot
    /// miss the current state.
    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverToken {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push((token, observer.clone()));
        if self.connected.load(Ordering::Acquire) {
            Self::deliver(&observer, &Event::ApiConnected);
        }
        token
    }

    /// Removes a registration. Unknown tokens are a no-op.
    pub fn unregister(&self, token: ObserverToken) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .retain(|(t, _)| *t != token);
    }

    /// Number of current registrations.
    pub fn len(&self) -> usize {
        self.observers.read().expect("observer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all registrations.
    pub fn clear(&self) {
        self.observers.write().expect("observer lock poisoned").clear();
    }

    /// Records connection state so late registrants get [`Event::ApiConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Delivers `event` to every observer registered at the time of the call.
    pub fn broadcast(&self, event: &Event) {
        let snapshot: Vec<Arc<dyn Observer>> = self
            .observers
            .read()
            .expect("observer lock poisoned")
            .iter()
            .map(|(_, obs)| obs.clone())
            .collect();
        for observer in snapshot {
            Self::deliver(&observer, event);
        }
    }

    fn deliver(observer: &Arc<dyn Observer>, event: &Event) {
        let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
        if result.is_err() {
            tracing::error!(?event, "observer panicked while handling event");
        }
    }
}
