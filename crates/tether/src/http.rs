//! HTTP relay — asking a peer to perform an HTTP call on this endpoint's
//! behalf, with request/response correlation over plain messages.
//!
//! Each exchange is a one-shot object: build it, `send()` it once, await the
//! reply. Completion is single-assignment — the reply handler, the timeout,
//! and `abort()` all race to remove the pending entry, and whoever removes it
//! owns the terminal outcome. Late or stray replies are dropped silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use tether_core::{routes, status, Error};

use crate::engine::Tether;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// What to fetch and how. `target` names the relaying peer; it is unused when
/// a direct network path is available.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub target: Option<String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            body: None,
            target: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            body: Some(body.into()),
            target: None,
            timeout: None,
        }
    }

    /// Peer node id to relay through.
    pub fn target(mut self, node_id: impl Into<String>) -> Self {
        self.target = Some(node_id.into());
        self
    }

    /// Overrides the configured deadline for this exchange.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Terminal outcome of an exchange. `status` is the relayed HTTP status code,
/// or a negative engine code from [`status`].
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: i32,
    pub body: Option<String>,
}

impl HttpReply {
    fn failed() -> Self {
        Self {
            status: status::REQUEST_FAILED,
            body: None,
        }
    }
}

/// Wire form of a relayed request.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HttpRelayRequest {
    pub(crate) request_id: String,
    pub(crate) url: String,
    pub(crate) method: String,
    pub(crate) charset: String,
    pub(crate) body: Option<String>,
}

/// Wire form of a relayed response.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HttpRelayResponse {
    pub(crate) request_id: String,
    pub(crate) status: i32,
    pub(crate) body: Option<String>,
}

/// An in-flight relay exchange awaiting its reply.
pub(crate) struct PendingHttp {
    pub(crate) target: String,
    pub(crate) tx: oneshot::Sender<HttpReply>,
}

/// A single HTTP exchange. Obtain from [`Tether::http_exchange`]; send once.
pub struct HttpExchange {
    engine: Arc<Tether>,
    request: HttpRequest,
    request_id: String,
    sent: AtomicBool,
}

impl Tether {
    /// Builds a one-shot exchange for `request`.
    pub fn http_exchange(self: &Arc<Self>, request: HttpRequest) -> HttpExchange {
        HttpExchange {
            engine: self.clone(),
            request,
            request_id: routes::request_id(),
            sent: AtomicBool::new(false),
        }
    }

    /// Answers a relayed request received via
    /// [`Event::HttpRequestReceived`](crate::Event::HttpRequestReceived).
    pub async fn send_http_response(
        &self,
        node_id: &str,
        request_id: &str,
        status: i32,
        body: Option<String>,
    ) -> Result<(), Error> {
        let response = HttpRelayResponse {
            request_id: request_id.to_owned(),
            status,
            body,
        };
        let payload = serde_json::to_vec(&response)
            .map_err(|e| Error::config(format!("unserializable http response: {e}")))?;
        self.send_message(node_id, routes::HTTP_RESPONSE_ROUTE, payload.into())
            .await
    }

    /// Correlates an inbound relay response with its pending exchange. A reply
    /// completes an exchange only when the request id is pending AND the reply
    /// came from the node the request was relayed to; everything else is
    /// dropped without observable effect.
    pub(crate) fn handle_http_response_message(&self, source: &str, payload: &[u8]) {
        let response: HttpRelayResponse = match serde_json::from_slice(payload) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(source, error = %e, "undecodable http relay response");
                return;
            }
        };
        let removed = self
            .pending_http
            .remove_if(&response.request_id, |_, pending| pending.target == source);
        match removed {
            Some((request_id, pending)) => {
                tracing::debug!(request_id, source, status = response.status, "http reply matched");
                let _ = pending.tx.send(HttpReply {
                    status: response.status,
                    body: response.body,
                });
            }
            None => {
                tracing::debug!(
                    request_id = response.request_id,
                    source,
                    "dropping unmatched http reply"
                );
            }
        }
    }
}

impl HttpExchange {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Performs the exchange and waits for its terminal outcome.
    ///
    /// Misuse (a GET carrying a body, a second send, a relay with no target)
    /// fails synchronously with [`Error`] before any network activity.
    /// Everything that happens after the request leaves this endpoint resolves
    /// the returned [`HttpReply`] instead: send failure, peer status, timeout,
    /// or abort.
    pub async fn send(&self) -> Result<HttpReply, Error> {
        if self.request.method == HttpMethod::Get && self.request.body.is_some() {
            return Err(Error::config("a GET request cannot carry a body"));
        }
        if self.sent.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadySent);
        }

        if self.engine.direct_network_available() {
            return Ok(self.send_direct().await);
        }
        self.send_relayed().await
    }

    /// Cancels a pending exchange. The in-flight `send()` completes with
    /// [`status::ABORTED`]. Calling this when the exchange already completed
    /// (or was never sent) is a no-op.
    pub fn abort(&self) {
        if let Some((request_id, pending)) = self.engine.pending_http.remove(&self.request_id) {
            tracing::debug!(request_id, "http exchange aborted");
            let _ = pending.tx.send(HttpReply {
                status: status::ABORTED,
                body: None,
            });
        }
    }

    fn deadline(&self) -> Duration {
        self.request
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.engine.config().http.timeout_ms))
    }

    /// Direct path: this endpoint has its own network route, so the call is
    /// made locally instead of bothering a peer.
    async fn send_direct(&self) -> HttpReply {
        let client = match reqwest::Client::builder().timeout(self.deadline()).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "failed to build http client");
                return HttpReply::failed();
            }
        };
        let builder = match self.request.method {
            HttpMethod::Get => client.get(&self.request.url),
            HttpMethod::Post => {
                let builder = client.post(&self.request.url);
                match &self.request.body {
                    Some(body) => builder.body(body.clone()),
                    None => builder,
                }
            }
        };
        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                let body = response.text().await.ok();
                HttpReply { status, body }
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(url = self.request.url, "direct http request timed out");
                HttpReply {
                    status: status::TIMED_OUT,
                    body: None,
                }
            }
            Err(e) => {
                tracing::error!(url = self.request.url, error = %e, "direct http request failed");
                HttpReply::failed()
            }
        }
    }

    /// Relay path: serialize, park a pending entry, send to the target peer,
    /// then race the reply against the deadline.
    async fn send_relayed(&self) -> Result<HttpReply, Error> {
        let target = self
            .request
            .target
            .clone()
            .ok_or(Error::MissingTarget)?;
        self.engine.assert_connected()?;

        let wire = HttpRelayRequest {
            request_id: self.request_id.clone(),
            url: self.request.url.clone(),
            method: self.request.method.as_str().to_owned(),
            charset: self.engine.config().http.charset.clone(),
            body: self.request.body.clone(),
        };
        let payload = serde_json::to_vec(&wire)
            .map_err(|e| Error::config(format!("unserializable http request: {e}")))?;

        let (tx, mut rx) = oneshot::channel();
        self.engine.pending_http.insert(
            self.request_id.clone(),
            PendingHttp {
                target: target.clone(),
                tx,
            },
        );

        if let Err(e) = self
            .engine
            .transport
            .send_message(&target, routes::HTTP_REQUEST_ROUTE, payload.into())
            .await
        {
            tracing::error!(target, error = %e, "failed to relay http request");
            self.engine.pending_http.remove(&self.request_id);
            return Ok(HttpReply::failed());
        }

        match tokio::time::timeout(self.deadline(), &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // sender dropped without completing; treat as failure
            Ok(Err(_)) => Ok(HttpReply::failed()),
            Err(_) => Ok(self.resolve_timeout(rx).await),
        }
    }

    /// The deadline elapsed. If the pending entry is still ours to remove,
    /// the exchange timed out; if a writer beat us to it, its reply is
    /// already in the channel and wins.
    async fn resolve_timeout(&self, rx: oneshot::Receiver<HttpReply>) -> HttpReply {
        match self.engine.pending_http.remove(&self.request_id) {
            Some(_) => {
                tracing::warn!(request_id = self.request_id, "http exchange timed out");
                HttpReply {
                    status: status::TIMED_OUT,
                    body: None,
                }
            }
            None => rx.await.unwrap_or_else(|_| HttpReply::failed()),
        }
    }
}
