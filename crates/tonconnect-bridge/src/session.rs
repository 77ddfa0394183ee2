//! The per-app bridge session.
//!
//! A [`BridgeSession`] owns the SSE subscription to the wallet's bridge and
//! the session keypair. Inbound relay events are decrypted and pushed onto
//! the connector's shared queue as [`BridgeMessage`]s; delivery is gated on
//! the connector's readiness signal so no message is observed before the
//! connect URL (or restore) has been announced.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tonconnect_core::{AppRequest, BridgeEvent, BridgeMessage, ConnectRequest, RpcResponse, WalletEvent};

use crate::crypto::SessionCrypto;
use crate::errors::BridgeError;

/// Delay between SSE reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Raw envelope of a relay data event.
#[derive(Debug, Deserialize)]
struct RelayEnvelope {
    from: String,
    message: String,
}

/// Raw response envelope returned by the bridge for an outbound message.
///
/// The connector interprets `status_code`; the session does not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSendResponse {
    /// Bridge-reported status code.
    pub status_code: u16,
    /// Optional status message.
    #[serde(default)]
    pub message: Option<String>,
}

struct Inner {
    app_name: String,
    bridge_url: String,
    universal_url: String,
    crypto: SessionCrypto,
    client: reqwest::Client,
    queue: mpsc::UnboundedSender<BridgeMessage>,
    ready: watch::Receiver<bool>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    last_event_id: RwLock<Option<String>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// One live bridge session per connected app. Cheap to clone.
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<Inner>,
}

impl BridgeSession {
    /// Create a session with a fresh keypair (connect path).
    ///
    /// `ready` gates inbound delivery: the reader task holds every decoded
    /// message until the connector flips it to `true`.
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        queue: mpsc::UnboundedSender<BridgeMessage>,
        ready: watch::Receiver<bool>,
        bridge_url: impl Into<String>,
        universal_url: impl Into<String>,
    ) -> Self {
        Self::with_crypto(
            app_name,
            queue,
            ready,
            bridge_url,
            universal_url,
            SessionCrypto::generate(),
            None,
        )
    }

    /// Recreate a session from persisted key material (restore path).
    ///
    /// `last_event_id` lets the relay replay events missed while offline.
    pub fn restored(
        app_name: impl Into<String>,
        queue: mpsc::UnboundedSender<BridgeMessage>,
        ready: watch::Receiver<bool>,
        bridge_url: impl Into<String>,
        universal_url: impl Into<String>,
        private_key: &str,
        last_event_id: Option<String>,
    ) -> Result<Self, BridgeError> {
        Ok(Self::with_crypto(
            app_name,
            queue,
            ready,
            bridge_url,
            universal_url,
            SessionCrypto::from_private_key_hex(private_key)?,
            last_event_id,
        ))
    }

    fn with_crypto(
        app_name: impl Into<String>,
        queue: mpsc::UnboundedSender<BridgeMessage>,
        ready: watch::Receiver<bool>,
        bridge_url: impl Into<String>,
        universal_url: impl Into<String>,
        crypto: SessionCrypto,
        last_event_id: Option<String>,
    ) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                app_name: app_name.into(),
                bridge_url: bridge_url.into(),
                universal_url: universal_url.into(),
                crypto,
                client: reqwest::Client::new(),
                queue,
                ready,
                connected_tx,
                connected_rx,
                last_event_id: RwLock::new(last_event_id),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// App name this session belongs to.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    /// Bridge base URL.
    #[must_use]
    pub fn bridge_url(&self) -> &str {
        &self.inner.bridge_url
    }

    /// Universal link base.
    #[must_use]
    pub fn universal_url(&self) -> &str {
        &self.inner.universal_url
    }

    /// Session key material.
    #[must_use]
    pub fn crypto(&self) -> &SessionCrypto {
        &self.inner.crypto
    }

    /// Last relay event id observed on the stream.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.inner
            .last_event_id
            .read()
            .ok()
            .and_then(|id| id.clone())
    }

    /// Whether the session has not been torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Register with the relay by starting the SSE reader task.
    ///
    /// Idempotent; the `connected` signal fires once a stream is established.
    pub async fn register_session(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_event_stream(inner)));
    }

    /// Wait until the relay has accepted the SSE subscription.
    pub async fn connected(&self) {
        let mut rx = self.inner.connected_rx.clone();
        // Err means the session was torn down; treat as settled either way.
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Build the connect URL embedding the handshake request.
    pub fn generate_connect_url(&self, request: &ConnectRequest) -> Result<String, BridgeError> {
        let request_json = serde_json::to_string(request)?;
        let encoded = utf8_percent_encode(&request_json, NON_ALPHANUMERIC);
        let separator = if self.inner.universal_url.contains('?') {
            '&'
        } else {
            '?'
        };
        Ok(format!(
            "{}{}v=2&id={}&r={}",
            self.inner.universal_url,
            separator,
            self.inner.crypto.public_key_hex(),
            encoded,
        ))
    }

    /// Encrypt and send a request to the wallet over the bridge.
    ///
    /// Returns the raw bridge response envelope without interpreting it.
    pub async fn send_request(
        &self,
        request: &AppRequest,
        wallet_key: &str,
        ttl: Duration,
    ) -> Result<BridgeSendResponse, BridgeError> {
        let payload = serde_json::to_vec(request)?;
        let sealed = self.inner.crypto.encrypt(&payload, wallet_key)?;

        let url = format!(
            "{}/message?client_id={}&to={}&ttl={}",
            self.inner.bridge_url,
            self.inner.crypto.public_key_hex(),
            wallet_key,
            ttl.as_secs(),
        );

        let response = self.inner.client.post(&url).body(sealed).send().await?;
        let http_status = response.status().as_u16();
        match response.json::<BridgeSendResponse>().await {
            Ok(parsed) => Ok(parsed),
            // Some bridges answer with a bare body; fall back to the HTTP status.
            Err(e) => {
                debug!(error = %e, "bridge response was not a JSON envelope");
                Ok(BridgeSendResponse {
                    status_code: http_status,
                    message: None,
                })
            }
        }
    }

    /// Tear the session down. Idempotent; the reader task exits promptly.
    pub fn disconnect(&self) {
        self.inner.cancel.cancel();
        let _ = self.inner.connected_tx.send(false);
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("app_name", &self.inner.app_name)
            .field("bridge_url", &self.inner.bridge_url)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Reader task: subscribe, decode, deliver; reconnect until cancelled.
async fn run_event_stream(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            result = stream_events(&inner) => {
                match result {
                    Ok(()) => debug!(app = %inner.app_name, "bridge stream ended, reconnecting"),
                    Err(e) => warn!(app = %inner.app_name, error = %e, "bridge stream failed"),
                }
            }
        }

        let _ = inner.connected_tx.send(false);
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    let _ = inner.connected_tx.send(false);
}

/// One SSE subscription attempt; returns when the stream ends.
async fn stream_events(inner: &Arc<Inner>) -> Result<(), BridgeError> {
    let mut url = format!(
        "{}/events?client_id={}",
        inner.bridge_url,
        inner.crypto.public_key_hex(),
    );
    if let Ok(guard) = inner.last_event_id.read() {
        if let Some(id) = guard.as_deref() {
            url.push_str("&last_event_id=");
            url.push_str(id);
        }
    }

    let response = inner
        .client
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    let _ = inner.connected_tx.send(true);
    debug!(app = %inner.app_name, "bridge stream established");

    let mut ready = inner.ready.clone();
    let mut events = response.bytes_stream().eventsource();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| BridgeError::Stream(e.to_string()))?;

        if !event.id.is_empty() {
            if let Ok(mut guard) = inner.last_event_id.write() {
                *guard = Some(event.id.clone());
            }
        }

        // Hold delivery until the connector has announced the session. A
        // dropped sender means the announcement will never come.
        if !*ready.borrow() {
            if ready.wait_for(|announced| *announced).await.is_err() {
                return Ok(());
            }
        }

        match decode_event(inner, &event) {
            Ok(Some(message)) => {
                if inner.queue.send(message).is_err() {
                    // Connector dropped the queue; nothing left to deliver to.
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(app = %inner.app_name, error = %e, "dropping undecodable bridge event");
            }
        }
    }

    Ok(())
}

/// Decode one SSE event into a queue message. `None` for ignorable events.
fn decode_event(
    inner: &Inner,
    event: &eventsource_stream::Event,
) -> Result<Option<BridgeMessage>, BridgeError> {
    if event.event == "heartbeat" || event.data == "heartbeat" {
        return Ok(Some(BridgeMessage {
            app_name: inner.app_name.clone(),
            wallet_key: None,
            event: BridgeEvent::Heartbeat,
        }));
    }
    if event.data.is_empty() {
        return Ok(None);
    }

    let envelope: RelayEnvelope = serde_json::from_str(&event.data)?;
    let plaintext = inner.crypto.decrypt(&envelope.message, &envelope.from)?;
    let value: serde_json::Value = serde_json::from_slice(&plaintext)?;

    // Wallet events carry an `event` tag; everything else is an RPC reply.
    let decoded = if value.get("event").is_some() {
        BridgeEvent::Wallet(serde_json::from_value::<WalletEvent>(value)?)
    } else {
        BridgeEvent::Response(serde_json::from_value::<RpcResponse>(value)?)
    };

    Ok(Some(BridgeMessage {
        app_name: inner.app_name.clone(),
        wallet_key: Some(envelope.from),
        event: decoded,
    }))
}
