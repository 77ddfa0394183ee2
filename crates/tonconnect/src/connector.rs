//! The connector façade.
//!
//! [`TonConnect`] owns the bridge registry (one live session per app name),
//! the shared dispatch queue, the correlation table, the listener registry,
//! and the lazily started dispatch loop. All mutating operations serialize on
//! one process-wide lock; the dispatch loop never takes it, so it keeps
//! draining the queue even while a caller holds the lock awaiting network
//! I/O (notably `send`, which holds it for the whole correlation wait).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tonconnect_bridge::BridgeSession;
use tonconnect_core::{
    AppRequest, BridgeEvent, BridgeMessage, ConnectRequest, Connection, RpcResponse, Session,
    TonProofRequest, WalletApp, WalletEvent, WalletEventName,
};
use tonconnect_storage::{Storage, StorageData, StorageKey};

use crate::errors::{ConnectorError, ConnectorResult};

/// Time-to-live for outbound RPC requests and their correlation wait.
const RPC_TTL: Duration = Duration::from_secs(5 * 60);

/// Registered handler for one wallet event kind.
pub type EventListener = Arc<dyn Fn(WalletEvent) -> BoxFuture<'static, ()> + Send + Sync>;

struct ListenerTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Inner {
    manifest_url: String,
    storage: Arc<dyn Storage>,
    rpc_ttl: Duration,
    queue_tx: mpsc::UnboundedSender<BridgeMessage>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<BridgeMessage>>,
    /// The process-wide serialization lock for mutating operations.
    lock: Mutex<()>,
    bridges: RwLock<HashMap<String, BridgeSession>>,
    listeners: RwLock<HashMap<WalletEventName, EventListener>>,
    /// Correlation table: request id to its single-assignment result slot.
    /// Each key is written once by `send` and removed once, by the dispatch
    /// loop on resolution or by `send` on timeout.
    waiters: DashMap<String, oneshot::Sender<RpcResponse>>,
    listener_task: Mutex<Option<ListenerTask>>,
}

/// TON Connect client connector.
///
/// One instance per application; cheap to clone.
#[derive(Clone)]
pub struct TonConnect {
    inner: Arc<Inner>,
}

impl TonConnect {
    /// Create a connector for the app described by `manifest_url`.
    #[must_use]
    pub fn new(manifest_url: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self::with_ttl(manifest_url, storage, RPC_TTL)
    }

    fn with_ttl(
        manifest_url: impl Into<String>,
        storage: Arc<dyn Storage>,
        rpc_ttl: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                manifest_url: manifest_url.into(),
                storage,
                rpc_ttl,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                lock: Mutex::new(()),
                bridges: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                waiters: DashMap::new(),
                listener_task: Mutex::new(None),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Connect to a wallet.
    ///
    /// Returns the connection URL to present to the user (QR code or deep
    /// link). Fails with [`ConnectorError::ConnectionExists`] if a completed
    /// connection is already persisted; use [`Self::restore_connection`]
    /// then.
    pub async fn connect(
        &self,
        wallet: &WalletApp,
        ton_proof: Option<TonProofRequest>,
    ) -> ConnectorResult<String> {
        self.ensure_listener().await;
        let _guard = self.inner.lock.lock().await;

        // Idempotent first insert; an existing record is not an error.
        match self
            .inner
            .storage
            .insert(&wallet.app_name, StorageData::default())
            .await
        {
            Ok(()) | Err(tonconnect_storage::StorageError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        // A new connect supersedes any live session for this app.
        if let Some(existing) = self.inner.bridges.read().await.get(&wallet.app_name) {
            if existing.is_alive() {
                existing.disconnect();
            }
        }

        let connection = self.inner.storage.get_connection(&wallet.app_name).await?;
        if connection.as_ref().is_some_and(Connection::is_connected) {
            return Err(ConnectorError::ConnectionExists(wallet.app_name.clone()));
        }

        let bridge_url = wallet
            .bridge_url()
            .ok_or_else(|| ConnectorError::UnsupportedWallet(wallet.app_name.clone()))?;
        let universal_url = wallet
            .universal_url
            .as_deref()
            .ok_or_else(|| ConnectorError::UnsupportedWallet(wallet.app_name.clone()))?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let bridge = BridgeSession::new(
            &wallet.app_name,
            self.inner.queue_tx.clone(),
            ready_rx,
            bridge_url,
            universal_url,
        );

        bridge.register_session().await;
        bridge.connected().await;

        let _ = self
            .inner
            .bridges
            .write()
            .await
            .insert(wallet.app_name.clone(), bridge.clone());

        if connection.is_none() {
            let session = Session {
                private_key: bridge.crypto().private_key_hex(),
                bridge_url: bridge.bridge_url().to_owned(),
                wallet_key: None,
            };
            let fresh = Connection::new(&wallet.app_name, session);
            self.inner
                .storage
                .set_connection(&wallet.app_name, &fresh)
                .await?;
        }

        let request = ConnectRequest::new(self.inner.manifest_url.clone(), ton_proof);
        let url = bridge.generate_connect_url(&request)?;

        // Only now is the session safe to announce; the reader task holds
        // inbound events until this flips.
        let _ = ready_tx.send(true);
        Ok(url)
    }

    /// Resume a previously approved connection.
    ///
    /// No-op if nothing is persisted for the wallet. Fails with
    /// [`ConnectorError::CorruptedConnection`] if the record is structurally
    /// incomplete.
    pub async fn restore_connection(&self, wallet: &WalletApp) -> ConnectorResult<()> {
        self.ensure_listener().await;
        let _guard = self.inner.lock.lock().await;

        let Some(connection) = self.inner.storage.get_connection(&wallet.app_name).await? else {
            return Ok(());
        };

        if connection.source.is_empty() {
            return Err(ConnectorError::CorruptedConnection {
                app: wallet.app_name.clone(),
                reason: "source is not defined".into(),
            });
        }
        let Some(session) = connection.session.as_ref() else {
            return Err(ConnectorError::CorruptedConnection {
                app: wallet.app_name.clone(),
                reason: "session is not defined".into(),
            });
        };

        let (ready_tx, ready_rx) = watch::channel(false);
        let bridge = BridgeSession::restored(
            &connection.source,
            self.inner.queue_tx.clone(),
            ready_rx,
            &session.bridge_url,
            &session.bridge_url,
            &session.private_key,
            connection.last_rpc_event_id.clone(),
        )?;

        bridge.register_session().await;

        let _ = self
            .inner
            .bridges
            .write()
            .await
            .insert(connection.source.clone(), bridge);

        // The prior handshake was already approved; no URL to announce.
        let _ = ready_tx.send(true);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // RPC
    // ─────────────────────────────────────────────────────────────────────

    /// Send a request to the wallet and await the correlated response.
    ///
    /// Assigns the request id from the connection's monotonic counter,
    /// persists the advanced counter before issuing the request, then waits
    /// up to the request time-to-live for the dispatch loop to resolve the
    /// correlation slot.
    pub async fn send(&self, app_name: &str, mut request: AppRequest) -> ConnectorResult<RpcResponse> {
        let _guard = self.inner.lock.lock().await;

        let bridge = self
            .inner
            .bridges
            .read()
            .await
            .get(app_name)
            .cloned()
            .ok_or_else(|| ConnectorError::BridgeNotFound(app_name.to_owned()))?;

        let mut connection = self
            .inner
            .storage
            .get_connection(app_name)
            .await?
            .ok_or_else(|| ConnectorError::ConnectionNotFound(app_name.to_owned()))?;

        let wallet_key = connection
            .session
            .as_ref()
            .and_then(|s| s.wallet_key.clone())
            .ok_or_else(|| ConnectorError::NotConnected(app_name.to_owned()))?;

        let request_id = connection.take_rpc_request_id();
        request.id = Some(request_id.clone());
        self.inner.storage.set_connection(app_name, &connection).await?;

        let response = bridge
            .send_request(&request, &wallet_key, self.inner.rpc_ttl)
            .await?;
        debug!(app = app_name, id = %request_id, status = response.status_code, "request submitted");

        if response.status_code != 200 {
            return Err(ConnectorError::Rpc(response));
        }

        let (slot_tx, slot_rx) = oneshot::channel();
        let _ = self.inner.waiters.insert(request_id.clone(), slot_tx);

        let outcome = tokio::time::timeout(self.inner.rpc_ttl, slot_rx).await;
        // The slot is removed unconditionally, resolved or not.
        let _ = self.inner.waiters.remove(&request_id);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => Err(ConnectorError::Timeout(request_id)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────

    /// Register a handler for a wallet event kind.
    ///
    /// One handler per kind; duplicate registration is an error.
    pub async fn listen<F, Fut>(
        &self,
        event: WalletEventName,
        handler: F,
    ) -> ConnectorResult<()>
    where
        F: Fn(WalletEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_listener().await;

        let mut listeners = self.inner.listeners.write().await;
        if listeners.contains_key(&event) {
            return Err(ConnectorError::ListenerExists(event));
        }
        let _ = listeners.insert(
            event,
            Arc::new(move |e| Box::pin(handler(e)) as BoxFuture<'static, ()>),
        );
        Ok(())
    }

    /// Stop the dispatch loop, disconnecting every registered bridge
    /// session. Idempotent; a later operation relaunches the loop.
    pub async fn stop_listener(&self) {
        let task = self.inner.listener_task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    /// Launch the dispatch loop if it is not running, and wait until it
    /// drains the queue. Serialized on the global lock so no message can be
    /// enqueued before a consumer exists.
    async fn ensure_listener(&self) {
        let _guard = self.inner.lock.lock().await;
        let mut slot = self.inner.listener_task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let (started_tx, mut started_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(
            self.inner.clone(),
            cancel.clone(),
            started_tx,
        ));
        *slot = Some(ListenerTask { handle, cancel });

        let _ = started_rx.wait_for(|started| *started).await;
    }
}

impl std::fmt::Debug for TonConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TonConnect")
            .field("manifest_url", &self.inner.manifest_url)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch loop
// ─────────────────────────────────────────────────────────────────────────────

/// Single consumer of the shared queue. Per-message failures are logged and
/// swallowed; cancellation disconnects every bridge session before exiting.
async fn dispatch_loop(
    inner: Arc<Inner>,
    cancel: CancellationToken,
    started: watch::Sender<bool>,
) {
    debug!("starting event dispatch loop");
    let mut queue = inner.queue_rx.lock().await;
    let _ = started.send(true);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = queue.recv() => {
                let Some(message) = message else { break };
                dispatch_message(&inner, message).await;
            }
        }
    }

    debug!("event dispatch loop stopped; disconnecting bridge sessions");
    let bridges = inner.bridges.read().await;
    for bridge in bridges.values() {
        bridge.disconnect();
    }
}

/// Resolve the owning connection and advance it through the state machine.
async fn dispatch_message(inner: &Arc<Inner>, message: BridgeMessage) {
    debug!(app = %message.app_name, "event received");

    let connection = match inner.storage.get_connection(&message.app_name).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            // The app was disconnected or removed concurrently; not fatal.
            error!(app = %message.app_name, "connection not found for queued message");
            return;
        }
        Err(e) => {
            error!(app = %message.app_name, error = %e, "failed to load connection");
            return;
        }
    };

    if let Err(e) = handle_message(inner, connection, message).await {
        error!(error = %e, "error processing event");
    }
}

async fn handle_message(
    inner: &Arc<Inner>,
    mut connection: Connection,
    message: BridgeMessage,
) -> ConnectorResult<()> {
    let event = match message.event {
        BridgeEvent::Heartbeat => {
            debug!(app = %message.app_name, "heartbeat received");
            inner
                .storage
                .set(
                    &message.app_name,
                    StorageKey::Heartbeat,
                    json!(chrono::Utc::now().timestamp()),
                )
                .await?;
            return Ok(());
        }

        BridgeEvent::Response(response) => {
            let id = response.id().to_owned();
            if let Some((_, slot)) = inner.waiters.remove(&id) {
                let _ = slot.send(response);
            } else {
                error!(app = %message.app_name, id = %id, "unexpected RPC response");
            }
            connection.last_rpc_event_id = Some(id);
            inner
                .storage
                .set_connection(&message.app_name, &connection)
                .await?;
            // Responses never reach listeners.
            return Ok(());
        }

        BridgeEvent::Wallet(event) => event,
    };

    let mut cleanup = false;
    match &event {
        WalletEvent::Connect { id, payload } => {
            connection.last_wallet_event_id = Some(*id);
            // Only an address item completes the handshake.
            if payload.ton_addr().is_some() {
                if let Some(session) = connection.session.as_mut() {
                    session.wallet_key = message.wallet_key.clone();
                }
                connection.connect_event = Some(event.clone());
            }
            inner
                .storage
                .set_connection(&message.app_name, &connection)
                .await?;
        }
        WalletEvent::Disconnect { .. } | WalletEvent::ConnectError { .. } => {
            cleanup = true;
        }
    }

    let listener = inner.listeners.read().await.get(&event.name()).cloned();
    if let Some(listener) = listener {
        listener(event.clone()).await;
    } else {
        error!(event = ?event.name(), "no listener registered for event");
    }

    // Cleanup runs after the listener; each step's failure is isolated.
    if cleanup {
        let bridge = inner.bridges.read().await.get(&message.app_name).cloned();
        match bridge {
            Some(bridge) => bridge.disconnect(),
            None => warn!(app = %message.app_name, "no bridge session to disconnect"),
        }
        if let Err(e) = inner
            .storage
            .remove(&message.app_name, StorageKey::Connection)
            .await
        {
            error!(app = %message.app_name, error = %e, "failed to remove connection");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use tonconnect_core::wallet::BridgeEndpoint;
    use tonconnect_core::{ConnectItem, ConnectPayload, ErrorPayload, TonAddressItem};
    use tonconnect_storage::MemoryStorage;

    const APP: &str = "tonkeeper";

    fn wallet_key_hex() -> String {
        "ee".repeat(32)
    }

    fn connector_with_ttl(ttl: Duration) -> (TonConnect, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let connector = TonConnect::with_ttl(
            "https://app.example/tonconnect-manifest.json",
            storage.clone(),
            ttl,
        );
        (connector, storage)
    }

    fn connector() -> (TonConnect, Arc<MemoryStorage>) {
        connector_with_ttl(Duration::from_secs(2))
    }

    fn wallet_app(bridge_url: &str) -> WalletApp {
        WalletApp {
            app_name: APP.into(),
            name: "Tonkeeper".into(),
            image: None,
            about_url: None,
            universal_url: Some("https://app.tonkeeper.com/ton-connect".into()),
            bridge: vec![BridgeEndpoint {
                kind: "sse".into(),
                url: Some(bridge_url.into()),
            }],
            platforms: vec!["ios".into()],
            dns: None,
        }
    }

    fn session(wallet_key: Option<String>) -> Session {
        Session {
            private_key: "ab".repeat(32),
            bridge_url: "https://bridge.example/bridge".into(),
            wallet_key,
        }
    }

    async fn seed_connection(storage: &MemoryStorage, wallet_key: Option<String>) -> Connection {
        let connection = Connection::new(APP, session(wallet_key));
        storage.set_connection(APP, &connection).await.unwrap();
        connection
    }

    async fn mock_sse(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(""),
            )
            .mount(server)
            .await;
    }

    fn connect_success(id: u64, with_addr: bool) -> WalletEvent {
        let items = if with_addr {
            vec![ConnectItem::TonAddr(TonAddressItem {
                address: "0:abc".into(),
                network: "-239".into(),
                public_key: Some("deadbeef".into()),
                wallet_state_init: None,
            })]
        } else {
            Vec::new()
        };
        WalletEvent::Connect {
            id,
            payload: ConnectPayload {
                items,
                device: None,
            },
        }
    }

    fn message(event: BridgeEvent) -> BridgeMessage {
        BridgeMessage {
            app_name: APP.into(),
            wallet_key: Some(wallet_key_hex()),
            event,
        }
    }

    fn push(connector: &TonConnect, msg: BridgeMessage) {
        connector.inner.queue_tx.send(msg).unwrap();
    }

    /// Insert a live bridge session without registering it at any relay.
    async fn install_bridge(connector: &TonConnect, bridge_url: &str) -> BridgeSession {
        let (ready_tx, ready_rx) = watch::channel(true);
        drop(ready_tx);
        let bridge = BridgeSession::new(
            APP,
            connector.inner.queue_tx.clone(),
            ready_rx,
            bridge_url,
            "https://app.tonkeeper.com/ton-connect",
        );
        let _ = connector
            .inner
            .bridges
            .write()
            .await
            .insert(APP.into(), bridge.clone());
        bridge
    }

    async fn eventually<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within deadline");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_returns_url_and_persists_fresh_connection() {
        let server = MockServer::start().await;
        mock_sse(&server).await;
        let (connector, storage) = connector();

        let url = connector
            .connect(&wallet_app(&server.uri()), None)
            .await
            .unwrap();
        assert!(url.starts_with("https://app.tonkeeper.com/ton-connect?v=2&id="));

        let connection = storage.get_connection(APP).await.unwrap().unwrap();
        assert!(!connection.is_connected());
        assert_eq!(connection.next_rpc_request_id, 0);
        let session = connection.session.unwrap();
        assert_eq!(session.bridge_url, server.uri());
        assert!(session.wallet_key.is_none());

        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_with_proof_embeds_both_items() {
        let server = MockServer::start().await;
        mock_sse(&server).await;
        let (connector, _storage) = connector();

        let url = connector
            .connect(
                &wallet_app(&server.uri()),
                Some(TonProofRequest {
                    payload: "challenge".into(),
                }),
            )
            .await
            .unwrap();
        // `ton_proof` is percent-encoded inside the `r` parameter.
        assert!(url.contains("ton%5Fproof") || url.contains("ton_proof"));

        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_on_connected_app_fails_both_times_without_side_effects() {
        let (connector, storage) = connector();
        let mut connection = seed_connection(&storage, Some(wallet_key_hex())).await;
        connection.connect_event = Some(connect_success(1, true));
        storage.set_connection(APP, &connection).await.unwrap();

        let wallet = wallet_app("https://bridge.example/bridge");
        for _ in 0..2 {
            let err = connector.connect(&wallet, None).await.unwrap_err();
            assert_matches!(err, ConnectorError::ConnectionExists(_));
        }

        assert!(connector.inner.bridges.read().await.is_empty());
        assert_eq!(
            storage.get_connection(APP).await.unwrap(),
            Some(connection)
        );
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_supersedes_live_bridge_session() {
        let server = MockServer::start().await;
        mock_sse(&server).await;
        let (connector, _storage) = connector();
        let wallet = wallet_app(&server.uri());

        let _ = connector.connect(&wallet, None).await.unwrap();
        let first = connector
            .inner
            .bridges
            .read()
            .await
            .get(APP)
            .cloned()
            .unwrap();
        assert!(first.is_alive());

        let _ = connector.connect(&wallet, None).await.unwrap();
        let second = connector
            .inner
            .bridges
            .read()
            .await
            .get(APP)
            .cloned()
            .unwrap();

        assert!(!first.is_alive());
        assert!(second.is_alive());
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_rejects_wallet_without_sse_bridge() {
        let (connector, _storage) = connector();
        let mut wallet = wallet_app("https://bridge.example/bridge");
        wallet.bridge = vec![BridgeEndpoint {
            kind: "js".into(),
            url: None,
        }];

        assert_matches!(
            connector.connect(&wallet, None).await,
            Err(ConnectorError::UnsupportedWallet(_))
        );
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn restore_without_persisted_record_is_silent_noop() {
        let (connector, _storage) = connector();
        connector
            .restore_connection(&wallet_app("https://bridge.example/bridge"))
            .await
            .unwrap();
        assert!(connector.inner.bridges.read().await.is_empty());
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn restore_fails_on_record_without_session() {
        let (connector, storage) = connector();
        let connection = Connection {
            source: APP.into(),
            session: None,
            connect_event: None,
            last_wallet_event_id: None,
            last_rpc_event_id: None,
            next_rpc_request_id: 0,
        };
        storage.set_connection(APP, &connection).await.unwrap();

        assert_matches!(
            connector
                .restore_connection(&wallet_app("https://bridge.example/bridge"))
                .await,
            Err(ConnectorError::CorruptedConnection { .. })
        );
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn restore_reuses_persisted_session_key() {
        let server = MockServer::start().await;
        mock_sse(&server).await;
        let (connector, storage) = connector();

        let mut connection = Connection::new(
            APP,
            Session {
                private_key: "ab".repeat(32),
                bridge_url: server.uri(),
                wallet_key: Some(wallet_key_hex()),
            },
        );
        connection.connect_event = Some(connect_success(1, true));
        storage.set_connection(APP, &connection).await.unwrap();

        connector
            .restore_connection(&wallet_app(&server.uri()))
            .await
            .unwrap();

        let bridge = connector
            .inner
            .bridges
            .read()
            .await
            .get(APP)
            .cloned()
            .unwrap();
        let expected = tonconnect_bridge::SessionCrypto::from_private_key_hex(&"ab".repeat(32))
            .unwrap()
            .public_key_hex();
        assert_eq!(bridge.crypto().public_key_hex(), expected);
        connector.stop_listener().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch loop
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn heartbeat_persists_timestamp_and_skips_listeners() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, None).await;

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        connector
            .listen(WalletEventName::Connect, move |_| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        push(&connector, message(BridgeEvent::Heartbeat));
        eventually(|| async {
            storage
                .get(APP, StorageKey::Heartbeat)
                .await
                .unwrap()
                .is_some()
        })
        .await;

        let connection = storage.get_connection(APP).await.unwrap().unwrap();
        assert!(connection.connect_event.is_none());
        assert!(connection.last_wallet_event_id.is_none());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_event_binds_wallet_key_and_invokes_listener_once() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, None).await;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        connector
            .listen(WalletEventName::Connect, move |event| {
                let events_tx = events_tx.clone();
                async move {
                    events_tx.send(event).unwrap();
                }
            })
            .await
            .unwrap();

        let event = connect_success(17, true);
        push(&connector, message(BridgeEvent::Wallet(event.clone())));

        let delivered = events_rx.recv().await.unwrap();
        assert_eq!(delivered, event);

        eventually(|| async {
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .is_some_and(|c| c.is_connected())
        })
        .await;
        let connection = storage.get_connection(APP).await.unwrap().unwrap();
        assert_eq!(connection.last_wallet_event_id, Some(17));
        assert_eq!(
            connection.session.unwrap().wallet_key,
            Some(wallet_key_hex())
        );
        assert!(events_rx.try_recv().is_err());
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_event_without_address_item_does_not_complete_handshake() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, None).await;
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();

        push(
            &connector,
            message(BridgeEvent::Wallet(connect_success(5, false))),
        );

        eventually(|| async {
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .is_some_and(|c| c.last_wallet_event_id == Some(5))
        })
        .await;
        let connection = storage.get_connection(APP).await.unwrap().unwrap();
        assert!(connection.connect_event.is_none());
        assert!(connection.session.unwrap().wallet_key.is_none());
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn disconnect_listener_runs_before_cleanup() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;
        let bridge = install_bridge(&connector, "https://bridge.example/bridge").await;

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let storage_in_handler = storage.clone();
        connector
            .listen(WalletEventName::Disconnect, move |_| {
                let storage = storage_in_handler.clone();
                let seen_tx = seen_tx.clone();
                async move {
                    // The record must still be present while the listener runs.
                    let still_there = storage.get_connection(APP).await.unwrap().is_some();
                    seen_tx.send(still_there).unwrap();
                }
            })
            .await
            .unwrap();

        push(
            &connector,
            message(BridgeEvent::Wallet(WalletEvent::Disconnect {
                id: 9,
                payload: serde_json::Value::Null,
            })),
        );

        assert!(seen_rx.recv().await.unwrap());
        eventually(|| async { storage.get_connection(APP).await.unwrap().is_none() }).await;
        assert!(!bridge.is_alive());
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn connect_error_removes_connection_after_listener() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, None).await;

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        connector
            .listen(WalletEventName::ConnectError, move |_| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        push(
            &connector,
            message(BridgeEvent::Wallet(WalletEvent::ConnectError {
                id: 2,
                payload: ErrorPayload {
                    code: 300,
                    message: "user rejected".into(),
                },
            })),
        );

        eventually(|| async { storage.get_connection(APP).await.unwrap().is_none() }).await;
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn message_for_unknown_app_is_dropped() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, None).await;

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        connector
            .listen(WalletEventName::Connect, move |_| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        // No record exists for "ghost"; the loop must log, drop, and keep
        // draining. The queue is FIFO, so once the trailing heartbeat lands
        // the ghost message has been handled.
        push(
            &connector,
            BridgeMessage {
                app_name: "ghost".into(),
                wallet_key: Some(wallet_key_hex()),
                event: BridgeEvent::Wallet(connect_success(1, true)),
            },
        );
        push(&connector, message(BridgeEvent::Heartbeat));

        eventually(|| async {
            storage
                .get(APP, StorageKey::Heartbeat)
                .await
                .unwrap()
                .is_some()
        })
        .await;
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(storage.get_connection("ghost").await.unwrap().is_none());
        connector.stop_listener().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Correlation
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn response_resolves_pending_slot_and_records_event_id() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();

        let (slot_tx, slot_rx) = oneshot::channel();
        let _ = connector.inner.waiters.insert("3".to_owned(), slot_tx);

        let response = RpcResponse::Success {
            result: serde_json::json!("te6cc=="),
            id: "3".into(),
        };
        push(
            &connector,
            message(BridgeEvent::Response(response.clone())),
        );

        assert_eq!(slot_rx.await.unwrap(), response);
        assert!(!connector.inner.waiters.contains_key("3"));
        eventually(|| async {
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .is_some_and(|c| c.last_rpc_event_id.as_deref() == Some("3"))
        })
        .await;
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn unexpected_response_is_dropped_but_recorded() {
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;

        let invoked = Arc::new(AtomicUsize::new(0));
        for kind in [
            WalletEventName::Connect,
            WalletEventName::ConnectError,
            WalletEventName::Disconnect,
        ] {
            let counter = invoked.clone();
            connector
                .listen(kind, move |_| {
                    let counter = counter.clone();
                    async move {
                        let _ = counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await
                .unwrap();
        }

        push(
            &connector,
            message(BridgeEvent::Response(RpcResponse::Error {
                error: ErrorPayload {
                    code: 300,
                    message: "rejected".into(),
                },
                id: "9".into(),
            })),
        );

        eventually(|| async {
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .is_some_and(|c| c.last_rpc_event_id.as_deref() == Some("9"))
        })
        .await;
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        connector.stop_listener().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // send
    // ─────────────────────────────────────────────────────────────────────

    async fn mock_message_endpoint(server: &MockServer, status_code: u16) {
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "OK",
                "statusCode": status_code
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn send_assigns_monotonic_ids_and_returns_matched_response() {
        let server = MockServer::start().await;
        mock_message_endpoint(&server, 200).await;
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;
        let _ = install_bridge(&connector, &server.uri()).await;
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();

        // Resolve each request as soon as its slot appears.
        let resolver = connector.clone();
        let responder = tokio::spawn(async move {
            for id in ["0", "1"] {
                while !resolver.inner.waiters.contains_key(id) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                push(
                    &resolver,
                    message(BridgeEvent::Response(RpcResponse::Success {
                        result: serde_json::json!(id),
                        id: id.into(),
                    })),
                );
            }
        });

        let first = connector
            .send(APP, AppRequest::send_transaction("{}"))
            .await
            .unwrap();
        assert_eq!(first.id(), "0");

        let second = connector
            .send(APP, AppRequest::sign_data("{}"))
            .await
            .unwrap();
        assert_eq!(second.id(), "1");

        responder.await.unwrap();
        let connection = storage.get_connection(APP).await.unwrap().unwrap();
        assert_eq!(connection.next_rpc_request_id, 2);
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn send_times_out_and_late_response_is_dropped() {
        let server = MockServer::start().await;
        mock_message_endpoint(&server, 200).await;
        let (connector, storage) = connector_with_ttl(Duration::from_millis(100));
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;
        let _ = install_bridge(&connector, &server.uri()).await;
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();

        let err = connector
            .send(APP, AppRequest::send_transaction("{}"))
            .await
            .unwrap_err();
        assert_matches!(err, ConnectorError::Timeout(ref id) if id == "0");
        assert!(!connector.inner.waiters.contains_key("0"));

        // The late reply is logged as unexpected, recorded, and dropped.
        push(
            &connector,
            message(BridgeEvent::Response(RpcResponse::Success {
                result: serde_json::json!("late"),
                id: "0".into(),
            })),
        );
        eventually(|| async {
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .is_some_and(|c| c.last_rpc_event_id.as_deref() == Some("0"))
        })
        .await;
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn send_request_ids_continue_after_restore() {
        let server = MockServer::start().await;
        mock_sse(&server).await;
        mock_message_endpoint(&server, 200).await;
        let (connector, storage) = connector_with_ttl(Duration::from_millis(100));

        let mut connection = Connection::new(
            APP,
            Session {
                private_key: "ab".repeat(32),
                bridge_url: server.uri(),
                wallet_key: Some(wallet_key_hex()),
            },
        );
        connection.connect_event = Some(connect_success(1, true));
        connection.next_rpc_request_id = 5;
        storage.set_connection(APP, &connection).await.unwrap();

        connector
            .restore_connection(&wallet_app(&server.uri()))
            .await
            .unwrap();

        let err = connector
            .send(APP, AppRequest::send_transaction("{}"))
            .await
            .unwrap_err();
        assert_matches!(err, ConnectorError::Timeout(ref id) if id == "5");
        assert_eq!(
            storage
                .get_connection(APP)
                .await
                .unwrap()
                .unwrap()
                .next_rpc_request_id,
            6
        );
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn send_fails_without_bridge_or_connection_or_handshake() {
        let (connector, storage) = connector();

        assert_matches!(
            connector.send(APP, AppRequest::send_transaction("{}")).await,
            Err(ConnectorError::BridgeNotFound(_))
        );

        let _ = install_bridge(&connector, "https://bridge.example/bridge").await;
        assert_matches!(
            connector.send(APP, AppRequest::send_transaction("{}")).await,
            Err(ConnectorError::ConnectionNotFound(_))
        );

        let _ = seed_connection(&storage, None).await;
        assert_matches!(
            connector.send(APP, AppRequest::send_transaction("{}")).await,
            Err(ConnectorError::NotConnected(_))
        );
    }

    #[tokio::test]
    async fn send_surfaces_bridge_rejection() {
        let server = MockServer::start().await;
        mock_message_endpoint(&server, 403).await;
        let (connector, storage) = connector();
        let _ = seed_connection(&storage, Some(wallet_key_hex())).await;
        let _ = install_bridge(&connector, &server.uri()).await;

        let err = connector
            .send(APP, AppRequest::send_transaction("{}"))
            .await
            .unwrap_err();
        assert_matches!(err, ConnectorError::Rpc(ref response) if response.status_code == 403);
        // No slot is leaked for a request the bridge refused.
        assert!(connector.inner.waiters.is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listener bootstrap
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_listener_registration_fails() {
        let (connector, _storage) = connector();
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();
        assert_matches!(
            connector.listen(WalletEventName::Connect, |_| async {}).await,
            Err(ConnectorError::ListenerExists(WalletEventName::Connect))
        );
        connector.stop_listener().await;
    }

    #[tokio::test]
    async fn stop_listener_is_idempotent_and_disconnects_bridges() {
        let (connector, storage) = connector();
        let bridge = install_bridge(&connector, "https://bridge.example/bridge").await;
        connector
            .listen(WalletEventName::Connect, |_| async {})
            .await
            .unwrap();

        connector.stop_listener().await;
        assert!(!bridge.is_alive());
        connector.stop_listener().await;

        // A later operation relaunches the loop and drains fresh messages.
        let _ = seed_connection(&storage, None).await;
        connector
            .listen(WalletEventName::Disconnect, |_| async {})
            .await
            .unwrap();
        push(&connector, message(BridgeEvent::Heartbeat));
        eventually(|| async {
            storage
                .get(APP, StorageKey::Heartbeat)
                .await
                .unwrap()
                .is_some()
        })
        .await;
        connector.stop_listener().await;
    }
}
