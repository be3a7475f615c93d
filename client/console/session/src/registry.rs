//! Endpoint registry and the multiplexed public API.
//!
//! The registry owns one link record per endpoint and is the only component
//! allowed to create or replace a link's driver. It is an explicit,
//! constructible object passed by reference to consumers; there is no
//! module-level singleton.

use crate::config::LinkConfig;
use crate::connection::{LinkCommand, LinkDriver};
use crate::dispatch::{Dispatcher, SubscriberId};
use crate::status::LinkStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;
use uplink_wire::Envelope;

/// One live entry in the registry.
struct Link {
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
    status_rx: watch::Receiver<LinkStatus>,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

/// Owns every endpoint link and exposes the unified client surface.
///
/// Link records are created lazily on first `connect` or `subscribe` and
/// persist for the life of the registry; `disconnect` resets a link without
/// destroying it. All calls complete without blocking on the network —
/// connection progress is observed through [`LinkRegistry::watch_status`].
pub struct LinkRegistry {
    config: LinkConfig,
    links: RwLock<HashMap<String, Link>>,
}

impl LinkRegistry {
    /// Create a registry with the given configuration
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            links: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration links are created with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open the link for `endpoint`, creating it if needed.
    ///
    /// Fire-and-forget and idempotent: a second connect while the link is
    /// connecting, connected, or awaiting a scheduled retry is a no-op.
    pub async fn connect(&self, endpoint: &str) {
        let mut links = self.links.write().await;
        let link = self.ensure_link(&mut links, endpoint);
        if link.status_rx.borrow().is_connected() {
            debug!("connect({}) ignored: already connected", endpoint);
            return;
        }
        // The driver ignores redundant connects while connecting or retrying
        let _ = link.cmd_tx.send(LinkCommand::Connect);
    }

    /// Close the link for `endpoint` intentionally.
    ///
    /// Suppresses any pending reconnect, clears the subscriber set, and is
    /// idempotent when the link is already down or unknown.
    pub async fn disconnect(&self, endpoint: &str) {
        let links = self.links.read().await;
        if let Some(link) = links.get(endpoint) {
            let _ = link.cmd_tx.send(LinkCommand::Disconnect);
        }
    }

    /// Send one envelope, stamping its timestamp when absent.
    ///
    /// Returns `false` — never an error — if the link is not currently
    /// connected or the endpoint is unknown.
    pub async fn send(&self, endpoint: &str, mut envelope: Envelope) -> bool {
        let links = self.links.read().await;
        let Some(link) = links.get(endpoint) else {
            return false;
        };
        if !link.status_rx.borrow().is_connected() {
            return false;
        }
        envelope.stamp();
        link.cmd_tx.send(LinkCommand::Send(envelope)).is_ok()
    }

    /// Register a subscriber for `kind` envelopes (or [`crate::dispatch::WILDCARD`]).
    ///
    /// Creates the link record if needed but does not open a socket. The
    /// returned subscription unregisters itself on drop.
    pub async fn subscribe(&self, endpoint: &str, kind: &str) -> Subscription {
        let mut links = self.links.write().await;
        let link = self.ensure_link(&mut links, endpoint);
        let dispatcher = Arc::clone(&link.dispatcher);
        let (id, rx) = lock_dispatcher(&dispatcher).subscribe(kind);
        Subscription {
            kind: kind.to_string(),
            id,
            rx,
            dispatcher,
        }
    }

    /// Current status; `Disconnected` for endpoints never seen
    pub async fn status(&self, endpoint: &str) -> LinkStatus {
        let links = self.links.read().await;
        links
            .get(endpoint)
            .map(|link| *link.status_rx.borrow())
            .unwrap_or(LinkStatus::Disconnected)
    }

    /// Whether the endpoint's link is currently connected
    pub async fn is_connected(&self, endpoint: &str) -> bool {
        self.status(endpoint).await.is_connected()
    }

    /// Observe every status transition for `endpoint`.
    ///
    /// The receiver yields the current value immediately, so late observers
    /// never miss the present state. Creates the link record if needed.
    pub async fn watch_status(&self, endpoint: &str) -> watch::Receiver<LinkStatus> {
        let mut links = self.links.write().await;
        self.ensure_link(&mut links, endpoint).status_rx.clone()
    }

    /// Manually disconnect every known endpoint.
    ///
    /// Invoked on process teardown; individual disconnects complete
    /// asynchronously and publish on their status streams.
    pub async fn close_all(&self) {
        let links = self.links.read().await;
        for (endpoint, link) in links.iter() {
            debug!("close_all: disconnecting {}", endpoint);
            let _ = link.cmd_tx.send(LinkCommand::Disconnect);
        }
    }

    fn ensure_link<'a>(
        &self,
        links: &'a mut HashMap<String, Link>,
        endpoint: &str,
    ) -> &'a mut Link {
        links.entry(endpoint.to_string()).or_insert_with(|| {
            debug!("creating link record for {}", endpoint);
            let dispatcher = Arc::new(Mutex::new(Dispatcher::default()));
            let (cmd_tx, status_rx) = LinkDriver::spawn(
                endpoint.to_string(),
                self.config.clone(),
                Arc::clone(&dispatcher),
            );
            Link {
                cmd_tx,
                status_rx,
                dispatcher,
            }
        })
    }
}

/// Owned receive capability for one `(endpoint, kind)` registration.
///
/// Envelopes arrive in socket order. Dropping the subscription (or calling
/// [`Subscription::unsubscribe`]) removes the registration for subsequent
/// frames; a delivery pass already in flight is unaffected.
pub struct Subscription {
    kind: String,
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Envelope>,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl Subscription {
    /// Next envelope, or `None` once the subscription is severed (manual
    /// disconnect clears all subscribers)
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Result<Envelope, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// The message type this subscription was registered for
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Explicitly remove the registration (equivalent to dropping)
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock_dispatcher(&self.dispatcher).unsubscribe(&self.kind, self.id);
    }
}

fn lock_dispatcher(dispatcher: &Arc<Mutex<Dispatcher>>) -> std::sync::MutexGuard<'_, Dispatcher> {
    // No panics occur while the lock is held
    dispatcher.lock().expect("dispatcher lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dispatch::WILDCARD;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use uplink_wire::{Envelope, TYPE_MANUAL_DISCONNECT, TYPE_PING};

    /// What the mock peer observed, in order.
    #[derive(Debug)]
    enum ServerEvent {
        /// A non-ping text frame (raw JSON)
        Frame(String),
        /// Close frame with its code, if any
        Closed(Option<u16>),
    }

    /// Per-connection behavior of the mock peer.
    #[derive(Clone, Copy)]
    enum ServerMode {
        /// Answer ping envelopes with pongs, forward everything else
        Pong,
        /// Read frames but never answer pings
        Mute,
        /// Drop the first connection's TCP stream right away, then behave
        /// like `Pong`
        DropFirst,
    }

    struct TestServer {
        server: ServerConfig,
        accepted: Arc<AtomicUsize>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    }

    async fn spawn_server(mode: ServerMode) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (event_tx, events) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if matches!(mode, ServerMode::DropFirst) && n == 0 {
                    drop(stream);
                    continue;
                }
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(frame) = socket.next().await {
                        match frame {
                            Ok(Message::Text(text)) => {
                                let is_ping = Envelope::decode(&text)
                                    .map(|e| e.kind == TYPE_PING)
                                    .unwrap_or(false);
                                if is_ping {
                                    if matches!(mode, ServerMode::Pong | ServerMode::DropFirst) {
                                        let pong = Envelope::stamped("pong").encode();
                                        if socket.send(Message::Text(pong)).await.is_err() {
                                            return;
                                        }
                                    }
                                } else {
                                    // An `echo_request` asks the peer to push
                                    // its `payload` field back as an inbound
                                    // frame; everything else is recorded.
                                    let echo = Envelope::decode(&text).ok().and_then(|e| {
                                        (e.kind == "echo_request")
                                            .then(|| e.fields.get("payload").cloned())
                                            .flatten()
                                    });
                                    if let Some(payload) = echo {
                                        if socket
                                            .send(Message::Text(payload.to_string()))
                                            .await
                                            .is_err()
                                        {
                                            return;
                                        }
                                    } else {
                                        let _ = event_tx.send(ServerEvent::Frame(text));
                                    }
                                }
                            }
                            Ok(Message::Close(frame)) => {
                                let code = frame.map(|f| u16::from(f.code));
                                let _ = event_tx.send(ServerEvent::Closed(code));
                                return;
                            }
                            Ok(_) => {}
                            Err(_) => return,
                        }
                    }
                });
            }
        });

        TestServer {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                tls: false,
            },
            accepted,
            events,
        }
    }

    fn registry_for(server: &TestServer) -> LinkRegistry {
        LinkRegistry::new(LinkConfig::fast(server.server.clone()))
    }

    async fn next_status(rx: &mut watch::Receiver<LinkStatus>) -> LinkStatus {
        timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("status change timed out")
            .expect("status channel closed");
        *rx.borrow()
    }

    async fn wait_for(rx: &mut watch::Receiver<LinkStatus>, wanted: LinkStatus) {
        timeout(Duration::from_secs(2), rx.wait_for(|s| *s == wanted))
            .await
            .expect("status wait timed out")
            .expect("status channel closed");
    }

    #[tokio::test]
    async fn test_connect_status_sequence() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/server").await;
        assert_eq!(*status.borrow(), LinkStatus::Disconnected);

        registry.connect("ws/server").await;
        assert_eq!(next_status(&mut status).await, LinkStatus::Connecting);
        assert_eq!(next_status(&mut status).await, LinkStatus::Connected);
        assert!(registry.is_connected("ws/server").await);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;
        registry.connect("ws/server").await;
        wait_for(&mut status, LinkStatus::Connected).await;
        registry.connect("ws/server").await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
        assert_eq!(*status.borrow(), LinkStatus::Connected);
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let mut server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/robot-1").await;
        registry.connect("ws/robot-1").await;
        wait_for(&mut status, LinkStatus::Connected).await;

        let sent = registry
            .send("ws/robot-1", Envelope::new("x").with_field("foo", json!(1)))
            .await;
        assert!(sent);

        let event = timeout(Duration::from_secs(2), server.events.recv())
            .await
            .unwrap()
            .unwrap();
        let ServerEvent::Frame(text) = event else {
            panic!("expected a frame, got {:?}", event);
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "x");
        assert_eq!(value["foo"], 1);
        assert!(value["timestamp"].is_u64());
    }

    #[tokio::test]
    async fn test_send_while_not_connected_returns_false() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        // Unknown endpoint
        assert!(!registry.send("ws/server", Envelope::new("x")).await);

        // Known but never connected
        let _status = registry.watch_status("ws/server").await;
        assert!(!registry.send("ws/server", Envelope::new("x")).await);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_does_not_open_a_socket() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let _sub = registry.subscribe("ws/server", WILDCARD).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(registry.status("ws/server").await, LinkStatus::Disconnected);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inbound_fanout_to_exact_and_wildcard() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut exact_a = registry.subscribe("ws/robot-1", "imu_data").await;
        let mut exact_b = registry.subscribe("ws/robot-1", "imu_data").await;
        let mut wild = registry.subscribe("ws/robot-1", WILDCARD).await;
        let mut other = registry.subscribe("ws/robot-1", "encoder_data").await;

        let mut status = registry.watch_status("ws/robot-1").await;
        registry.connect("ws/robot-1").await;
        wait_for(&mut status, LinkStatus::Connected).await;

        // Ask the peer to push an inbound imu_data frame back over the link
        let sent = registry
            .send(
                "ws/robot-1",
                Envelope::new("echo_request")
                    .with_field("payload", json!({"type": "imu_data", "yaw": 0.5})),
            )
            .await;
        assert!(sent);

        let envelope = timeout(Duration::from_secs(2), exact_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.kind, "imu_data");
        assert_eq!(envelope.fields["yaw"], json!(0.5));

        assert!(timeout(Duration::from_secs(2), exact_b.recv()).await.unwrap().is_some());
        assert!(timeout(Duration::from_secs(2), wild.recv()).await.unwrap().is_some());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_disconnect_sends_goodbye_and_suppresses_retry() {
        let mut server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;
        wait_for(&mut status, LinkStatus::Connected).await;

        registry.disconnect("ws/server").await;
        wait_for(&mut status, LinkStatus::Disconnected).await;

        // Peer sees the best-effort goodbye followed by a clean close
        let event = timeout(Duration::from_secs(2), server.events.recv())
            .await
            .unwrap()
            .unwrap();
        let ServerEvent::Frame(text) = event else {
            panic!("expected goodbye frame, got {:?}", event);
        };
        assert_eq!(
            Envelope::decode(&text).unwrap().kind,
            TYPE_MANUAL_DISCONNECT
        );
        let event = timeout(Duration::from_secs(2), server.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ServerEvent::Closed(Some(1000))));

        // No reconnect within several backoff windows
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.status("ws/server").await, LinkStatus::Disconnected);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abnormal_close_schedules_reconnect() {
        let server = spawn_server(ServerMode::DropFirst).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;

        // First connection is dropped before the handshake completes, so
        // the link errors and retries onto the healthy second connection.
        wait_for(&mut status, LinkStatus::Error).await;
        wait_for(&mut status, LinkStatus::Connected).await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        // A listener that drops every connection before the WebSocket
        // handshake, so each dial attempt fails and is counted.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let config = LinkConfig::fast(ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            tls: false,
        });
        let max_attempts = config.reconnect.max_attempts as usize;
        let registry = LinkRegistry::new(config);

        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;
        wait_for(&mut status, LinkStatus::Error).await;

        // Let the whole retry budget drain (delays total well under this)
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), max_attempts + 1);
        assert_eq!(registry.status("ws/server").await, LinkStatus::Error);

        // Parked in error: no further attempts without an explicit connect
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), max_attempts + 1);

        // An explicit connect resumes dialing
        registry.connect("ws/server").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempts.load(Ordering::SeqCst) > max_attempts + 1);
    }

    #[tokio::test]
    async fn test_disconnect_while_parked_in_error_yields_disconnected() {
        // A port with no listener, so every dial fails until the retry
        // budget drains and the link parks in the error state.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let registry = LinkRegistry::new(LinkConfig::fast(ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            tls: false,
        }));

        let mut sub = registry.subscribe("ws/server", WILDCARD).await;
        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;
        wait_for(&mut status, LinkStatus::Error).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(registry.status("ws/server").await, LinkStatus::Error);

        // An intentional close settles the parked link
        registry.disconnect("ws/server").await;
        wait_for(&mut status, LinkStatus::Disconnected).await;

        // And clears the subscriber set, as any manual disconnect does
        assert!(timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pong_timeout_forces_reconnect() {
        let server = spawn_server(ServerMode::Mute).await;
        let registry = registry_for(&server);

        let mut status = registry.watch_status("ws/server").await;
        registry.connect("ws/server").await;
        wait_for(&mut status, LinkStatus::Connected).await;

        // The mute peer never answers pings, so the heartbeat force-closes
        // and a retry brings up a second connection.
        wait_for(&mut status, LinkStatus::Error).await;
        wait_for(&mut status, LinkStatus::Connected).await;
        assert!(server.accepted.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_close_all_disconnects_every_endpoint() {
        let server = spawn_server(ServerMode::Pong).await;
        let registry = registry_for(&server);

        let mut status_a = registry.watch_status("ws/server").await;
        let mut status_b = registry.watch_status("ws/robot-1").await;
        registry.connect("ws/server").await;
        registry.connect("ws/robot-1").await;
        wait_for(&mut status_a, LinkStatus::Connected).await;
        wait_for(&mut status_b, LinkStatus::Connected).await;

        registry.close_all().await;
        wait_for(&mut status_a, LinkStatus::Disconnected).await;
        wait_for(&mut status_b, LinkStatus::Disconnected).await;
    }
}
