//! Per-endpoint connection driver.
//!
//! One tokio task owns each endpoint's WebSocket, its heartbeat, and its
//! reconnect schedule. All state transitions happen inside this task, so a
//! link never has a concurrent writer: the registry talks to it over a
//! command channel and observes it through a `watch` status channel.
//!
//! The driver outlives any individual socket. It idles while the link is
//! down, runs a connect/retry session once a connect command arrives, and
//! returns to idling after a manual disconnect, a clean close, or retry
//! exhaustion.

use crate::backoff::ReconnectSchedule;
use crate::config::{endpoint_url, LinkConfig};
use crate::dispatch::Dispatcher;
use crate::heartbeat::Heartbeat;
use crate::status::LinkStatus;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uplink_wire::{Envelope, TYPE_PONG};

/// Close code used when the heartbeat declares a link stale.
pub const STALE_CLOSE_CODE: u16 = 4000;

/// Grace period allowed for the manual-disconnect envelope to flush before
/// the socket is closed with code 1000.
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands accepted by a link driver.
#[derive(Debug)]
pub(crate) enum LinkCommand {
    /// Open the link if it is down; no-op while connecting, connected, or
    /// while a retry is already pending.
    Connect,
    /// Close the link intentionally. Cancels any pending retry and clears
    /// the subscriber set.
    Disconnect,
    /// Ship one envelope over the open socket.
    Send(Envelope),
}

/// How an open socket ended.
enum Closed {
    /// The caller asked for the close; do not reconnect.
    Manual,
    /// The peer closed with code 1000; do not reconnect.
    Clean,
    /// Anything else; hand off to the reconnect schedule.
    Abnormal,
}

/// Outcome of a dial attempt.
enum Dialed {
    Socket(WsStream),
    Failed,
    /// A manual disconnect arrived while the dial was in flight.
    Aborted,
}

pub(crate) struct LinkDriver {
    endpoint: String,
    url: String,
    config: LinkConfig,
    cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    status_tx: watch::Sender<LinkStatus>,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl LinkDriver {
    /// Spawn the driver task for one endpoint and return its handles.
    pub(crate) fn spawn(
        endpoint: String,
        config: LinkConfig,
        dispatcher: Arc<Mutex<Dispatcher>>,
    ) -> (
        mpsc::UnboundedSender<LinkCommand>,
        watch::Receiver<LinkStatus>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);
        let url = endpoint_url(&config.server, &endpoint);
        let driver = Self {
            endpoint,
            url,
            config,
            cmd_rx,
            status_tx,
            dispatcher,
        };
        tokio::spawn(driver.run());
        (cmd_tx, status_rx)
    }

    async fn run(mut self) {
        // Idle until a caller asks for a connection. The task lives for the
        // whole process so subscriber state survives disconnects.
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                LinkCommand::Connect => self.run_session().await,
                LinkCommand::Disconnect => {
                    // The link may be parked in the error state after retry
                    // exhaustion; an intentional close always settles it.
                    debug!("Link {} disconnect while idle", self.endpoint);
                    self.publish(LinkStatus::Disconnected);
                    self.clear_subscribers();
                }
                LinkCommand::Send(_) => {
                    debug!("Dropping send on closed link {}", self.endpoint);
                }
            }
        }
        debug!("Link driver for {} stopping; registry dropped", self.endpoint);
    }

    /// One connected session: dial, drive the socket, retry with backoff on
    /// abnormal ends. Returns once the link is intentionally down, cleanly
    /// closed by the peer, or out of retry budget.
    async fn run_session(&mut self) {
        let mut schedule = ReconnectSchedule::new(self.config.reconnect.clone());

        loop {
            self.publish(LinkStatus::Connecting);

            match self.dial().await {
                Dialed::Socket(socket) => {
                    info!("Link {} connected to {}", self.endpoint, self.url);
                    schedule.reset();
                    self.publish(LinkStatus::Connected);

                    match self.drive_socket(socket).await {
                        Closed::Manual => {
                            info!("Link {} manually disconnected", self.endpoint);
                            self.publish(LinkStatus::Disconnected);
                            self.clear_subscribers();
                            return;
                        }
                        Closed::Clean => {
                            info!("Link {} closed cleanly by peer", self.endpoint);
                            self.publish(LinkStatus::Disconnected);
                            return;
                        }
                        Closed::Abnormal => {
                            self.publish(LinkStatus::Error);
                        }
                    }
                }
                Dialed::Failed => {
                    self.publish(LinkStatus::Error);
                }
                Dialed::Aborted => {
                    self.publish(LinkStatus::Disconnected);
                    self.clear_subscribers();
                    return;
                }
            }

            let Some(delay) = schedule.next_delay() else {
                warn!(
                    "Link {} giving up after {} reconnect attempts",
                    self.endpoint,
                    schedule.attempts()
                );
                return;
            };
            info!(
                "Link {} retrying in {:?} (attempt {}/{})",
                self.endpoint,
                delay,
                schedule.attempts(),
                schedule.max_attempts()
            );
            if !self.wait_retry(delay).await {
                self.publish(LinkStatus::Disconnected);
                self.clear_subscribers();
                return;
            }
        }
    }

    /// Dial the endpoint URL, racing the pending commands so a manual
    /// disconnect can abort a connect that is still in flight.
    async fn dial(&mut self) -> Dialed {
        let dial = connect_async(self.url.as_str());
        tokio::pin!(dial);

        loop {
            tokio::select! {
                result = &mut dial => {
                    return match result {
                        Ok((socket, _response)) => Dialed::Socket(socket),
                        Err(err) => {
                            warn!("Link {} failed to connect to {}: {}", self.endpoint, self.url, err);
                            Dialed::Failed
                        }
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(LinkCommand::Connect) => {
                        debug!("Link {} already connecting", self.endpoint);
                    }
                    Some(LinkCommand::Send(_)) => {
                        debug!("Dropping send on connecting link {}", self.endpoint);
                    }
                    Some(LinkCommand::Disconnect) | None => return Dialed::Aborted,
                },
            }
        }
    }

    /// Sleep out a backoff delay. Returns `false` if a manual disconnect
    /// arrived during the wait; a redundant connect leaves the pending retry
    /// in place.
    async fn wait_retry(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(LinkCommand::Connect) => {
                        debug!("Link {} retry already pending", self.endpoint);
                    }
                    Some(LinkCommand::Send(_)) => {
                        debug!("Dropping send while link {} is down", self.endpoint);
                    }
                    Some(LinkCommand::Disconnect) | None => return false,
                },
            }
        }
    }

    /// Event loop for one open socket: heartbeat ticks, outbound commands,
    /// and inbound frames.
    async fn drive_socket(&mut self, mut socket: WsStream) -> Closed {
        let mut heartbeat = Heartbeat::new(self.config.pong_timeout);
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut ping_interval = tokio::time::interval_at(start, self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ping_interval.tick() => {
                    if heartbeat.is_stale() {
                        warn!(
                            "Link {}: no pong for {:?}; force-closing",
                            self.endpoint,
                            heartbeat.since_last_pong()
                        );
                        let frame = CloseFrame {
                            code: CloseCode::from(STALE_CLOSE_CODE),
                            reason: "pong timeout".into(),
                        };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        return Closed::Abnormal;
                    }
                    let ping = Envelope::ping();
                    if let Err(err) = socket.send(Message::Text(ping.encode())).await {
                        warn!("Link {} failed to send ping: {}", self.endpoint, err);
                        return Closed::Abnormal;
                    }
                    debug!("Link {} sent ping", self.endpoint);
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(LinkCommand::Send(envelope)) => {
                        if let Err(err) = socket.send(Message::Text(envelope.encode())).await {
                            warn!("Link {} send failed: {}", self.endpoint, err);
                            return Closed::Abnormal;
                        }
                    }
                    Some(LinkCommand::Connect) => {
                        debug!("Link {} already connected", self.endpoint);
                    }
                    Some(LinkCommand::Disconnect) | None => {
                        // Best-effort goodbye with a bounded flush, then a
                        // clean close so the peer never schedules a retry.
                        let bye = Envelope::manual_disconnect();
                        if socket.send(Message::Text(bye.encode())).await.is_ok() {
                            let _ = tokio::time::timeout(DISCONNECT_GRACE, socket.flush()).await;
                        }
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "manual disconnect".into(),
                        };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        return Closed::Manual;
                    }
                },

                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(&text, &mut heartbeat);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        info!("Link {} closed by peer: {:?}", self.endpoint, code);
                        return if code == Some(CloseCode::Normal) {
                            Closed::Clean
                        } else {
                            Closed::Abnormal
                        };
                    }
                    // Transport-level ping/pong; tungstenite answers pings itself
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(other)) => {
                        debug!("Link {} ignoring non-text frame ({} bytes)", self.endpoint, other.len());
                    }
                    Some(Err(err)) => {
                        warn!("Link {} socket error: {}", self.endpoint, err);
                        return Closed::Abnormal;
                    }
                    None => {
                        warn!("Link {} socket ended without close frame", self.endpoint);
                        return Closed::Abnormal;
                    }
                },
            }
        }
    }

    /// Decode one text frame: pongs feed the heartbeat, everything else is
    /// fanned out; malformed frames are logged and dropped.
    fn handle_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        match Envelope::decode(text) {
            Ok(envelope) if envelope.kind == TYPE_PONG => {
                heartbeat.record_pong();
                debug!("Link {} received pong", self.endpoint);
            }
            Ok(envelope) if envelope.is_control() => {
                // Control vocabulary is never fanned out to subscribers
                debug!(
                    "Link {} ignoring inbound control frame {}",
                    self.endpoint, envelope.kind
                );
            }
            Ok(envelope) => {
                self.lock_dispatcher().deliver(&envelope);
            }
            Err(err) => {
                warn!("Link {} dropping malformed frame: {}", self.endpoint, err);
            }
        }
    }

    fn clear_subscribers(&self) {
        let mut dispatcher = self.lock_dispatcher();
        let dropped = dispatcher.subscriber_count();
        dispatcher.clear();
        if dropped > 0 {
            debug!("Link {} dropped {} subscribers", self.endpoint, dropped);
        }
    }

    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Dispatcher> {
        // No panics occur while the lock is held
        self.dispatcher
            .lock()
            .expect("dispatcher lock poisoned")
    }

    fn publish(&self, status: LinkStatus) {
        if *self.status_tx.borrow() != status {
            debug!("Link {} -> {}", self.endpoint, status);
            // send_replace never fails even with no receivers
            self.status_tx.send_replace(status);
        }
    }
}
