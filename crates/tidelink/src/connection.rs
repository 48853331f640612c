//! Connection manager and request correlator.
//!
//! A single background task exclusively owns the transport and every piece
//! of connection state: the pending-request map, the active-subscription
//! map, and the reconnect machinery. The public [`LinkClient`] handle talks
//! to it over a command channel, so all state transitions are serialized by
//! construction — exactly-once resolution of a pending entry never needs a
//! lock.
//!
//! Lifecycle:
//!
//! 1. Connect; resolve queued connect waiters and flush queued calls.
//! 2. Event loop: multiplex commands and inbound frames.
//! 3. On drop: reject pending requests, mark subscriptions inactive,
//!    schedule reconnect with exponential backoff + jitter (unless the peer
//!    closed normally or the user disconnected).
//! 4. On reconnect: resend the original subscribe message for every
//!    inactive subscription; entries go active again on first inbound data.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{ConnectionStatus, LinkConfig};
use crate::deadline::Deadline;
use crate::error::{LinkError, TransportError};
use crate::protocol::{ClientMessage, MessageId, ServerDelta, ServerMessage, ServerSeq};
use crate::subscription::{Subscription, SubscriptionEvent};
use crate::transport::{Connector, Transport, WsMessage};

/// Commands from the public handles to the connection task.
pub(crate) enum Cmd {
    /// Correlate a call with its eventual result.
    Call {
        message: ClientMessage,
        result_tx: oneshot::Sender<Result<Value, LinkError>>,
    },
    /// Register a subscription and send its subscribe message.
    Subscribe {
        message: ClientMessage,
        event_tx: mpsc::UnboundedSender<SubscriptionEvent>,
    },
    /// Drop a subscription, sending a stop message if it is still live.
    Unsubscribe { id: MessageId },
    /// Fire-and-forget message (no correlation).
    Send { message: ClientMessage },
    /// Resolve when the current/next connection attempt settles.
    EnsureConnected {
        result_tx: oneshot::Sender<Result<(), LinkError>>,
    },
    /// A request deadline fired.
    CallTimeout { id: MessageId },
    /// User-initiated, permanent disconnect.
    Disconnect { code: u16, reason: String },
}

/// Client handle to one logical connection.
///
/// Construction spawns the connection task and starts the first connection
/// attempt immediately; must be called from within a tokio runtime. Calls
/// and subscriptions issued while disconnected wait for the in-flight
/// attempt instead of failing outright.
pub struct LinkClient {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    connected: Arc<AtomicBool>,
    next_id: AtomicU64,
    _task: JoinHandle<()>,
}

impl LinkClient {
    /// Connect using the default tokio-tungstenite transport.
    #[cfg(feature = "native-transport")]
    pub fn new(config: LinkConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::tokio_transport::TokioConnector))
    }

    /// Connect using an injected socket implementation.
    pub fn with_connector(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = ConnectionTask {
            config,
            connector,
            cmd_tx: cmd_tx.clone(),
            connected: Arc::clone(&connected),
            transport: None,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            queued_calls: Vec::new(),
            connect_waiters: Vec::new(),
            reconnect_attempts: 0,
            reconnect_enabled: true,
            terminal_error: None,
        };
        let handle = tokio::spawn(task.run(cmd_rx));
        Self {
            cmd_tx,
            connected,
            next_id: AtomicU64::new(0),
            _task: handle,
        }
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Wait until the current (or a fresh) connection attempt settles.
    /// Resolves immediately when already connected.
    pub async fn ensure_connected(&self) -> Result<(), LinkError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::EnsureConnected { result_tx })
            .map_err(|_| LinkError::ConnectionClosed)?;
        result_rx.await.map_err(|_| LinkError::ConnectionClosed)?
    }

    /// Issue a query or mutation call and await its result.
    ///
    /// Never fails synchronously: transport problems resolve the returned
    /// future with an error (`NotConnected`, `RequestTimeout`, ...).
    pub async fn call(&self, path: &str, input: Value) -> Result<Value, LinkError> {
        let message = ClientMessage::Call {
            id: self.next_message_id(),
            path: path.to_string(),
            input,
        };
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Call { message, result_tx })
            .map_err(|_| LinkError::ConnectionClosed)?;
        result_rx.await.map_err(|_| LinkError::ConnectionClosed)?
    }

    /// Start a subscription.
    ///
    /// Never fails: connect or send problems surface as a single terminal
    /// error event on the returned stream.
    pub fn subscribe(&self, path: &str, input: Value) -> Subscription {
        let id = self.next_message_id();
        let message = ClientMessage::Subscribe {
            id,
            path: path.to_string(),
            input,
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        if self
            .cmd_tx
            .send(Cmd::Subscribe {
                message,
                event_tx: event_tx.clone(),
            })
            .is_err()
        {
            let _ = event_tx.send(SubscriptionEvent::Error(LinkError::ConnectionClosed));
        }
        Subscription::new(id, event_rx, self.cmd_tx.clone())
    }

    /// Ask the server to re-deliver a missing delta range (both ends
    /// inclusive). Fire-and-forget; typically wired to
    /// [`SyncEvent::RequestMissing`].
    ///
    /// [`SyncEvent::RequestMissing`]: crate::SyncEvent::RequestMissing
    pub fn request_missing(&self, from_seq: ServerSeq, to_seq: ServerSeq) {
        let message = ClientMessage::RequestMissing {
            id: self.next_message_id(),
            from_seq,
            to_seq,
        };
        let _ = self.cmd_tx.send(Cmd::Send { message });
    }

    /// Permanently disconnect: rejects all pending requests, ends all
    /// subscription streams, disables auto-reconnect, closes the socket.
    pub fn disconnect(&self, code: u16, reason: impl Into<String>) {
        let _ = self.cmd_tx.send(Cmd::Disconnect {
            code,
            reason: reason.into(),
        });
    }

    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl std::fmt::Debug for LinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct PendingRequest {
    result_tx: oneshot::Sender<Result<Value, LinkError>>,
    // Owned timer; dropped (and thereby cancelled) with the entry.
    _deadline: Deadline,
}

struct ActiveSubscription {
    /// The subscribe message as originally sent, resent verbatim after a
    /// reconnect.
    original_message: ClientMessage,
    event_tx: mpsc::UnboundedSender<SubscriptionEvent>,
    /// False until the server's first data event (also reset on reconnect).
    active: bool,
}

enum LoopSignal {
    Continue,
    ConnectionDropped,
    Shutdown,
}

struct ConnectionTask {
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    connected: Arc<AtomicBool>,
    transport: Option<Box<dyn Transport>>,
    pending: HashMap<MessageId, PendingRequest>,
    subscriptions: HashMap<MessageId, ActiveSubscription>,
    /// Calls issued while a connection attempt is in flight; flushed on
    /// open, rejected when the attempt fails.
    queued_calls: Vec<(ClientMessage, oneshot::Sender<Result<Value, LinkError>>)>,
    /// `ensure_connected` callers awaiting the in-flight attempt.
    connect_waiters: Vec<oneshot::Sender<Result<(), LinkError>>>,
    reconnect_attempts: u32,
    reconnect_enabled: bool,
    /// Why the link is permanently down, once it is.
    terminal_error: Option<LinkError>,
}

impl ConnectionTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
        // Initial connection, immediate. Failures fall through to the
        // backoff schedule below.
        self.attempt_connect().await;

        loop {
            if let Some(mut transport) = self.transport.take() {
                match self.run_connected(&mut transport, &mut cmd_rx).await {
                    LoopSignal::Shutdown => {
                        let _ = transport.close().await;
                        return;
                    }
                    // Transport is discarded; a fresh one is created on
                    // reconnect.
                    _ => {}
                }
            } else if !self.reconnect_enabled {
                match cmd_rx.recv().await {
                    Some(cmd) => {
                        if self.handle_cmd_terminal(cmd) {
                            return;
                        }
                    }
                    None => return,
                }
            } else if self.reconnect_attempts >= self.config.max_reconnect_attempts {
                self.give_up();
            } else {
                let delay = self.next_backoff_delay();
                self.notify_status(ConnectionStatus::Reconnecting {
                    attempt: self.reconnect_attempts,
                });
                log::info!(
                    "[Connection] reconnecting in {delay:?} (attempt {}/{})",
                    self.reconnect_attempts,
                    self.config.max_reconnect_attempts
                );
                if self.wait_backoff(delay, &mut cmd_rx).await {
                    return;
                }
                self.attempt_connect().await;
            }
        }
    }

    /// Multiplex commands and inbound frames until the connection drops or
    /// the task shuts down.
    async fn run_connected(
        &mut self,
        transport: &mut Box<dyn Transport>,
        cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    ) -> LoopSignal {
        loop {
            let signal = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd_connected(cmd, transport).await,
                    None => {
                        log::debug!("[Connection] all client handles dropped; shutting down");
                        self.shutdown_cleanup();
                        LoopSignal::Shutdown
                    }
                },
                event = transport.recv() => self.handle_transport_event(event),
            };
            if !matches!(signal, LoopSignal::Continue) {
                return signal;
            }
        }
    }

    /// Sleep out the backoff delay while still serving commands.
    /// Returns true when the task should shut down.
    async fn wait_backoff(
        &mut self,
        delay: Duration,
        cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_cmd_disconnected(cmd) {
                            return true;
                        }
                    }
                    None => return true,
                },
                _ = &mut sleep => return false,
            }
        }
    }

    async fn attempt_connect(&mut self) {
        self.notify_status(ConnectionStatus::Connecting);
        log::debug!("[Connection] connecting to {}", self.config.url);
        match self.connector.connect(&self.config.url).await {
            Ok(mut transport) => {
                log::info!("[Connection] connected to {}", self.config.url);
                self.reconnect_attempts = 0;
                self.connected.store(true, Ordering::SeqCst);
                self.notify_status(ConnectionStatus::Connected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.send_inactive_subscribes(&mut transport).await;
                let queued: Vec<_> = self.queued_calls.drain(..).collect();
                for (message, result_tx) in queued {
                    self.register_and_send_call(message, result_tx, &mut transport)
                        .await;
                }
                self.transport = Some(transport);
            }
            Err(e) => {
                log::warn!("[Connection] connect failed: {e}");
                let err = LinkError::from(e);
                // Only this attempt's waiters fail; waiters registered later
                // join the next attempt.
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                for (_, result_tx) in self.queued_calls.drain(..) {
                    let _ = result_tx.send(Err(LinkError::NotConnected));
                }
            }
        }
    }

    /// Send the original subscribe message for every inactive subscription:
    /// ones queued while disconnected and ones surviving a dropped
    /// connection alike. Entries stay inactive until their first data event.
    async fn send_inactive_subscribes(&mut self, transport: &mut Box<dyn Transport>) {
        let ids: Vec<MessageId> = self
            .subscriptions
            .iter()
            .filter(|(_, entry)| !entry.active)
            .map(|(id, _)| *id)
            .collect();
        if ids.is_empty() {
            return;
        }
        log::info!(
            "[Connection] sending subscribe for {} inactive subscription(s)",
            ids.len()
        );
        for id in ids {
            let Some(entry) = self.subscriptions.get(&id) else {
                continue;
            };
            let frame = match self.config.codec.encode(&entry.original_message) {
                Ok(frame) => frame,
                Err(e) => {
                    self.fail_subscription(id, e);
                    continue;
                }
            };
            if let Err(e) = transport.send(frame).await {
                // The fresh connection is already failing; the recv loop
                // will notice and tear down. Entries stay inactive.
                log::warn!("[Connection] resubscribe send failed: {e}");
                break;
            }
        }
    }

    async fn register_and_send_call(
        &mut self,
        message: ClientMessage,
        result_tx: oneshot::Sender<Result<Value, LinkError>>,
        transport: &mut Box<dyn Transport>,
    ) {
        let id = message.id();
        let frame = match self.config.codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = result_tx.send(Err(e));
                return;
            }
        };
        // Entry and timer exist before the write so a racing result or
        // timeout always finds the entry.
        let cmd_tx = self.cmd_tx.clone();
        let deadline = Deadline::after(self.config.request_timeout, move || {
            let _ = cmd_tx.send(Cmd::CallTimeout { id });
        });
        self.pending.insert(
            id,
            PendingRequest {
                result_tx,
                _deadline: deadline,
            },
        );
        if let Err(e) = transport.send(frame).await
            && let Some(entry) = self.pending.remove(&id)
        {
            let _ = entry.result_tx.send(Err(LinkError::Transport(e)));
        }
    }

    async fn handle_cmd_connected(
        &mut self,
        cmd: Cmd,
        transport: &mut Box<dyn Transport>,
    ) -> LoopSignal {
        match cmd {
            Cmd::Call { message, result_tx } => {
                self.register_and_send_call(message, result_tx, transport)
                    .await;
            }
            Cmd::Subscribe { message, event_tx } => {
                let id = message.id();
                self.subscriptions.insert(
                    id,
                    ActiveSubscription {
                        original_message: message.clone(),
                        event_tx,
                        active: false,
                    },
                );
                match self.config.codec.encode(&message) {
                    Ok(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            self.fail_subscription(id, LinkError::Transport(e));
                        }
                    }
                    Err(e) => self.fail_subscription(id, e),
                }
            }
            Cmd::Unsubscribe { id } => {
                if let Some(entry) = self.subscriptions.remove(&id) {
                    let _ = entry.event_tx.send(SubscriptionEvent::End);
                    let stop = ClientMessage::SubscriptionStop { id };
                    if let Ok(frame) = self.config.codec.encode(&stop)
                        && let Err(e) = transport.send(frame).await
                    {
                        log::debug!("[Connection] stop message for {id} failed: {e}");
                    }
                }
            }
            Cmd::Send { message } => {
                if let Ok(frame) = self.config.codec.encode(&message) {
                    let _ = transport.send(frame).await;
                }
            }
            Cmd::EnsureConnected { result_tx } => {
                let _ = result_tx.send(Ok(()));
            }
            Cmd::CallTimeout { id } => self.timeout_call(id),
            Cmd::Disconnect { code, reason } => {
                log::info!("[Connection] disconnect requested (code {code}: {reason})");
                self.terminal_error = Some(LinkError::ConnectionClosed);
                self.shutdown_cleanup();
                let _ = transport.send(WsMessage::Close { code: Some(code) }).await;
                return LoopSignal::Shutdown;
            }
        }
        LoopSignal::Continue
    }

    /// Commands while a reconnect is scheduled: calls and subscriptions
    /// queue for the next attempt instead of failing.
    fn handle_cmd_disconnected(&mut self, cmd: Cmd) -> bool {
        match cmd {
            Cmd::Call { message, result_tx } => {
                self.queued_calls.push((message, result_tx));
            }
            Cmd::Subscribe { message, event_tx } => {
                self.subscriptions.insert(
                    message.id(),
                    ActiveSubscription {
                        original_message: message,
                        event_tx,
                        active: false,
                    },
                );
            }
            Cmd::Unsubscribe { id } => {
                // Socket is down; dropping the entry is the whole job.
                if let Some(entry) = self.subscriptions.remove(&id) {
                    let _ = entry.event_tx.send(SubscriptionEvent::End);
                }
            }
            Cmd::Send { .. } => {
                log::debug!("[Connection] dropping outbound message while disconnected");
            }
            Cmd::EnsureConnected { result_tx } => {
                self.connect_waiters.push(result_tx);
            }
            Cmd::CallTimeout { id } => self.timeout_call(id),
            Cmd::Disconnect { code, reason } => {
                log::info!("[Connection] disconnect requested (code {code}: {reason})");
                self.terminal_error = Some(LinkError::ConnectionClosed);
                self.shutdown_cleanup();
                return true;
            }
        }
        false
    }

    /// Commands once the link is permanently down (normal close, reconnect
    /// exhausted): everything fails fast with the terminal error.
    fn handle_cmd_terminal(&mut self, cmd: Cmd) -> bool {
        let err = self
            .terminal_error
            .clone()
            .unwrap_or(LinkError::NotConnected);
        match cmd {
            Cmd::Call { result_tx, .. } => {
                let _ = result_tx.send(Err(err));
            }
            Cmd::Subscribe { event_tx, .. } => {
                let _ = event_tx.send(SubscriptionEvent::Error(err));
            }
            Cmd::Unsubscribe { id } => {
                if let Some(entry) = self.subscriptions.remove(&id) {
                    let _ = entry.event_tx.send(SubscriptionEvent::End);
                }
            }
            Cmd::Send { .. } => {}
            Cmd::EnsureConnected { result_tx } => {
                let _ = result_tx.send(Err(err));
            }
            Cmd::CallTimeout { id } => self.timeout_call(id),
            Cmd::Disconnect { .. } => {
                self.shutdown_cleanup();
                return true;
            }
        }
        false
    }

    fn handle_transport_event(
        &mut self,
        event: Option<Result<WsMessage, TransportError>>,
    ) -> LoopSignal {
        match event {
            Some(Ok(frame @ (WsMessage::Text(_) | WsMessage::Binary(_)))) => {
                match self.config.codec.decode(&frame) {
                    Ok(message) => self.handle_message(message),
                    // A malformed frame must not take the connection down.
                    Err(e) => log::warn!("[Connection] dropping undecodable frame: {e}"),
                }
                LoopSignal::Continue
            }
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => LoopSignal::Continue,
            Some(Ok(WsMessage::Close { code })) => {
                let normal = matches!(code, Some(1000) | Some(1001));
                log::info!(
                    "[Connection] closed by peer (code {code:?}, {})",
                    if normal { "normal" } else { "abnormal" }
                );
                if normal {
                    self.terminal_error = Some(LinkError::NotConnected);
                }
                self.handle_connection_drop(!normal);
                LoopSignal::ConnectionDropped
            }
            Some(Err(e)) => {
                log::error!("[Connection] transport error: {e}");
                self.handle_connection_drop(true);
                LoopSignal::ConnectionDropped
            }
            None => {
                log::warn!("[Connection] stream ended without close frame");
                self.handle_connection_drop(true);
                LoopSignal::ConnectionDropped
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Result { id, data, error } => {
                let Some(entry) = self.pending.remove(&id) else {
                    log::debug!("[Connection] result for unknown call {id} (already resolved?)");
                    return;
                };
                let outcome = match error {
                    Some(err) => Err(LinkError::Server(err)),
                    None => Ok(data.unwrap_or(Value::Null)),
                };
                let _ = entry.result_tx.send(outcome);
            }
            ServerMessage::Ack {
                client_seq,
                server_seq,
            } => match &self.config.on_ack {
                Some(on_ack) => on_ack(client_seq, server_seq),
                None => log::debug!(
                    "[Connection] ack for client_seq {client_seq} (server_seq {server_seq}) with no ack callback"
                ),
            },
            ServerMessage::SubscriptionData {
                id,
                data,
                server_seq,
                prev_server_seq,
            } => {
                let Some(entry) = self.subscriptions.get_mut(&id) else {
                    log::debug!("[Connection] data for unknown subscription {id}");
                    return;
                };
                // First data after (re)connect confirms the subscription live.
                entry.active = true;
                let _ = entry.event_tx.send(SubscriptionEvent::Data(ServerDelta {
                    data,
                    server_seq,
                    prev_server_seq,
                }));
            }
            ServerMessage::SubscriptionError { id, error } => {
                match self.subscriptions.remove(&id) {
                    Some(entry) => {
                        let _ = entry
                            .event_tx
                            .send(SubscriptionEvent::Error(LinkError::Server(error)));
                    }
                    None => log::debug!("[Connection] error for unknown subscription {id}"),
                }
            }
            ServerMessage::SubscriptionEnd { id } => match self.subscriptions.remove(&id) {
                Some(entry) => {
                    let _ = entry.event_tx.send(SubscriptionEvent::End);
                }
                None => log::debug!("[Connection] end for unknown subscription {id}"),
            },
        }
    }

    /// Common teardown when the socket is lost. Subscriptions survive
    /// (inactive) for resubscription; pending requests cannot.
    fn handle_connection_drop(&mut self, reconnect: bool) {
        self.connected.store(false, Ordering::SeqCst);
        self.reject_all_pending(LinkError::ConnectionClosed);
        for entry in self.subscriptions.values_mut() {
            entry.active = false;
        }
        if !reconnect {
            self.reconnect_enabled = false;
        }
        self.notify_status(ConnectionStatus::Disconnected);
    }

    /// Terminal teardown for user-initiated disconnect and handle drop.
    fn shutdown_cleanup(&mut self) {
        self.reconnect_enabled = false;
        self.connected.store(false, Ordering::SeqCst);
        self.reject_all_pending(LinkError::ConnectionClosed);
        for (_, entry) in self.subscriptions.drain() {
            let _ = entry.event_tx.send(SubscriptionEvent::End);
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(LinkError::ConnectionClosed));
        }
        for (_, result_tx) in self.queued_calls.drain(..) {
            let _ = result_tx.send(Err(LinkError::ConnectionClosed));
        }
        self.notify_status(ConnectionStatus::Disconnected);
    }

    fn give_up(&mut self) {
        log::error!(
            "[Connection] giving up after {} reconnect attempt(s)",
            self.reconnect_attempts
        );
        self.reconnect_enabled = false;
        self.terminal_error = Some(LinkError::ReconnectExhausted);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(LinkError::ReconnectExhausted));
        }
        for (_, result_tx) in self.queued_calls.drain(..) {
            let _ = result_tx.send(Err(LinkError::ReconnectExhausted));
        }
        // No connection will ever carry these again; fail their streams.
        for (_, entry) in self.subscriptions.drain() {
            let _ = entry
                .event_tx
                .send(SubscriptionEvent::Error(LinkError::ReconnectExhausted));
        }
        self.notify_status(ConnectionStatus::Disconnected);
    }

    fn next_backoff_delay(&mut self) -> Duration {
        let delay = backoff_delay(
            self.reconnect_attempts,
            self.config.base_reconnect_delay,
            self.config.max_reconnect_delay,
        );
        // Every scheduling call counts, even an immediate one.
        self.reconnect_attempts += 1;
        apply_jitter(delay, self.config.jitter_band)
    }

    fn timeout_call(&mut self, id: MessageId) {
        if let Some(entry) = self.pending.remove(&id) {
            log::warn!(
                "[Connection] call {id} timed out after {:?}",
                self.config.request_timeout
            );
            let _ = entry
                .result_tx
                .send(Err(LinkError::RequestTimeout(self.config.request_timeout)));
        }
    }

    fn reject_all_pending(&mut self, error: LinkError) {
        if self.pending.is_empty() {
            return;
        }
        log::warn!(
            "[Connection] rejecting {} pending request(s): {error}",
            self.pending.len()
        );
        for (_, entry) in self.pending.drain() {
            let _ = entry.result_tx.send(Err(error.clone()));
        }
    }

    fn fail_subscription(&mut self, id: MessageId, error: LinkError) {
        if let Some(entry) = self.subscriptions.remove(&id) {
            let _ = entry.event_tx.send(SubscriptionEvent::Error(error));
        }
    }

    fn notify_status(&self, status: ConnectionStatus) {
        if let Some(on_status) = &self.config.on_status {
            on_status(status);
        }
    }
}

/// Raw exponential backoff: `min(max, base × 2^attempts)`, before jitter.
fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts)).min(max)
}

/// Scale `delay` by a factor sampled uniformly from `band`.
fn apply_jitter(delay: Duration, band: (f64, f64)) -> Duration {
    let (low, high) = band;
    if low >= high {
        return delay.mul_f64(low.max(0.0));
    }
    delay.mul_f64(rand::thread_rng().gen_range(low..=high))
}
