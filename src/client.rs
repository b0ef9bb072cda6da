//! The public client facade and its worker actor (spec §4, §6).
//!
//! Grounded on `ethers_providers`'s `WsClient`/`RequestManager` split
//! (`rpc/transports/ws2/mod.rs`, `manager.rs`): [`BayeuxClient`] is a cheap
//! handle holding an instruction sender plus the atomics a caller needs to
//! read synchronously; [`ClientActor`] owns every piece of session state and
//! runs alone on its own task, processing one [`Instruction`] to completion
//! before looking at the next — the "single-threaded cooperative worker
//! queue" spec §2 calls for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_channel::{mpsc, oneshot};
use futures_util::stream::StreamExt;
use serde_json::Value;
use url::Url;

use crate::delegate::{CallbackQueue, Delegate, DelegateSink, NoopDelegate, Queue, TokioQueue};
use crate::dispatch::{self, MetaChannelDispatcher, MetaChannelHandlers, Route};
use crate::error::BayeuxError;
use crate::macros::bx_warn;
use crate::message::{decode_batch, Message, MessageIdGenerator, MetaChannel, WEBSOCKET_CONNECTION_TYPE};
use crate::reconnect::{self, AdviceOutcome, AlwaysReachable, PosixError, Reachability, TransportErrorAction};
use crate::registry::{Callback, SubscriptionRegistry};
use crate::scheduler::KeepAliveScheduler;
use crate::session::Session;
use crate::transport::{http, ws::WsBackend, ws::WsSender, ConnectionDetails, TransportEvent};

type OnSuccess = Box<dyn FnOnce() + Send>;

/// Tunables and collaborators for a [`BayeuxClient`] (spec §6). Everything
/// has a sensible default except `url`.
pub struct ClientConfig {
    url: Url,
    retry_interval_secs: f64,
    reconnect_interval_secs: f64,
    may_send_handshake_async: bool,
    await_only_handshake: bool,
    max_reconnect_attempts: Option<u32>,
    delegate: Arc<dyn Delegate>,
    delegate_queue: Arc<dyn Queue>,
    callback_queue: Arc<dyn Queue>,
    reachability: Arc<dyn Reachability>,
}

impl ClientConfig {
    /// `url` is the WebSocket endpoint; the HTTP handshake fallback is
    /// derived from it (spec §9: same host, `ws(s)` swapped for `http(s)`
    /// is the caller's job if the server splits the two across hosts —
    /// this crate posts the handshake to `url` directly).
    pub fn new(url: Url) -> Self {
        Self {
            url,
            retry_interval_secs: crate::session::DEFAULT_RETRY_INTERVAL_SECS,
            reconnect_interval_secs: crate::session::DEFAULT_RECONNECT_INTERVAL_SECS,
            may_send_handshake_async: false,
            await_only_handshake: false,
            max_reconnect_attempts: None,
            delegate: Arc::new(NoopDelegate),
            delegate_queue: Arc::new(TokioQueue::current()),
            callback_queue: Arc::new(TokioQueue::current()),
            reachability: Arc::new(AlwaysReachable),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_delegate_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.delegate_queue = queue;
        self
    }

    pub fn with_callback_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.callback_queue = queue;
        self
    }

    pub fn with_retry_interval_secs(mut self, secs: f64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    pub fn with_reconnect_interval_secs(mut self, secs: f64) -> Self {
        self.reconnect_interval_secs = secs;
        self
    }

    pub fn with_may_send_handshake_async(mut self, value: bool) -> Self {
        self.may_send_handshake_async = value;
        self
    }

    pub fn with_await_only_handshake(mut self, value: bool) -> Self {
        self.await_only_handshake = value;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = Some(max);
        self
    }

    pub fn with_reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = reachability;
        self
    }
}

#[derive(Default)]
struct SharedState {
    connected: AtomicBool,
    connecting: AtomicBool,
    reconnecting: AtomicBool,
    subscribed_channels: Mutex<Vec<String>>,
}

impl SharedState {
    fn reset(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);
    }
}

enum Instruction {
    Connect { ext: Option<Value>, on_success: Option<OnSuccess> },
    Disconnect,
    Reconnect,
    Subscribe {
        channels: Vec<String>,
        callback: Callback,
        ext: Option<Value>,
        reply: oneshot::Sender<Result<(), BayeuxError>>,
    },
    Unsubscribe { channels: Vec<String> },
    UnsubscribeAll,
    Publish { channel: String, data: Value, ext: Option<Value> },
    Inbound(TransportEvent),
    SendKeepAlive,
    ReachableAgain,
}

/// A handle to a running Bayeux session. Cloning is not supported — the
/// worker task is the single owner of session state; share a `BayeuxClient`
/// behind an `Arc` if multiple call sites need one.
pub struct BayeuxClient {
    instructions: mpsc::UnboundedSender<Instruction>,
    shared: Arc<SharedState>,
}

impl BayeuxClient {
    /// Spawns the worker task and returns a handle to it. The task runs
    /// until every `BayeuxClient`/sender clone referencing it is dropped.
    pub fn new(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded();
        let shared = Arc::new(SharedState::default());

        let mut session = Session::new(config.url.clone());
        session.retry_interval_secs = config.retry_interval_secs;
        session.reconnect_interval_secs = config.reconnect_interval_secs;
        session.may_send_handshake_async = config.may_send_handshake_async;
        session.await_only_handshake = config.await_only_handshake;

        let actor = ClientActor {
            url: config.url,
            session,
            registry: SubscriptionRegistry::new(),
            dispatcher: MetaChannelDispatcher::new(),
            scheduler: KeepAliveScheduler::new(),
            reconnect_scheduler: KeepAliveScheduler::new(),
            delegate: DelegateSink::new(config.delegate, config.delegate_queue),
            callback_queue: CallbackQueue::new(config.callback_queue),
            ws: None,
            http: reqwest::Client::new(),
            id_gen: MessageIdGenerator::new(),
            reachability: config.reachability,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_attempts: 0,
            shared: shared.clone(),
            instructions: rx,
            self_tx: tx.clone(),
            pending_handshake: None,
            pending_connect: None,
            pending_disconnect: None,
            pending_subscribe: None,
            pending_unsubscribe: None,
            pending_connect_success: None,
            disconnect_pending_handshake: false,
        };

        tokio::spawn(actor.run());

        Self { instructions: tx, shared }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnecting.load(Ordering::SeqCst)
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.shared.subscribed_channels.lock().unwrap().clone()
    }

    /// Starts the handshake/connect cycle. A no-op if already connecting or
    /// connected (spec §4.1).
    pub fn connect(&self, ext: Option<Value>) {
        let _ = self.instructions.unbounded_send(Instruction::Connect { ext, on_success: None });
    }

    /// Like [`Self::connect`], but `on_success` runs once, the next time
    /// `/meta/connect` succeeds (spec §6: `connect([extension],[onSuccess])`).
    pub fn connect_with<F>(&self, ext: Option<Value>, on_success: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self
            .instructions
            .unbounded_send(Instruction::Connect { ext, on_success: Some(Box::new(on_success)) });
    }

    pub fn disconnect(&self) {
        let _ = self.instructions.unbounded_send(Instruction::Disconnect);
    }

    pub fn reconnect(&self) {
        let _ = self.instructions.unbounded_send(Instruction::Reconnect);
    }

    /// Subscribes `callback` to every channel in `channels`, sharing one
    /// registry entry. Resolves once the `/meta/subscribe` envelope has been
    /// handed to the transport — not once the server acknowledges it; that
    /// ack arrives via [`Delegate::subscription_succeeded`].
    pub async fn subscribe(
        &self,
        channels: Vec<String>,
        callback: Callback,
        ext: Option<Value>,
    ) -> Result<(), BayeuxError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.instructions
            .unbounded_send(Instruction::Subscribe { channels, callback, ext, reply: reply_tx })
            .map_err(|_| BayeuxError::WorkerGone)?;
        reply_rx.await.map_err(|_| BayeuxError::WorkerGone)?
    }

    pub fn unsubscribe(&self, channels: Vec<String>) {
        let _ = self.instructions.unbounded_send(Instruction::Unsubscribe { channels });
    }

    pub fn unsubscribe_all(&self) {
        let _ = self.instructions.unbounded_send(Instruction::UnsubscribeAll);
    }

    pub fn publish(&self, channel: impl Into<String>, data: Value, ext: Option<Value>) {
        let _ = self
            .instructions
            .unbounded_send(Instruction::Publish { channel: channel.into(), data, ext });
    }
}

/// Owns every piece of session state; lives entirely on its own task.
struct ClientActor {
    url: Url,
    session: Session,
    registry: SubscriptionRegistry,
    dispatcher: MetaChannelDispatcher<ClientActor>,
    /// Times the periodic `/meta/connect` (spec §4.5).
    scheduler: KeepAliveScheduler,
    /// Separate generation counter for reconnect delays, so a pending
    /// keep-alive and a pending reconnect never cancel each other out.
    reconnect_scheduler: KeepAliveScheduler,
    delegate: DelegateSink,
    callback_queue: CallbackQueue,
    ws: Option<WsSender>,
    http: reqwest::Client,
    id_gen: MessageIdGenerator,
    reachability: Arc<dyn Reachability>,
    max_reconnect_attempts: Option<u32>,
    reconnect_attempts: u32,
    shared: Arc<SharedState>,
    instructions: mpsc::UnboundedReceiver<Instruction>,
    self_tx: mpsc::UnboundedSender<Instruction>,

    // Permanent reply handlers (below) stash the message here instead of
    // acting on it directly, since the dispatcher's handler slots are plain
    // `fn(&mut C, Message)` and the real follow-up (opening a socket,
    // scheduling a timer) needs `.await`. `run_pending_followups` drains
    // these right after every `dispatcher.dispatch` call.
    pending_handshake: Option<Message>,
    pending_connect: Option<Message>,
    pending_disconnect: Option<Message>,
    pending_subscribe: Option<Message>,
    pending_unsubscribe: Option<Message>,

    /// Set by `chain_connect_success`'s one-shot once the meta-channel chosen
    /// by `awaitOnlyHandshake` (`Handshake` if true, else `Connect`) reports
    /// success; drained by `after_handshake_reply`/`after_connect_reply` once
    /// the corresponding follow-up has actually confirmed that state, not
    /// inline from the dispatcher's one-shot closure itself.
    pending_connect_success: Option<OnSuccess>,

    /// Set by `disconnect()` when called before a `clientId` exists yet.
    /// Consumed by `after_handshake_reply`, which sends `/meta/disconnect`
    /// with the freshly assigned `clientId` instead of proceeding to
    /// `/meta/connect` (spec §4.1, testable scenario 6).
    disconnect_pending_handshake: bool,
}

impl MetaChannelHandlers for ClientActor {
    fn on_handshake_reply(&mut self, msg: Message) {
        self.pending_handshake = Some(msg);
    }
    fn on_connect_reply(&mut self, msg: Message) {
        self.pending_connect = Some(msg);
    }
    fn on_disconnect_reply(&mut self, msg: Message) {
        self.pending_disconnect = Some(msg);
    }
    fn on_subscribe_reply(&mut self, msg: Message) {
        self.pending_subscribe = Some(msg);
    }
    fn on_unsubscribe_reply(&mut self, msg: Message) {
        self.pending_unsubscribe = Some(msg);
    }
}

impl ClientActor {
    async fn run(mut self) {
        while let Some(instruction) = self.instructions.next().await {
            match instruction {
                Instruction::Connect { ext, on_success } => self.begin_connect(ext, on_success).await,
                Instruction::Disconnect => self.begin_disconnect().await,
                Instruction::Reconnect => self.begin_reconnect().await,
                Instruction::Subscribe { channels, callback, ext, reply } => {
                    self.do_subscribe(channels, callback, ext, reply)
                }
                Instruction::Unsubscribe { channels } => self.do_unsubscribe(channels),
                Instruction::UnsubscribeAll => self.do_unsubscribe_all(),
                Instruction::Publish { channel, data, ext } => self.do_publish(channel, data, ext),
                Instruction::Inbound(event) => self.handle_transport_event(event).await,
                Instruction::SendKeepAlive => self.send_keepalive().await,
                Instruction::ReachableAgain => self.handle_reachable_again().await,
            }
        }
    }

    async fn open_ws(&mut self) -> Result<(), BayeuxError> {
        let details = ConnectionDetails { url: self.url.clone() };
        let (backend, handle) = WsBackend::connect(details).await?;
        backend.spawn();
        let (sender, events) = handle.split();
        self.spawn_event_forwarder(events);
        self.ws = Some(sender);
        Ok(())
    }

    fn spawn_event_forwarder(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let sender = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if sender.unbounded_send(Instruction::Inbound(event)).is_err() {
                    break;
                }
            }
        });
    }

    fn send(&self, msg: &Message) -> Result<(), BayeuxError> {
        let ws = self.ws.as_ref().ok_or(BayeuxError::SocketNotOpen)?;
        ws.send_text(msg.to_ws_text()?)
    }

    /// Registers `cb` on the meta-channel `awaitOnlyHandshake` selects: the
    /// next `/meta/handshake` reply if set, otherwise the next `/meta/connect`
    /// reply (spec §6 "connect([extension],[onSuccess])").
    fn install_connect_success(&mut self, cb: OnSuccess) {
        let channel = if self.session.await_only_handshake { MetaChannel::Handshake } else { MetaChannel::Connect };
        self.chain_connect_success(channel, cb);
    }

    /// Chains a one-shot onto `channel` (spec §9 "Actor block chaining"): an
    /// unsuccessful reply re-chains itself onto the next one so `cb` survives
    /// transient failures, a successful reply stashes it as
    /// `pending_connect_success` for the matching `after_*_reply` follow-up
    /// to fire once it has confirmed the session actually reached that state.
    fn chain_connect_success(&mut self, channel: MetaChannel, cb: OnSuccess) {
        self.dispatcher.chain_once(channel, move |ctx: &mut Self, msg: Message| {
            let ok = msg.is_successful();
            match channel {
                MetaChannel::Handshake => ctx.on_handshake_reply(msg),
                MetaChannel::Connect => ctx.on_connect_reply(msg),
                _ => {}
            }
            if ok {
                ctx.pending_connect_success = Some(cb);
            } else {
                ctx.chain_connect_success(channel, cb);
            }
        });
    }

    async fn handshake_over_http(&mut self, msg: Message) -> Result<Message, BayeuxError> {
        let body = msg.to_http_body()?;
        let sibling = http::http_sibling(&self.url)?;
        let text = http::post_handshake(&self.http, &sibling, body).await?;
        let mut batch = decode_batch(&text)?;
        batch
            .pop()
            .ok_or_else(|| BayeuxError::MalformedJsonData("empty handshake response".to_owned()))
    }

    async fn begin_connect(&mut self, ext: Option<Value>, on_success: Option<OnSuccess>) {
        if self.session.is_connecting() || self.session.is_connected() {
            return;
        }
        self.session.begin_handshake(ext.clone());
        self.shared.connecting.store(true, Ordering::SeqCst);

        if let Some(cb) = on_success {
            self.install_connect_success(cb);
        }

        let handshake_msg = Message::handshake(ext);

        if self.open_ws().await.is_ok() {
            if let Err(e) = self.send(&handshake_msg) {
                self.delegate.failed(e);
            }
            return;
        }

        bx_warn!("websocket connect failed, falling back to HTTP for the handshake");
        match self.handshake_over_http(handshake_msg).await {
            Ok(reply) => self.process_message(reply).await,
            Err(e) => {
                self.delegate.failed(e);
                self.session.reset_to_disconnected();
                self.shared.reset();
            }
        }
    }

    async fn begin_disconnect(&mut self) {
        if !self.session.is_connected() && !self.session.is_connecting() {
            return;
        }
        if self.session.client_id.is_none() && self.session.is_connecting() {
            self.disconnect_pending_handshake = true;
            return;
        }
        self.session.begin_disconnect();
        let Some(client_id) = self.session.client_id.clone() else {
            self.session.complete_disconnect();
            self.shared.reset();
            return;
        };
        let msg = Message::disconnect(&client_id);
        if let Err(e) = self.send(&msg) {
            self.session.complete_disconnect();
            self.shared.reset();
            self.delegate.disconnected(None, Some(e));
        }
    }

    async fn begin_reconnect(&mut self) {
        if self.session.is_reconnecting() {
            return;
        }
        if let Some(max) = self.max_reconnect_attempts {
            if self.reconnect_attempts >= max {
                self.delegate.failed(BayeuxError::TooManyReconnects);
                self.session.reset_to_disconnected();
                self.shared.reset();
                return;
            }
        }
        self.session.reconnecting = true;
        self.shared.reconnecting.store(true, Ordering::SeqCst);
        self.reconnect_attempts += 1;

        if let Some(ws) = self.ws.take() {
            ws.close();
        }
        self.session.state = crate::session::SessionState::Disconnected;
        let ext = self.session.connection_extension.clone();
        self.begin_connect(ext, None).await;
    }

    async fn handle_reachable_again(&mut self) {
        if reconnect::should_reconnect_after_reachable(
            false,
            self.session.is_reconnecting(),
            self.session.reconnect_interval_secs,
        ) {
            self.begin_reconnect().await;
        }
    }

    fn do_subscribe(
        &mut self,
        channels: Vec<String>,
        callback: Callback,
        ext: Option<Value>,
        reply: oneshot::Sender<Result<(), BayeuxError>>,
    ) {
        if !self.session.is_connected() {
            let _ = reply.send(Err(BayeuxError::SocketNotOpen));
            return;
        }
        let client_id = self.session.client_id.clone().unwrap_or_default();
        let outcome = self.registry.subscribe(&client_id, channels, callback, ext).and_then(|msg| self.send(&msg));
        *self.shared.subscribed_channels.lock().unwrap() = self.registry.subscribed_channels();
        let _ = reply.send(outcome);
    }

    fn do_unsubscribe(&mut self, channels: Vec<String>) {
        // Local removal is unconditional (spec §4.3); only the wire envelope
        // needs a live `clientId`.
        let client_id = self.session.client_id.clone();
        let msg = self.registry.unsubscribe(client_id.as_deref().unwrap_or_default(), &channels);
        *self.shared.subscribed_channels.lock().unwrap() = self.registry.subscribed_channels();
        if client_id.is_some() {
            let _ = self.send(&msg);
        }
    }

    fn do_unsubscribe_all(&mut self) {
        if let Some(client_id) = self.session.client_id.clone() {
            for msg in self.registry.unsubscribe_all(&client_id) {
                let _ = self.send(&msg);
            }
        }
        self.registry.clear();
        self.shared.subscribed_channels.lock().unwrap().clear();
    }

    fn do_publish(&mut self, channel: String, data: Value, ext: Option<Value>) {
        let Some(client_id) = self.session.client_id.clone() else {
            self.delegate.failed(BayeuxError::SocketNotOpen);
            return;
        };
        let id = self.id_gen.next();
        let msg = Message::publish(&channel, &client_id, data, id, ext);
        if let Err(e) = self.send(&msg) {
            self.delegate.failed(e);
        }
    }

    /// Sends `/meta/connect`: the recurring keep-alive once `Connected`, or
    /// the deferred initial connect while still `Connecting` after a
    /// successful handshake. Either way, a session that has moved on (reset,
    /// disconnected) by the time this fires is a stale send and gets
    /// discarded (spec §4.5).
    async fn send_keepalive(&mut self) {
        if !self.session.is_connected() && !self.session.is_connecting() {
            return;
        }
        let Some(client_id) = self.session.client_id.clone() else { return };
        let connection_type =
            self.session.connection_type.clone().unwrap_or_else(|| WEBSOCKET_CONNECTION_TYPE.to_owned());
        let msg = Message::connect(&client_id, &connection_type, self.session.connection_extension.clone());
        if let Err(e) = self.send(&msg) {
            self.ws = None;
            self.delegate.failed(e);
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&self) {
        let sender = self.self_tx.clone();
        self.reconnect_scheduler.schedule(self.session.reconnect_interval_secs, move || {
            let _ = sender.unbounded_send(Instruction::Reconnect);
        });
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => match decode_batch(&text) {
                Ok(batch) => {
                    for msg in batch {
                        self.process_message(msg).await;
                    }
                }
                Err(e) => self.delegate.failed(e),
            },
            TransportEvent::Closed(reason) => {
                self.ws = None;
                if self.session.is_connected() || self.session.is_connecting() {
                    self.delegate.disconnected(
                        reason.clone(),
                        Some(BayeuxError::SocketClosed(reason.unwrap_or_default())),
                    );
                    self.schedule_reconnect();
                }
            }
            TransportEvent::Failed(err) => {
                self.ws = None;
                self.handle_transport_error(err);
            }
        }
    }

    fn handle_transport_error(&mut self, err: PosixError) {
        match reconnect::classify_transport_error(err, self.session.reconnect_interval_secs) {
            TransportErrorAction::AwaitReachability => {
                let host = self.url.host_str().unwrap_or_default().to_owned();
                let reachability = self.reachability.clone();
                let sender = self.self_tx.clone();
                tokio::spawn(async move {
                    reachability.await_reachable(&host).await;
                    let _ = sender.unbounded_send(Instruction::ReachableAgain);
                });
            }
            TransportErrorAction::ScheduleReconnect { after_secs } => {
                let sender = self.self_tx.clone();
                self.reconnect_scheduler.schedule(after_secs, move || {
                    let _ = sender.unbounded_send(Instruction::Reconnect);
                });
            }
            TransportErrorAction::Ignored => {}
        }
    }

    async fn process_message(&mut self, msg: Message) {
        let outcome = reconnect::apply_advice(&msg, &mut self.session, &self.delegate);
        match outcome {
            AdviceOutcome::Handshake => {
                self.resend_handshake().await;
                return;
            }
            AdviceOutcome::Terminated => {
                self.delegate.failed(BayeuxError::ReceivedAdviceReconnectTypeNone);
                self.delegate.disconnected(None, Some(BayeuxError::ReceivedAdviceReconnectTypeNone));
                self.shared.reset();
                return;
            }
            AdviceOutcome::Retried | AdviceOutcome::Ignored => {}
        }

        match dispatch::classify(&msg, &self.registry) {
            Route::Meta(mc) => {
                let mut dispatcher = std::mem::take(&mut self.dispatcher);
                dispatcher.dispatch(self, mc, msg);
                self.dispatcher = dispatcher;
                self.run_pending_followups().await;
            }
            Route::UnhandledMeta => {
                self.delegate.failed(BayeuxError::UnhandledMetaChannelMessage(msg.channel));
            }
            Route::Subscription => {
                if let Some(data) = msg.data.clone() {
                    if let Some(cb) = self.registry.callback_for(&msg.channel) {
                        self.callback_queue.dispatch(async move { cb(data) });
                    }
                }
            }
            Route::Unexpected => {
                self.delegate.received_unexpected_message(msg);
            }
        }
    }

    async fn run_pending_followups(&mut self) {
        if let Some(msg) = self.pending_handshake.take() {
            self.after_handshake_reply(msg).await;
        }
        if let Some(msg) = self.pending_connect.take() {
            self.after_connect_reply(msg).await;
        }
        if let Some(msg) = self.pending_disconnect.take() {
            self.after_disconnect_reply(msg);
        }
        if let Some(msg) = self.pending_subscribe.take() {
            self.after_subscribe_reply(msg);
        }
        if let Some(msg) = self.pending_unsubscribe.take() {
            self.after_unsubscribe_reply(msg);
        }
    }

    async fn resend_handshake(&mut self) {
        let ext = self.session.connection_extension.clone();
        let msg = Message::handshake(ext);
        if self.ws.is_none() {
            if let Err(e) = self.open_ws().await {
                self.delegate.failed(e);
                return;
            }
        }
        if let Err(e) = self.send(&msg) {
            self.delegate.failed(e);
        }
    }

    async fn after_handshake_reply(&mut self, msg: Message) {
        if !msg.is_successful() {
            let reason = msg.error.clone().unwrap_or_else(|| "handshake unsuccessful".to_owned());
            self.session.reset_to_disconnected();
            self.shared.reset();
            self.delegate.failed(BayeuxError::HandshakeFailed(reason));
            return;
        }
        let Some(client_id) = msg.client_id.clone() else {
            self.session.reset_to_disconnected();
            self.shared.reset();
            self.delegate.failed(BayeuxError::HandshakeFailed("missing clientId".to_owned()));
            return;
        };
        let supported = msg.supported_connection_types.clone().unwrap_or_default();
        if !supported.iter().any(|c| c == WEBSOCKET_CONNECTION_TYPE) {
            self.session.reset_to_disconnected();
            self.shared.reset();
            self.delegate.failed(BayeuxError::NoCommonSupportedConnectionType);
            return;
        }

        self.session.complete_handshake(client_id.clone(), WEBSOCKET_CONNECTION_TYPE.to_owned());
        self.reconnect_attempts = 0;

        if self.session.await_only_handshake {
            if let Some(cb) = self.pending_connect_success.take() {
                self.callback_queue.dispatch(async move { cb() });
            }
        }

        if self.ws.is_none() {
            if let Err(e) = self.open_ws().await {
                self.session.reset_to_disconnected();
                self.shared.reset();
                self.delegate.failed(e);
                return;
            }
        }

        if self.disconnect_pending_handshake {
            self.disconnect_pending_handshake = false;
            self.session.begin_disconnect();
            let msg = Message::disconnect(&client_id);
            if let Err(e) = self.send(&msg) {
                self.session.complete_disconnect();
                self.shared.reset();
                self.delegate.disconnected(None, Some(e));
            }
            return;
        }

        // Never send the initial `/meta/connect` synchronously here (spec
        // §4.5) — some servers treat a too-fast retry as a timeout. Defer it
        // through the same keep-alive timer the recurring connect uses;
        // `send_keepalive` re-checks the session before sending, so a
        // disconnect or reset during the delay discards it.
        let interval = self.session.retry_interval_secs;
        let sender = self.self_tx.clone();
        self.scheduler.schedule(interval, move || {
            let _ = sender.unbounded_send(Instruction::SendKeepAlive);
        });
    }

    async fn after_connect_reply(&mut self, msg: Message) {
        if !msg.is_successful() {
            let reason = msg.error.clone().unwrap_or_else(|| "connect unsuccessful".to_owned());
            self.delegate.failed(BayeuxError::ConnectFailed(reason));
            return;
        }

        if !self.session.is_connected() {
            let was_reconnecting = self.session.is_reconnecting();
            self.session.mark_connected();
            self.session.reconnecting = false;
            self.shared.connected.store(true, Ordering::SeqCst);
            self.shared.connecting.store(false, Ordering::SeqCst);
            self.shared.reconnecting.store(false, Ordering::SeqCst);
            self.delegate.connected();

            if was_reconnecting {
                let client_id = self.session.client_id.clone().unwrap_or_default();
                for m in self.registry.resubscribe_messages(&client_id) {
                    let _ = self.send(&m);
                }
            }

            if let Some(cb) = self.pending_connect_success.take() {
                self.callback_queue.dispatch(async move { cb() });
            }
        }

        let interval = self.session.retry_interval_secs;
        let sender = self.self_tx.clone();
        self.scheduler.schedule(interval, move || {
            let _ = sender.unbounded_send(Instruction::SendKeepAlive);
        });
    }

    fn after_disconnect_reply(&mut self, _msg: Message) {
        self.session.complete_disconnect();
        self.shared.reset();
        if let Some(ws) = self.ws.take() {
            ws.close();
        }
        self.delegate.disconnected(Some("client requested disconnect".to_owned()), None);
    }

    fn after_subscribe_reply(&mut self, msg: Message) {
        let channel = msg.subscription.as_ref().map(|s| s.channels().join(",")).unwrap_or_default();
        if msg.is_successful() {
            self.delegate.subscription_succeeded(channel);
        } else {
            let reason = msg.error.clone().unwrap_or_else(|| "subscribe unsuccessful".to_owned());
            self.delegate.failed(BayeuxError::SubscribeFailed { channel, reason });
        }
    }

    fn after_unsubscribe_reply(&mut self, msg: Message) {
        if !msg.is_successful() {
            let channel = msg.subscription.as_ref().map(|s| s.channels().join(",")).unwrap_or_default();
            let reason = msg.error.clone().unwrap_or_else(|| "unsubscribe unsuccessful".to_owned());
            self.delegate.failed(BayeuxError::UnsubscribeFailed { channel, reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recording {
        failures: StdMutex<Vec<String>>,
    }

    impl Delegate for Recording {
        fn failed(&self, error: BayeuxError) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn a_fresh_client_starts_disconnected() {
        let client = BayeuxClient::new(ClientConfig::new(Url::parse("wss://example.com/bayeux").unwrap()));
        assert!(!client.is_connected());
        assert!(!client.is_connecting());
        assert!(!client.is_reconnecting());
        assert!(client.subscribed_channels().is_empty());
    }

    #[tokio::test]
    async fn publish_before_connect_reports_socket_not_open() {
        let delegate = Arc::new(Recording::default());
        let config = ClientConfig::new(Url::parse("wss://example.com/bayeux").unwrap())
            .with_delegate(delegate.clone());
        let client = BayeuxClient::new(config);

        client.publish("/chat/room1", serde_json::json!({"text": "hi"}), None);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let failures = delegate.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("socket is not open"));
    }
}
