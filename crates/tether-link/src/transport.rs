//! The transport — connection lifecycle, steady-state connect, session
//! loops, and the public contract exposed to the agent.
//!
//! One transport object owns one session's worth of state: both queues,
//! the assembly map, the single connection slot, and the negotiated
//! latch. Tearing the object down discards all of it; nothing here is
//! process-global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use tether_core::chunk::ChunkEnvelope;
use tether_core::codec::{Codec, CodecError};
use tether_core::config::LinkConfig;
use tether_core::exchange::{KeyExchange, KeyExchangeError};
use tether_core::message::{CheckinMessage, Message, MessageKind, ResponseMessage};

use crate::assembly::ChunkAssembler;
use crate::bridge::AgentBridge;
use crate::handshake;
use crate::link::ActiveLink;
use crate::queue::{InboundQueue, RecvError, SendQueue};
use crate::socket::ChunkSocket;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link is down")]
    LinkDown,
    #[error("key exchange failed: {0}")]
    Handshake(String),
    #[error("{0}")]
    Unsupported(&'static str),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RecvError> for LinkError {
    fn from(_: RecvError) -> Self {
        LinkError::LinkDown
    }
}

/// Single-peer chunked message transport.
pub struct LinkTransport {
    pub(crate) config: LinkConfig,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) exchange: Arc<dyn KeyExchange>,
    pub(crate) bridge: Arc<dyn AgentBridge>,
    pub(crate) outbound: Arc<SendQueue>,
    pub(crate) inbound: Arc<InboundQueue>,
    assembler: ChunkAssembler,
    /// The single connection slot. The lock covers the whole
    /// check-then-act on accept, so a racing second peer always loses.
    slot: Mutex<Option<ActiveLink>>,
    connected: watch::Sender<bool>,
    /// Latched when the peer assigns our session identity. Never
    /// cleared for the lifetime of this transport, even across
    /// reconnects.
    negotiated: AtomicBool,
    processor_running: AtomicBool,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl LinkTransport {
    pub fn new(
        config: LinkConfig,
        codec: Arc<dyn Codec>,
        exchange: Arc<dyn KeyExchange>,
        bridge: Arc<dyn AgentBridge>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            codec,
            exchange,
            bridge,
            outbound: Arc::new(SendQueue::new()),
            inbound: Arc::new(InboundQueue::new()),
            assembler: ChunkAssembler::new(),
            slot: Mutex::new(None),
            connected,
            negotiated: AtomicBool::new(false),
            processor_running: AtomicBool::new(false),
            acceptor: Mutex::new(None),
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// A peer socket has been accepted. Rejects (closes) the socket if
    /// a link is already active; otherwise registers it and starts the
    /// writer loop.
    pub async fn on_peer_connected(&self, socket: Arc<dyn ChunkSocket>) {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            tracing::warn!("peer connection rejected: a link is already active");
            socket.close();
            return;
        }
        self.inbound.link_up();
        *slot = Some(ActiveLink::spawn(socket, self.outbound.clone()));
        self.connected.send_replace(true);
        tracing::info!("peer link established");
    }

    /// The given peer is gone. Stops its writer, wakes every blocked
    /// waiter, and abandons in-flight assemblies. Queue contents are
    /// kept: already reassembled messages stay deliverable and pending
    /// frames go out on the next connection.
    ///
    /// Scoped to `socket`: a stale teardown replayed after another peer
    /// has taken the slot is ignored, so it can never close a live link
    /// or latch the inbound queue down under it.
    pub async fn on_peer_disconnected(&self, socket: &Arc<dyn ChunkSocket>) {
        let link = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(active) if same_socket(&active.socket, socket) => {}
                _ => {
                    tracing::debug!("ignoring disconnect for a peer that no longer holds the link");
                    return;
                }
            }
            self.connected.send_replace(false);
            self.inbound.link_down();
            let abandoned = self.assembler.discard_all();
            if abandoned > 0 {
                tracing::debug!(abandoned, "abandoned in-flight assemblies");
            }
            slot.take()
        };
        if let Some(link) = link {
            link.shutdown().await;
        }
        tracing::info!("peer link closed");
    }

    /// Tear down whatever link is currently active. The local shutdown
    /// path; peer-initiated teardown goes through `on_peer_disconnected`.
    pub async fn shutdown_link(&self) {
        let socket = self.slot.lock().await.as_ref().map(|l| l.socket.clone());
        if let Some(socket) = socket {
            self.on_peer_disconnected(&socket).await;
        }
    }

    /// A whole frame arrived from the socket layer.
    pub async fn on_frame(&self, frame: &[u8]) {
        let env = match ChunkEnvelope::from_bytes(frame) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable frame");
                return;
            }
        };
        if let Some(done) = self.assembler.on_chunk(env) {
            match self.codec.decode(&done.payload, done.kind) {
                Ok(msg) => {
                    tracing::debug!(kind = ?done.kind, "message reassembled");
                    self.inbound.push(msg).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = ?done.kind, "failed to decode reassembled message");
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe connection state changes (true = peer attached).
    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    // ── Public contract ───────────────────────────────────────────────────────

    /// Encode, chunk, and enqueue one message. Accepts while no peer is
    /// attached; frames wait in the queue for the next writer.
    pub async fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let parts = self
            .codec
            .encode(msg, self.config.session.max_chunk_bytes)?;
        let mut frames = Vec::with_capacity(parts.len());
        for part in &parts {
            frames.push(Bytes::from(part.to_bytes().map_err(CodecError::from)?));
        }
        tracing::debug!(kind = ?msg.kind(), chunks = frames.len(), "message enqueued");
        self.outbound.push_all(frames).await;
        Ok(())
    }

    /// Block until a message of `kind` arrives, then hand it to
    /// `handler`. Fails with `LinkDown` instead of hanging when the
    /// peer disconnects mid-wait.
    pub async fn recv<R>(
        &self,
        kind: MessageKind,
        handler: impl FnOnce(Message) -> R,
    ) -> Result<R, LinkError> {
        let msg = self.inbound.recv(kind).await?;
        Ok(handler(msg))
    }

    /// This transport pairs requests and replies through the queues
    /// only; a synchronous round trip has no implementation and fails
    /// fast rather than hanging.
    pub fn send_recv(&self, _message: &Message) -> Result<ResponseMessage, LinkError> {
        Err(LinkError::Unsupported(
            "synchronous send-and-wait is not supported on a one-way link",
        ))
    }

    pub fn is_one_way(&self) -> bool {
        true
    }

    // ── Steady-state connect ──────────────────────────────────────────────────

    /// Establish the session: start the listener (once), run the key
    /// exchange if required and not yet negotiated, enqueue the checkin
    /// and wait for its response unless the processor loop is already
    /// delivering responses (a reconnect).
    pub async fn connect(
        self: &Arc<Self>,
        checkin: CheckinMessage,
        handler: impl FnOnce(&ResponseMessage) -> bool,
    ) -> Result<bool, LinkError> {
        self.ensure_acceptor().await?;

        if self.config.session.encrypted_exchange && !self.negotiated.load(Ordering::Acquire) {
            handshake::negotiate(self).await?;
        }

        self.send(&Message::Checkin(checkin)).await?;

        if self.processor_running.load(Ordering::Acquire) {
            // Reconnect: the running processor loop consumes the
            // checkin response along with steady-state traffic.
            return Ok(true);
        }

        let msg = self.inbound.recv(MessageKind::Response).await?;
        let Message::Response(resp) = msg else {
            return Err(LinkError::Protocol(
                "checkin waiter received a different message kind",
            ));
        };
        if !self.negotiated.swap(true, Ordering::AcqRel) {
            if let Some(identity) = &resp.identity {
                self.codec.set_identity(identity);
                tracing::info!(identity, "session identity assigned by peer");
            }
        }
        Ok(handler(&resp))
    }

    /// Spawn the TCP acceptor exactly once per transport. A listen
    /// port of 0 means the embedder attaches sockets itself.
    async fn ensure_acceptor(self: &Arc<Self>) -> Result<(), LinkError> {
        if self.config.network.listen_port == 0 {
            return Ok(());
        }
        let mut guard = self.acceptor.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.config.network.listen_port)).await?;
        tracing::info!(port = self.config.network.listen_port, "listening for peer");
        *guard = Some(tokio::spawn(crate::net::accept_loop(self.clone(), listener)));
        Ok(())
    }

    // ── Session loops ─────────────────────────────────────────────────────────

    /// Run the consumer and processor loops until the agent terminates.
    /// Blocks; the loops persist across peer loss and only exit when
    /// the bridge reports the agent dead.
    pub async fn start(self: &Arc<Self>) {
        let consumer = tokio::spawn(consumer_loop(self.clone()));
        self.processor_running.store(true, Ordering::Release);
        let processor = tokio::spawn(processor_loop(self.clone()));

        let (consumer_res, processor_res) = tokio::join!(consumer, processor);
        self.processor_running.store(false, Ordering::Release);
        if consumer_res.is_err() || processor_res.is_err() {
            tracing::warn!("a session loop panicked");
        }
        tracing::info!("session loops exited");
    }

    fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.config.session.idle_backoff_ms)
    }

    pub(crate) fn max_frame_bytes(&self) -> usize {
        self.config.network.max_frame_bytes
    }
}

/// Identity comparison on the data pointer only; trait-object `ptr_eq`
/// can disagree on vtables for the same underlying socket.
fn same_socket(a: &Arc<dyn ChunkSocket>, b: &Arc<dyn ChunkSocket>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Polls the agent for outbound tasking and enqueues anything worth
/// sending; backs off briefly when idle or disconnected.
async fn consumer_loop(link: Arc<LinkTransport>) {
    let idle = link.idle_backoff();
    while link.bridge.is_alive() {
        if !link.is_connected() {
            tokio::time::sleep(idle).await;
            continue;
        }
        match link.bridge.produce_tasking() {
            Some(tasking) if tasking.has_content() => {
                if let Err(e) = link.send(&Message::Tasking(tasking)).await {
                    tracing::warn!(error = %e, "failed to enqueue tasking");
                }
            }
            _ => tokio::time::sleep(idle).await,
        }
    }
    tracing::debug!("consumer loop exited");
}

/// Delivers steady-state responses to the agent. Peer loss is not
/// fatal: the loop backs off and resumes when a peer reattaches.
async fn processor_loop(link: Arc<LinkTransport>) {
    let idle = link.idle_backoff();
    while link.bridge.is_alive() {
        match link.inbound.recv(MessageKind::Response).await {
            Ok(Message::Response(resp)) => {
                if !link.bridge.process_response(resp) {
                    tracing::warn!("agent did not handle a response");
                }
            }
            Ok(other) => {
                tracing::warn!(kind = ?other.kind(), "response waiter received unexpected kind");
            }
            Err(RecvError::LinkDown) => tokio::time::sleep(idle).await,
        }
    }
    tracing::debug!("processor loop exited");
}
