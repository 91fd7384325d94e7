//! Shared fixtures: an in-memory chunk socket, a scripted agent bridge,
//! a fake key-exchange backend with an invertible seal, and a peer that
//! speaks the wire format from the operator side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use tether_core::chunk::ChunkEnvelope;
use tether_core::codec::{Codec, JsonCodec};
use tether_core::config::LinkConfig;
use tether_core::exchange::{KeyExchange, KeyExchangeError, KeyPair};
use tether_core::message::{Message, MessageKind, ResponseMessage, TaskingMessage};
use tether_link::{AgentBridge, ChunkAssembler, ChunkSocket, LinkTransport};

pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Session key the fake backend negotiates in every scenario.
pub const SESSION_KEY: [u8; 32] = [0x42; 32];

const SEAL_MASK: u8 = 0x5A;

// ── Socket ────────────────────────────────────────────────────────────────────

/// Chunk socket whose writes land in an mpsc channel.
pub struct MemorySocket {
    tx: mpsc::UnboundedSender<Bytes>,
    open: AtomicBool,
}

impl ChunkSocket for MemorySocket {
    fn write(&self, frame: Bytes) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            if !self.is_open() || self.tx.send(frame).is_err() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "socket closed",
                ));
            }
            Ok(())
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

pub fn memory_socket() -> (Arc<MemorySocket>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(MemorySocket {
            tx,
            open: AtomicBool::new(true),
        }),
        rx,
    )
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// Agent bridge driven by the test: tasking is queued explicitly and
/// every delivered response is recorded.
pub struct ScriptedBridge {
    alive: AtomicBool,
    pending: Mutex<VecDeque<TaskingMessage>>,
    processed: Mutex<Vec<ResponseMessage>>,
}

impl ScriptedBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
            processed: Mutex::new(Vec::new()),
        })
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn queue_tasking(&self, tasking: TaskingMessage) {
        self.pending.lock().unwrap().push_back(tasking);
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().unwrap().len()
    }

    pub fn processed(&self) -> Vec<ResponseMessage> {
        self.processed.lock().unwrap().clone()
    }
}

impl AgentBridge for ScriptedBridge {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn produce_tasking(&self) -> Option<TaskingMessage> {
        self.pending.lock().unwrap().pop_front()
    }

    fn process_response(&self, response: ResponseMessage) -> bool {
        self.processed.lock().unwrap().push(response);
        true
    }
}

// ── Key exchange ──────────────────────────────────────────────────────────────

/// Seal a session key the way `FakeKeyExchange` expects to open it.
pub fn seal_session_key(key: &[u8]) -> String {
    let sealed: Vec<u8> = key.iter().map(|b| b ^ SEAL_MASK).collect();
    BASE64.encode(sealed)
}

struct FakeKeyPair;

impl KeyPair for FakeKeyPair {
    fn public_key(&self) -> String {
        "fake-public-key".into()
    }

    fn session_id(&self) -> String {
        "exchange-1".into()
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, KeyExchangeError> {
        Ok(sealed.iter().map(|b| b ^ SEAL_MASK).collect())
    }
}

pub struct FakeKeyExchange;

impl KeyExchange for FakeKeyExchange {
    fn generate(&self) -> Result<Box<dyn KeyPair>, KeyExchangeError> {
        Ok(Box::new(FakeKeyPair))
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Transport under test plus a handle on its codec for assertions.
/// Small chunks force multi-fragment messages; no TCP listener.
pub fn build_transport(
    encrypted: bool,
    bridge: Arc<ScriptedBridge>,
) -> (Arc<LinkTransport>, Arc<JsonCodec>) {
    let mut config = LinkConfig::default();
    config.network.listen_port = 0;
    config.session.encrypted_exchange = encrypted;
    config.session.max_chunk_bytes = 64;
    config.session.idle_backoff_ms = 10;

    let codec = Arc::new(JsonCodec::new());
    let transport = Arc::new(LinkTransport::new(
        config,
        codec.clone(),
        Arc::new(FakeKeyExchange),
        bridge,
    ));
    (transport, codec)
}

// ── Peer ──────────────────────────────────────────────────────────────────────

/// The operator side of the link: reads what the transport writes to
/// its socket and injects frames back through the frame callback.
pub struct FakePeer {
    pub codec: JsonCodec,
    pub socket: Arc<MemorySocket>,
    assembler: ChunkAssembler,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl FakePeer {
    pub async fn attach(transport: &LinkTransport) -> Self {
        let (socket, rx) = memory_socket();
        transport
            .on_peer_connected(socket.clone() as Arc<dyn ChunkSocket>)
            .await;
        Self {
            codec: JsonCodec::new(),
            socket,
            assembler: ChunkAssembler::new(),
            rx,
        }
    }

    /// Next full message the transport writes, reassembled and decoded.
    pub async fn next_message(&mut self, expected: MessageKind) -> Message {
        loop {
            let frame = tokio::time::timeout(FRAME_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("socket channel closed");
            let env = ChunkEnvelope::from_bytes(&frame).expect("unparseable envelope");
            if let Some(done) = self.assembler.on_chunk(env) {
                return self
                    .codec
                    .decode(&done.payload, expected)
                    .expect("peer failed to decode message");
            }
        }
    }

    /// Tear the link down as if this peer's connection died.
    pub async fn disconnect(&self, transport: &LinkTransport) {
        transport
            .on_peer_disconnected(&(self.socket.clone() as Arc<dyn ChunkSocket>))
            .await;
    }

    /// True when no frame is waiting on the socket right now.
    pub fn no_frame_pending(&mut self) -> bool {
        matches!(self.rx.try_recv(), Err(mpsc::error::TryRecvError::Empty))
    }

    pub fn envelopes(&self, msg: &Message) -> Vec<ChunkEnvelope> {
        self.codec.encode(msg, 64).expect("peer encode failed")
    }

    /// Encode with the peer's codec and push through the frame callback.
    pub async fn deliver(&self, transport: &LinkTransport, msg: &Message) {
        for env in self.envelopes(msg) {
            let frame = env.to_bytes().expect("envelope serialization failed");
            transport.on_frame(&frame).await;
        }
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
