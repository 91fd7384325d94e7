//! Outbound and inbound queues.
//!
//! `SendQueue` feeds the writer loop with already-chunked frames.
//! `InboundQueue` holds fully reassembled messages for type-filtered
//! waiters. Both survive a disconnect with their contents intact; only
//! the waiters are woken so they can observe the link state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use tether_core::message::{Message, MessageKind};

// ── Outbound ──────────────────────────────────────────────────────────────────

/// FIFO of wire-ready frames, drained by one writer loop at a time.
pub struct SendQueue {
    items: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append one frame and signal the writer.
    pub async fn push(&self, frame: Bytes) {
        self.items.lock().await.push_back(frame);
        self.notify.notify_one();
    }

    /// Append a batch under one lock so fragments of a message are
    /// never interleaved with another producer's batch.
    pub async fn push_all(&self, frames: Vec<Bytes>) {
        let mut items = self.items.lock().await;
        items.extend(frames);
        drop(items);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<Bytes> {
        self.items.lock().await.pop_front()
    }

    /// Put a popped frame back at the head of the queue, preserving
    /// wire order. Used when a write is abandoned before completing.
    pub async fn requeue(&self, frame: Bytes) {
        self.items.lock().await.push_front(frame);
        self.notify.notify_one();
    }

    /// Wait for the next push signal. A signal sent while nobody waits
    /// is latched, so a pop/wait race cannot lose a wakeup.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    #[error("link is down")]
    LinkDown,
}

/// FIFO of reassembled messages with kind-filtered blocking receive.
///
/// Multiple waiters may block concurrently for different kinds; a
/// message only ever satisfies one waiter. The link-down latch resolves
/// empty waits instead of letting them hang across a disconnect.
pub struct InboundQueue {
    items: Mutex<VecDeque<Message>>,
    notify: Notify,
    down: AtomicBool,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            down: AtomicBool::new(false),
        }
    }

    /// Append a message and wake every waiter to re-check its filter.
    pub async fn push(&self, msg: Message) {
        self.items.lock().await.push_back(msg);
        self.notify.notify_waiters();
    }

    /// Latch the link-down state and wake all waiters.
    pub fn link_down(&self) {
        self.down.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Clear the latch when a new peer attaches.
    pub fn link_up(&self) {
        self.down.store(false, Ordering::Release);
    }

    /// Remove and return the first queued message of `kind`, FIFO among
    /// messages of that kind.
    async fn take(&self, kind: MessageKind) -> Option<Message> {
        let mut items = self.items.lock().await;
        let idx = items.iter().position(|m| m.kind() == kind)?;
        items.remove(idx)
    }

    /// Block until a message of `kind` is available or the link goes
    /// down with no match queued.
    ///
    /// A matching message that is already queued is delivered even when
    /// the link is down — reassembled messages stay deliverable after a
    /// disconnect.
    pub async fn recv(&self, kind: MessageKind) -> Result<Message, RecvError> {
        loop {
            // Register for wakeups before checking, so a push or latch
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(msg) = self.take(kind).await {
                return Ok(msg);
            }
            if self.down.load(Ordering::Acquire) {
                return Err(RecvError::LinkDown);
            }
            notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
