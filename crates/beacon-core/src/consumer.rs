//! Consumer handles: the return path for asynchronous results and events.
//!
//! Every core request that completes later takes a [`Consumer`]. The core
//! keeps it in a registry entry, the discovery slot, or a pending-operation
//! slot, and delivers [`Signal`]s on it. The requester keeps the matching
//! [`ConsumerStream`].
//!
//! Delivery is a non-blocking channel send, so it is safe from whatever
//! thread the beacon subsystem calls back on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BeaconError;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a consumer handle, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// A signal delivered to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    /// A data event; the channel stays open for more.
    Event(T),
    /// The operation finished successfully, optionally with a result.
    Done(Option<T>),
    /// The operation failed.
    Error(BeaconError),
    /// The subscription was closed without further data.
    Closed,
}

impl<T> Signal<T> {
    /// Returns `true` for [`Signal::Event`].
    #[must_use]
    pub const fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    /// Returns `true` for [`Signal::Closed`].
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Sending half held by the core.
#[derive(Debug)]
pub struct Consumer<T> {
    id: ConsumerId,
    tx: mpsc::UnboundedSender<Signal<T>>,
}

/// Receiving half held by the requester.
#[derive(Debug)]
pub struct ConsumerStream<T> {
    id: ConsumerId,
    rx: mpsc::UnboundedReceiver<Signal<T>>,
}

/// Create a connected consumer handle and stream.
#[must_use]
pub fn channel<T>() -> (Consumer<T>, ConsumerStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = ConsumerId::next();
    (Consumer { id, tx }, ConsumerStream { id, rx })
}

impl<T> Consumer<T> {
    /// This handle's id.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Deliver a data event, keeping the channel open.
    ///
    /// Returns `false` if the requester has dropped its stream.
    pub fn event(&self, payload: T) -> bool {
        self.send(Signal::Event(payload))
    }

    /// Report success.
    pub fn done(&self, payload: Option<T>) -> bool {
        self.send(Signal::Done(payload))
    }

    /// Report failure.
    pub fn error(&self, error: BeaconError) -> bool {
        self.send(Signal::Error(error))
    }

    /// Close the channel without data. Consumes the handle.
    pub fn close(self) {
        self.send(Signal::Closed);
    }

    fn send(&self, signal: Signal<T>) -> bool {
        let delivered = self.tx.send(signal).is_ok();
        if !delivered {
            debug!(consumer = %self.id, "consumer stream dropped, signal discarded");
        }
        delivered
    }
}

impl<T> ConsumerStream<T> {
    /// Id of the paired consumer handle.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Wait for the next signal. Returns `None` once the core has dropped
    /// the handle and every queued signal was received.
    pub async fn recv(&mut self) -> Option<Signal<T>> {
        self.rx.recv().await
    }

    /// Take the next queued signal without waiting.
    pub fn try_recv(&mut self) -> Option<Signal<T>> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued signal without waiting.
    pub fn drain(&mut self) -> Vec<Signal<T>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Returns `true` once the handle was dropped and nothing is left queued.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}
