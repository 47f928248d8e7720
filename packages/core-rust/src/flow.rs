//! Flow notifications and the message-bus capability consumed by the dispatcher.
//!
//! The real bus is an external collaborator; the server only needs to pull
//! typed notifications from it in arrival order. `LocalFlowBus` is the
//! in-process implementation used by the binary and by tests.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque type tag identifying a flow event.
///
/// Tags compare by their string name, so kinds unknown to this crate can
/// still be registered and dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowKind(Cow<'static, str>);

impl FlowKind {
    /// The mode-change flow that opens the demo-mode gate.
    pub const DEMO_MODE: FlowKind = FlowKind(Cow::Borrowed("DemoMode"));

    /// Creates a kind from a static name without allocating.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a kind from an owned name (e.g. parsed from an external feed).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single flow event delivered by the bus.
///
/// Carries no payload beyond its kind; `id` is the bus-assigned sequence
/// number, used only for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: FlowKind,
}

/// Pull side of a message bus.
#[async_trait]
pub trait FlowSource: Send + 'static {
    /// Waits for the next notification. Returns `None` once the bus is closed
    /// and every queued notification has been delivered.
    async fn next_flow(&mut self) -> Option<Notification>;
}

/// Error returned when publishing to a bus whose receiver has been dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("flow bus closed, notification {kind} dropped")]
pub struct BusClosed {
    pub kind: FlowKind,
}

/// In-process flow bus backed by an unbounded tokio mpsc channel.
///
/// Notifications published before dispatching starts are queued and
/// delivered in publish order once the receiver is polled.
#[derive(Debug)]
pub struct LocalFlowBus {
    rx: mpsc::UnboundedReceiver<Notification>,
}

/// Cloneable publishing handle for a `LocalFlowBus`.
#[derive(Debug, Clone)]
pub struct FlowPublisher {
    tx: mpsc::UnboundedSender<Notification>,
    next_id: Arc<AtomicU64>,
}

impl LocalFlowBus {
    /// Creates a bus and its first publisher.
    #[must_use]
    pub fn new() -> (FlowPublisher, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = FlowPublisher {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (publisher, Self { rx })
    }
}

impl FlowPublisher {
    /// Publishes a notification of the given kind and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `BusClosed` if the receiving side has been dropped.
    pub fn publish(&self, kind: FlowKind) -> Result<u64, BusClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(Notification { id, kind })
            .map(|()| id)
            .map_err(|e| BusClosed { kind: e.0.kind })
    }
}

#[async_trait]
impl FlowSource for LocalFlowBus {
    async fn next_flow(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}
