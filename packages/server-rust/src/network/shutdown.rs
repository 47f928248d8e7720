//! Process-level shutdown signal, listener lifecycle state, and in-flight
//! request tracking.
//!
//! The lifecycle state lives in an `ArcSwap`; in-flight requests are counted
//! by drop guards that wake drain waiters when the count reaches zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Lifecycle of the mock inference listener.
///
/// State machine: `NotStarted -> Starting -> Listening -> Draining -> Stopped`.
/// The last two states are only reached when the process shutdown signal fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// The demo-mode gate has not opened yet.
    NotStarted,
    /// Settings are being resolved and ports bound.
    Starting,
    /// All configured ports are bound and accepting requests.
    Listening,
    /// Shutdown was signalled; in-flight requests are finishing.
    Draining,
    /// All in-flight requests completed after shutdown.
    Stopped,
}

impl ListenerState {
    /// Lowercase name used in the listener's `state` log field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates shutdown across the dispatch loop and the listener.
///
/// 1. The dispatch loop and the simulated inference delay await
///    `wait_for_shutdown()`
/// 2. `trigger_shutdown()` moves to `Draining` and signals all receivers
/// 3. `wait_for_drain()` resolves once the last `InFlightGuard` is dropped
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    state: Arc<ArcSwap<ListenerState>>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

impl ShutdownController {
    /// Creates a controller in the `NotStarted` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(InFlight::default()),
            state: Arc::new(ArcSwap::from_pointee(ListenerState::NotStarted)),
        }
    }

    pub fn set_starting(&self) {
        self.state.store(Arc::new(ListenerState::Starting));
    }

    /// Returns to `NotStarted` after a start attempt that failed to bind.
    pub fn set_not_started(&self) {
        self.state.store(Arc::new(ListenerState::NotStarted));
    }

    pub fn set_listening(&self) {
        self.state.store(Arc::new(ListenerState::Listening));
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_receiver();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Signals every shutdown receiver, moving to `Draining` if the listener
    /// had started.
    pub fn trigger_shutdown(&self) {
        if self.state() != ListenerState::NotStarted {
            self.state.store(Arc::new(ListenerState::Draining));
        }
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        **self.state.load()
    }

    /// Marks one request as in flight until the returned guard is dropped.
    ///
    /// Dropping covers handler panics and cancelled futures too.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no request is in flight, for at most `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` when drained, `false` if the
    /// timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                // Register before checking so a drop in between is not missed.
                let notified = self.in_flight.idle.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, idle).await.is_err() {
            return false;
        }
        self.state.store(Arc::new(ListenerState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one request counted as in flight while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
