//! Flow dispatch registry and its background dispatch loop.
//!
//! Maps flow kinds to handler callbacks and drives a single long-lived task
//! that pulls notifications from a `FlowSource` in arrival order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use mock_analysis_core::{FlowKind, FlowSource, Notification};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::network::ShutdownController;

/// Callback invoked for every notification of a registered kind.
///
/// Handlers run on the dispatch task and must not block; long work should be
/// spawned.
pub type FlowHandler = Arc<dyn Fn(&Notification) -> anyhow::Result<()> + Send + Sync>;

/// Result of delivering a single notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler registered for the kind; the notification is dropped.
    Unhandled,
    /// The handler returned an error or panicked.
    Failed,
}

/// Counters returned when the dispatch loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub handled: u64,
    pub unhandled: u64,
    pub failed: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        self.received += 1;
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::Unhandled => self.unhandled += 1,
            DispatchOutcome::Failed => self.failed += 1,
        }
    }
}

/// Registry mapping flow kinds to handlers. At most one handler per kind;
/// registering again replaces the previous one.
///
/// Handlers may be (re)registered while the loop is running; the change
/// applies from the next notification on.
#[derive(Default)]
pub struct FlowDispatcher {
    handlers: DashMap<FlowKind, FlowHandler>,
}

impl FlowDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the handler for `kind`. Returns `true` if it replaced one.
    pub fn register<F>(&self, kind: FlowKind, handler: F) -> bool
    where
        F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        debug!(kind = %kind, "registering flow handler");
        self.handlers.insert(kind, Arc::new(handler)).is_some()
    }

    /// Removes the handler for `kind`. Returns `true` if one was registered.
    pub fn unregister(&self, kind: &FlowKind) -> bool {
        self.handlers.remove(kind).is_some()
    }

    #[must_use]
    pub fn is_registered(&self, kind: &FlowKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Delivers one notification to its handler.
    ///
    /// Handler errors and panics are logged and reported as
    /// `DispatchOutcome::Failed`; they never propagate to the caller.
    pub fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        let kind = &notification.kind;
        info!(kind = %kind, id = notification.id, "Received {} flow.", kind);
        metrics::counter!("mock_analysis_flows_received_total", "kind" => kind.to_string())
            .increment(1);

        // Clone the handler out so no map shard stays locked while it runs.
        let Some(handler) = self.handlers.get(kind).map(|entry| Arc::clone(entry.value())) else {
            debug!(kind = %kind, id = notification.id, "no handler registered, dropping flow");
            return DispatchOutcome::Unhandled;
        };

        let failure = match catch_unwind(AssertUnwindSafe(|| handler(notification))) {
            Ok(Ok(())) => return DispatchOutcome::Handled,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        error!(kind = %kind, id = notification.id, error = %failure, "flow handler failed");
        metrics::counter!("mock_analysis_flow_handler_failures_total", "kind" => kind.to_string())
            .increment(1);
        DispatchOutcome::Failed
    }

    /// Spawns the dispatch loop.
    ///
    /// The loop delivers notifications in arrival order until the source is
    /// closed or `shutdown` fires, then returns its counters.
    /// `FlowSource::next_flow` must be cancel-safe.
    pub fn start_dispatching<S: FlowSource>(
        self: &Arc<Self>,
        mut source: S,
        shutdown: Arc<ShutdownController>,
    ) -> JoinHandle<DispatchStats> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            info!("Starting Flow Dispatcher...");
            let mut stats = DispatchStats::default();

            loop {
                tokio::select! {
                    biased;
                    () = shutdown.wait_for_shutdown() => {
                        info!("shutdown signalled, stopping flow dispatcher");
                        break;
                    }
                    next = source.next_flow() => match next {
                        Some(notification) => stats.record(dispatcher.dispatch(&notification)),
                        None => {
                            info!("flow source closed, stopping flow dispatcher");
                            break;
                        }
                    },
                }
            }

            info!(
                received = stats.received,
                handled = stats.handled,
                unhandled = stats.unhandled,
                failed = stats.failed,
                "flow dispatcher stopped"
            );
            stats
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
