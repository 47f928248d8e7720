//! One-shot demo-mode gate.
//!
//! The first trigger starts the mock inference listener on a detached task;
//! every later trigger is a no-op. The start outcome is logged and published
//! on a watch channel, never returned to the caller.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::dispatcher::panic_message;

/// A listener that has bound its ports and is serving on a background task.
#[derive(Debug)]
pub struct StartedListener {
    /// Addresses actually bound (OS-assigned ports resolved).
    pub addrs: Vec<SocketAddr>,
    /// Serve task; completes after graceful shutdown.
    pub task: JoinHandle<anyhow::Result<()>>,
}

/// Starts the listener guarded by the gate.
#[async_trait]
pub trait ListenerStarter: Send + Sync + 'static {
    /// Binds and begins serving. Returns once the listener accepts connections.
    async fn start(&self) -> anyhow::Result<StartedListener>;
}

/// Outcome of the gate's start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Not triggered yet, or the start task is still running.
    Pending,
    Started(Vec<SocketAddr>),
    /// Root cause of the failure. The gate stays closed; there is no retry.
    Failed(String),
}

/// Idempotent, thread-safe one-shot trigger for the mock inference listener.
pub struct DemoModeGate {
    started: AtomicBool,
    starter: Arc<dyn ListenerStarter>,
    outcome: Arc<watch::Sender<StartOutcome>>,
    listener: Arc<Mutex<Option<StartedListener>>>,
}

impl DemoModeGate {
    #[must_use]
    pub fn new(starter: Arc<dyn ListenerStarter>) -> Self {
        let (outcome, _rx) = watch::channel(StartOutcome::Pending);
        Self {
            started: AtomicBool::new(false),
            starter,
            outcome: Arc::new(outcome),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the gate on the first call and launches the start task.
    ///
    /// Returns `true` for the single call that launched it. Never blocks;
    /// must be called from within a tokio runtime.
    pub fn on_trigger(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("mock inference server already started, ignoring trigger");
            return false;
        }

        info!("Demo mode received, starting mock inference server");
        let starter = Arc::clone(&self.starter);
        let outcome = Arc::clone(&self.outcome);
        let slot = Arc::clone(&self.listener);

        tokio::spawn(async move {
            // Inner task so a panic inside `start` surfaces as a JoinError.
            let result = tokio::spawn(async move { starter.start().await }).await;

            let (chain, root_cause) = match result {
                Ok(Ok(listener)) => {
                    info!(addrs = ?listener.addrs, "Web API started successfully.");
                    let addrs = listener.addrs.clone();
                    *slot.lock() = Some(listener);
                    outcome.send_replace(StartOutcome::Started(addrs));
                    return;
                }
                Ok(Err(e)) => (format!("{e:#}"), e.root_cause().to_string()),
                Err(join_err) => {
                    let cause = match join_err.try_into_panic() {
                        Ok(panic) => panic_message(panic.as_ref()),
                        Err(join_err) => join_err.to_string(),
                    };
                    (cause.clone(), cause)
                }
            };

            error!(error = %chain, root_cause = %root_cause, "Failed to start Web API: {}", root_cause);
            outcome.send_replace(StartOutcome::Failed(root_cause));
        });

        true
    }

    /// Whether the gate has been opened (regardless of the start outcome).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Subscribes to the start outcome.
    #[must_use]
    pub fn outcome(&self) -> watch::Receiver<StartOutcome> {
        self.outcome.subscribe()
    }

    /// Waits until the start attempt has finished, successfully or not.
    pub async fn wait_for_outcome(&self) -> StartOutcome {
        let mut rx = self.outcome();
        // The watch `Ref` must be released before `rx` goes out of scope.
        let settled = rx
            .wait_for(|o| *o != StartOutcome::Pending)
            .await
            .map(|outcome| (*outcome).clone());
        // The sender lives in `self`, so the channel cannot close while we wait.
        settled.unwrap_or(StartOutcome::Pending)
    }

    /// Addresses of the running listener, if it started.
    #[must_use]
    pub fn listener_addrs(&self) -> Option<Vec<SocketAddr>> {
        self.listener.lock().as_ref().map(|l| l.addrs.clone())
    }

    /// Takes the listener's serve task and waits for it to finish.
    ///
    /// Returns `None` if no listener is running. Call after triggering
    /// process shutdown to wait for the drain to complete.
    pub async fn join_listener(&self) -> Option<anyhow::Result<()>> {
        let listener = self.listener.lock().take()?;
        Some(match listener.task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("listener task failed: {e}")),
        })
    }
}
