//! Mock inference server with deferred startup lifecycle.
//!
//! `new()` takes resolved settings, `start()` binds the primary port (and
//! the license port when the license mock is enabled), and `serve()` accepts
//! connections on every bound port until the process shutdown signal fires.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use mock_analysis_core::ConfigSource;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::config::ServerSettings;
use super::handlers::inference::INFERENCE_PATH;
use super::handlers::label::LABEL_PATH;
use super::handlers::license::LICENSE_KEYS_PATH;
use super::handlers::{inference_handler, label_handler, license_keys_handler, AppState};
use super::middleware::with_http_layers;
use super::shutdown::ShutdownController;
use crate::flow::{ListenerStarter, StartedListener};

/// How long `serve()` waits for in-flight requests after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles the route table.
///
/// `GET /api/keys` is only added when the license mock is enabled, so with
/// the mock off the path is unrouted rather than a handler answering 404.
pub fn build_router(settings: Arc<ServerSettings>, shutdown: Arc<ShutdownController>) -> Router {
    let mut router: Router<AppState> = Router::new()
        .route(INFERENCE_PATH, post(inference_handler))
        .route(LABEL_PATH, get(label_handler));

    if settings.mock_license_enabled {
        router = router.route(LICENSE_KEYS_PATH, get(license_keys_handler));
    }

    with_http_layers(router, &settings.listener).with_state(AppState { settings, shutdown })
}

/// The dynamically started HTTP listener.
pub struct MockInferenceServer {
    settings: Arc<ServerSettings>,
    listeners: Vec<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl MockInferenceServer {
    /// Creates the server without binding any port.
    #[must_use]
    pub fn new(settings: ServerSettings, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            settings: Arc::new(settings),
            listeners: Vec::new(),
            shutdown,
        }
    }

    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(Arc::clone(&self.settings), Arc::clone(&self.shutdown))
    }

    /// Binds every configured port and returns the bound addresses.
    ///
    /// Ports configured as 0 resolve to OS-assigned ports. If any port fails
    /// to bind, ports already bound are released and the lifecycle returns
    /// to `NotStarted`.
    ///
    /// # Errors
    ///
    /// Returns an error if any address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<Vec<SocketAddr>> {
        self.shutdown.set_starting();

        match self.bind_all().await {
            Ok(addrs) => {
                self.shutdown.set_listening();
                info!(state = self.shutdown.state().as_str(), "all listener ports bound");
                Ok(addrs)
            }
            Err(e) => {
                self.listeners.clear();
                self.shutdown.set_not_started();
                Err(e)
            }
        }
    }

    async fn bind_all(&mut self) -> anyhow::Result<Vec<SocketAddr>> {
        let listener_config = &self.settings.listener;

        let mut ports = vec![listener_config.primary_port];
        if let Some(port) = listener_config.license_port {
            info!(
                "MockLicense is enabled. Port {} will be used for mock license requests.",
                port
            );
            ports.push(port);
        }

        let mut addrs = Vec::with_capacity(ports.len());
        for port in ports {
            let addr = format!("{}:{}", listener_config.host, port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            let local = listener.local_addr()?;
            info!("TCP listener bound to {}", local);
            addrs.push(local);
            self.listeners.push(listener);
        }
        Ok(addrs)
    }

    /// Serves every bound port until the shutdown signal fires, then waits
    /// up to 30 seconds for in-flight requests to drain.
    ///
    /// # Errors
    ///
    /// Returns the first fatal I/O error reported by any listener.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(self) -> anyhow::Result<()> {
        assert!(
            !self.listeners.is_empty(),
            "start() must be called before serve()"
        );
        let router = self.build_router();
        let shutdown = self.shutdown;

        let mut servers = JoinSet::new();
        for listener in self.listeners {
            let router = router.clone();
            let signal = Arc::clone(&shutdown);
            servers.spawn(async move {
                let addr = listener.local_addr().ok();
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
                    .await
                    .with_context(|| format!("serving {addr:?}"))
            });
        }

        let mut first_error = None;
        while let Some(joined) = servers.join_next().await {
            let result = joined.map_err(anyhow::Error::from).and_then(|served| served);
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "listener stopped with an error");
                first_error.get_or_insert(e);
            }
        }

        drain(&shutdown).await;
        first_error.map_or(Ok(()), Err)
    }
}

async fn drain(shutdown: &ShutdownController) {
    let in_flight = shutdown.in_flight_count();
    if in_flight > 0 {
        info!("Draining {} in-flight requests", in_flight);
    }

    if shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
        info!(state = shutdown.state().as_str(), "mock inference server stopped");
    } else {
        warn!(
            state = shutdown.state().as_str(),
            remaining = shutdown.in_flight_count(),
            "Drain timeout expired with in-flight requests remaining"
        );
    }
}

/// `ListenerStarter` that resolves settings from configuration and starts a
/// `MockInferenceServer`.
pub struct ServerStarter {
    config: Arc<dyn ConfigSource>,
    content_root: PathBuf,
    shutdown: Arc<ShutdownController>,
}

impl ServerStarter {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigSource>,
        content_root: impl Into<PathBuf>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            config,
            content_root: content_root.into(),
            shutdown,
        }
    }
}

#[async_trait]
impl ListenerStarter for ServerStarter {
    async fn start(&self) -> anyhow::Result<StartedListener> {
        let settings = ServerSettings::from_config(self.config.as_ref(), self.content_root.clone())
            .context("resolving listener settings")?;
        info!(
            mock_license = settings.mock_license_enabled,
            delay_secs = settings.inference_delay.as_secs(),
            data_dir = %settings.data_dir().display(),
            "starting mock inference server"
        );

        let mut server = MockInferenceServer::new(settings, Arc::clone(&self.shutdown));
        let addrs = server.start().await?;
        let task = tokio::spawn(server.serve());

        Ok(StartedListener { addrs, task })
    }
}
