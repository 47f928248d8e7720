//! Listener configuration for the mock inference server.

use std::path::PathBuf;
use std::time::Duration;

use mock_analysis_core::config::{keys, ConfigError, ConfigSource, ConfigSourceExt};
use mock_analysis_core::LicenseOverrides;
use tracing::warn;

/// Default port serving the inference and label routes.
pub const DEFAULT_PRIMARY_PORT: u16 = 10401;
/// Default secondary port opened when the license mock is enabled.
pub const DEFAULT_LICENSE_PORT: u16 = 1948;
/// Directory under the content root holding artifacts and assets.
pub const DATA_DIR: &str = "Data";
/// Headroom kept above the simulated delay when bounding request time.
pub const DELAY_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Bind and request-handling settings for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address for every listener port.
    pub host: String,
    /// Port that is always bound. 0 means OS-assigned.
    pub primary_port: u16,
    /// Secondary port, present iff the license mock is enabled.
    pub license_port: Option<u16>,
    /// Maximum time a single request may take. A value not longer than the
    /// simulated delay is raised to the delay plus `DELAY_TIMEOUT_MARGIN`.
    pub request_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            primary_port: DEFAULT_PRIMARY_PORT,
            license_port: None,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Everything the listener needs, resolved once when the demo-mode gate opens.
///
/// Immutable for the lifetime of the listener.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listener: ListenerConfig,
    /// Whether `GET /api/keys` is registered and the license port bound.
    pub mock_license_enabled: bool,
    /// Simulated processing time before an inference artifact is returned.
    pub inference_delay: Duration,
    /// Configurable fields of the mock license record.
    pub license: LicenseOverrides,
    /// Root directory; artifacts live under `<content_root>/Data`.
    pub content_root: PathBuf,
}

impl ServerSettings {
    /// Resolves settings from a configuration source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any consumed key is malformed.
    pub fn from_config<C: ConfigSource + ?Sized>(
        config: &C,
        content_root: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let defaults = ListenerConfig::default();
        let mock_license_enabled = config.get_bool(keys::MOCK_LICENSE_ENABLED, false)?;

        let license_port = if mock_license_enabled {
            Some(config.get_port(keys::LISTENER_LICENSE_PORT, DEFAULT_LICENSE_PORT)?)
        } else {
            None
        };

        let inference_delay =
            Duration::from_secs(config.get_u64(keys::INFERENCE_DELAY_SECONDS, 0)?);
        let configured_timeout = Duration::from_secs(config.get_u64(
            keys::LISTENER_REQUEST_TIMEOUT_SECONDS,
            defaults.request_timeout.as_secs(),
        )?);

        let listener = ListenerConfig {
            host: config.get_string(keys::LISTENER_HOST, &defaults.host),
            primary_port: config.get_port(keys::LISTENER_PRIMARY_PORT, defaults.primary_port)?,
            license_port,
            request_timeout: effective_timeout(configured_timeout, inference_delay),
        };

        Ok(Self {
            listener,
            mock_license_enabled,
            inference_delay,
            license: LicenseOverrides::from_config(config)?,
            content_root: content_root.into(),
        })
    }

    /// Directory holding inference artifacts and the label image.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.content_root.join(DATA_DIR)
    }
}

/// Raises `configured` when it would cut off a request waiting out `delay`.
fn effective_timeout(configured: Duration, delay: Duration) -> Duration {
    if configured <= delay {
        let floor = delay.saturating_add(DELAY_TIMEOUT_MARGIN);
        warn!(
            configured_secs = configured.as_secs(),
            effective_secs = floor.as_secs(),
            "request timeout is shorter than the inference delay, raising it"
        );
        floor
    } else {
        configured
    }
}
