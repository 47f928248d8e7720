//! Mock analysis core: flow notifications, layered configuration, and the
//! inference and license types served by the mock listener.

pub mod config;
pub mod flow;
pub mod inference;
pub mod license;

pub use config::{AppSettings, ConfigError, ConfigSource, ConfigSourceExt};
pub use flow::{BusClosed, FlowKind, FlowPublisher, FlowSource, LocalFlowBus, Notification};
pub use inference::{ArtifactSelection, InferenceParameters};
pub use license::{LicenseOverrides, LicenseRecord};
