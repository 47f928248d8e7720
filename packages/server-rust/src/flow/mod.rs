//! Flow notification handling: the dispatch registry and the demo-mode gate.

pub mod dispatcher;
pub mod gate;

pub use dispatcher::{DispatchOutcome, DispatchStats, FlowDispatcher, FlowHandler};
pub use gate::{DemoModeGate, ListenerStarter, StartOutcome, StartedListener};
