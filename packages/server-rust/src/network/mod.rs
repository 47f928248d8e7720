//! HTTP surface of the mock inference server: settings, routes, middleware,
//! errors, and shutdown control.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use error::ApiError;
pub use handlers::AppState;
pub use module::{build_router, MockInferenceServer, ServerStarter};
pub use shutdown::*;
