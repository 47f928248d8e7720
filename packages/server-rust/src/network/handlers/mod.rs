//! HTTP handler definitions for the mock inference listener.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod inference;
pub mod label;
pub mod license;

pub use inference::inference_handler;
pub use label::label_handler;
pub use license::license_keys_handler;

use std::sync::Arc;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{ServerSettings, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Read-only for handlers apart from the in-flight counter, so requests do
/// not share any other mutable state.
#[derive(Clone)]
pub struct AppState {
    /// Settings resolved when the listener started.
    pub settings: Arc<ServerSettings>,
    /// Process shutdown signal and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
}

/// Builds a `200` file download response.
fn file_response(bytes: Vec<u8>, content_type: &'static str, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Bytes::from(bytes),
    )
        .into_response()
}
