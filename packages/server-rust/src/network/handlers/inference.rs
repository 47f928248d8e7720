//! Simulated diagnostic inference endpoint.
//!
//! Validates the multipart `parameters` field, resolves the requested
//! artifact, waits for the configured processing time, and returns the
//! artifact bytes as `application/dicom`.

use std::time::Duration;

use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::Response;
use mock_analysis_core::InferenceParameters;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{file_response, AppState};
use crate::network::{ApiError, ShutdownController};

/// Route of the inference endpoint.
pub const INFERENCE_PATH: &str = "/api/v1/inference";
/// Content type of every inference artifact.
pub const DICOM_CONTENT_TYPE: &str = "application/dicom";

const PARAMETERS_FIELD: &str = "parameters";

/// Handles `POST /api/v1/inference`.
///
/// # Errors
///
/// - `400` for a non-multipart body, a missing or malformed `parameters`
///   field, or a request that selects no artifact
/// - `404` when the selected artifact is not on disk
/// - `503` when the process starts shutting down during the simulated delay
/// - `500` for any I/O failure
pub async fn inference_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();

    for (name, value) in &headers {
        debug!("Header: {} = {:?}", name, value);
    }

    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "inference request is not multipart");
        ApiError::BadRequest("Invalid content type. Expected 'multipart/form-data'.".into())
    })?;

    let raw = read_parameters_field(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Missing 'parameters' field in the form data.".into()))?;
    info!("Received parameters: {}", raw);

    let selection = parse_parameters(&raw)?.selection().ok_or_else(|| {
        ApiError::BadRequest("Invalid request. No valid file selected for download.".into())
    })?;
    let file_name = selection.file_name();

    let path = state.settings.data_dir().join(file_name);
    let exists = tokio::fs::try_exists(&path)
        .await
        .with_context(|| format!("checking artifact {}", path.display()))?;
    if !exists {
        warn!("DICOM file '{}' not found.", file_name);
        return Err(ApiError::NotFound(format!("DICOM file '{file_name}' not found.")));
    }

    simulate_processing(state.settings.inference_delay, &state.shutdown).await?;

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading artifact {}", path.display()))?;
    info!(file = file_name, size = bytes.len(), "returning inference artifact");

    Ok(file_response(bytes, DICOM_CONTENT_TYPE, file_name))
}

/// Returns the text of the first `parameters` field, skipping other fields.
async fn read_parameters_field(multipart: &mut Multipart) -> Result<Option<String>, ApiError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        debug!(error = %e, "malformed multipart body");
        ApiError::BadRequest("Malformed multipart form data.".into())
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() == Some(PARAMETERS_FIELD) {
            return field.text().await.map(Some).map_err(malformed);
        }
    }
    Ok(None)
}

/// Parses the `parameters` JSON and extracts the `creation` flags.
fn parse_parameters(raw: &str) -> Result<InferenceParameters, ApiError> {
    let parameters: Value = serde_json::from_str(raw).map_err(ApiError::InvalidJson)?;

    let creation = parameters
        .get("creation")
        .ok_or_else(|| ApiError::BadRequest("Missing 'creation' property in 'parameters'.".into()))?;
    if !creation.is_object() {
        return Err(ApiError::BadRequest(
            "'creation' in 'parameters' must be an object.".into(),
        ));
    }

    Ok(InferenceParameters::new(
        creation_flag(creation, "sc_report")?,
        creation_flag(creation, "sc_map")?,
    ))
}

fn creation_flag(creation: &Value, name: &str) -> Result<bool, ApiError> {
    creation
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| ApiError::BadRequest(format!("'creation.{name}' must be a boolean.")))
}

/// Sleeps for `delay`, giving up early if the process starts shutting down.
async fn simulate_processing(delay: Duration, shutdown: &ShutdownController) -> Result<(), ApiError> {
    if delay.is_zero() {
        return Ok(());
    }

    info!("Delaying response for {} seconds...", delay.as_secs());
    tokio::select! {
        () = tokio::time::sleep(delay) => Ok(()),
        () = shutdown.wait_for_shutdown() => {
            warn!("shutdown signalled during simulated processing, abandoning request");
            Err(ApiError::ShuttingDown)
        }
    }
}
