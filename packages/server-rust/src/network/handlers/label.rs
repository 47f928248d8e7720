//! Static label image endpoint.

use axum::extract::State;
use axum::response::Response;
use tracing::{info, warn};

use super::{file_response, AppState};
use crate::network::ApiError;

/// Route of the label image endpoint.
pub const LABEL_PATH: &str = "/api/v1/label/1";
/// Label image file name under the data directory.
pub const LABEL_FILE: &str = "label.png";

/// Handles `GET /api/v1/label/1`.
///
/// # Errors
///
/// Returns `404` when the image is missing and `500` if it cannot be read.
pub async fn label_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let path = state.settings.data_dir().join(LABEL_FILE);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Image file '{}' not found.", LABEL_FILE);
            return Err(ApiError::NotFound(format!("Image file '{LABEL_FILE}' not found.")));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("reading label image {}", path.display()))
                .into())
        }
    };

    info!("Returning image file '{}'.", LABEL_FILE);
    Ok(file_response(bytes, "image/png", LABEL_FILE))
}
