//! Mock license endpoint, registered only when the license mock is enabled.

use axum::extract::State;
use axum::Json;
use mock_analysis_core::LicenseRecord;
use tracing::info;

use super::AppState;

/// Route of the license endpoint.
pub const LICENSE_KEYS_PATH: &str = "/api/keys";

/// Handles `GET /api/keys` with a single-entry license list.
pub async fn license_keys_handler(State(state): State<AppState>) -> Json<Vec<LicenseRecord>> {
    info!("Returning mock license data for {}", LICENSE_KEYS_PATH);
    Json(vec![LicenseRecord::mock(&state.settings.license)])
}
