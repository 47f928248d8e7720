//! Inference request parameters and artifact selection.

use serde::{Deserialize, Serialize};

/// Artifact returned when both a secondary-capture report and map are requested.
pub const COMBINED_ARTIFACT: &str = "response";
/// Artifact returned when only the secondary-capture report is requested.
pub const REPORT_ARTIFACT: &str = "scReport0.dcm";
/// Artifact returned when only the secondary-capture map is requested.
pub const MAP_ARTIFACT: &str = "scMap0.dcm";

/// Output selection carried in the `creation` object of an inference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InferenceParameters {
    pub sc_report: bool,
    pub sc_map: bool,
}

/// The artifact a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSelection {
    Combined,
    Report,
    Map,
}

impl ArtifactSelection {
    /// File name of the artifact under the data directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Combined => COMBINED_ARTIFACT,
            Self::Report => REPORT_ARTIFACT,
            Self::Map => MAP_ARTIFACT,
        }
    }
}

impl InferenceParameters {
    #[must_use]
    pub fn new(sc_report: bool, sc_map: bool) -> Self {
        Self { sc_report, sc_map }
    }

    /// Resolves the requested artifact. `None` when neither output is selected.
    #[must_use]
    pub fn selection(self) -> Option<ArtifactSelection> {
        match (self.sc_report, self.sc_map) {
            (true, true) => Some(ArtifactSelection::Combined),
            (true, false) => Some(ArtifactSelection::Report),
            (false, true) => Some(ArtifactSelection::Map),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn selection_table() {
        let name = |r, m| InferenceParameters::new(r, m).selection().map(ArtifactSelection::file_name);
        assert_eq!(name(true, true), Some("response"));
        assert_eq!(name(true, false), Some("scReport0.dcm"));
        assert_eq!(name(false, true), Some("scMap0.dcm"));
        assert_eq!(name(false, false), None);
    }

    #[test]
    fn parameters_deserialize_from_creation_object() {
        let params: InferenceParameters =
            serde_json::from_str(r#"{"sc_report": true, "sc_map": false}"#).unwrap();
        assert_eq!(params, InferenceParameters::new(true, false));
    }

    proptest! {
        #[test]
        fn any_selected_output_resolves_to_an_artifact(sc_report: bool, sc_map: bool) {
            let selection = InferenceParameters::new(sc_report, sc_map).selection();
            prop_assert_eq!(selection.is_some(), sc_report || sc_map);
            if let Some(s) = selection {
                prop_assert_eq!(s == ArtifactSelection::Combined, sc_report && sc_map);
            }
        }
    }
}
