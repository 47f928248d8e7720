//! Mock license record served by the license endpoint.

use serde::Serialize;

use crate::config::{keys, ConfigError, ConfigSource, ConfigSourceExt};

/// License fields that can be overridden through configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseOverrides {
    pub is_usable: bool,
    pub is_expired: bool,
    pub current_usage_count: u64,
    pub limit_usage_count: u64,
    pub expiration_date: String,
}

impl Default for LicenseOverrides {
    fn default() -> Self {
        Self {
            is_usable: true,
            is_expired: false,
            current_usage_count: 1185,
            limit_usage_count: 2500,
            expiration_date: "2031-09-01".to_string(),
        }
    }
}

impl LicenseOverrides {
    /// Reads the `LicenseMock:*` keys, keeping defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a set key does not parse.
    pub fn from_config<C: ConfigSource + ?Sized>(config: &C) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            is_usable: config.get_bool(keys::LICENSE_IS_USABLE, defaults.is_usable)?,
            is_expired: config.get_bool(keys::LICENSE_IS_EXPIRED, defaults.is_expired)?,
            current_usage_count: config
                .get_u64(keys::LICENSE_CURRENT_USAGE_COUNT, defaults.current_usage_count)?,
            limit_usage_count: config
                .get_u64(keys::LICENSE_LIMIT_USAGE_COUNT, defaults.limit_usage_count)?,
            expiration_date: config
                .get_string(keys::LICENSE_EXPIRATION_DATE, &defaults.expiration_date),
        })
    }
}

/// Wire shape of one license entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseRecord {
    pub id: &'static str,
    pub product: &'static str,
    pub product_id: u32,
    pub is_cloned: bool,
    pub is_usable: bool,
    pub is_expired: bool,
    pub current_usage_count: u64,
    pub limit_usage_count: u64,
    pub margin_usage_count: u64,
    pub license_type: &'static str,
    pub license_exp_time: i64,
    pub expiration_date: String,
    pub activation_date: &'static str,
    pub status_code: i32,
}

impl LicenseRecord {
    /// Builds the fixed mock record with the configurable fields applied.
    #[must_use]
    pub fn mock(overrides: &LicenseOverrides) -> Self {
        Self {
            id: "44157676413252866",
            product: "Lunit INSIGHT CXR 3",
            product_id: 13003,
            is_cloned: false,
            is_usable: overrides.is_usable,
            is_expired: overrides.is_expired,
            current_usage_count: overrides.current_usage_count,
            limit_usage_count: overrides.limit_usage_count,
            margin_usage_count: 0,
            license_type: "expiration",
            license_exp_time: 1_945_987_199,
            expiration_date: overrides.expiration_date.clone(),
            activation_date: "2024-05-28",
            status_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;

    #[test]
    fn defaults_match_the_reference_license() {
        let record = LicenseRecord::mock(&LicenseOverrides::default());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["is_usable"], true);
        assert_eq!(json["is_expired"], false);
        assert_eq!(json["current_usage_count"], 1185);
        assert_eq!(json["limit_usage_count"], 2500);
        assert_eq!(json["expiration_date"], "2031-09-01");
        assert_eq!(json["license_exp_time"], 1_945_987_199);
        assert_eq!(json.as_object().unwrap().len(), 14);
    }

    #[test]
    fn overriding_usability_changes_only_that_field() {
        let base = LicenseRecord::mock(&LicenseOverrides::default());
        let settings = AppSettings::from_pairs([(keys::LICENSE_IS_USABLE, "false")]);
        let overridden = LicenseRecord::mock(&LicenseOverrides::from_config(&settings).unwrap());

        assert!(!overridden.is_usable);
        assert_eq!(LicenseRecord { is_usable: true, ..overridden }, base);
    }

    #[test]
    fn malformed_override_is_rejected() {
        let settings = AppSettings::from_pairs([(keys::LICENSE_CURRENT_USAGE_COUNT, "-1")]);
        assert!(LicenseOverrides::from_config(&settings).is_err());
    }
}
