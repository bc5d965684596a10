use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for node names.
pub(crate) type ArcStr = Arc<str>;

/// Session-wide configuration.
///
/// The thresholds seed the initial values of the corresponding root inputs of
/// a [`QuerySession`](crate::QuerySession); they can be changed later without
/// rebuilding the session.
///
/// # Example
///
/// ```rust
/// use oncograph::Settings;
///
/// let settings = Settings::from_json(r#"{ "zScoreThreshold": 1.5 }"#).unwrap();
/// assert_eq!(settings.z_score_threshold, 1.5);
/// assert_eq!(settings.rppa_score_threshold, 2.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Threshold used by the default mRNA expression query (`EXP>=z EXP<=-z`).
    pub z_score_threshold: f64,
    /// Threshold used by the default protein level query (`PROT>=r PROT<=-r`).
    pub rppa_score_threshold: f64,
    /// Suffix appended to a study id to name its germline consent sample list.
    pub germline_sample_list_suffix: String,
    /// Clinical attributes requested for every resolved sample. The first one
    /// is used as the cancer type of a sample.
    pub cancer_type_attribute_ids: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            z_score_threshold: 2.0,
            rppa_score_threshold: 2.0,
            germline_sample_list_suffix: "_germline".to_string(),
            cancer_type_attribute_ids: vec![
                "CANCER_TYPE".to_string(),
                "CANCER_TYPE_DETAILED".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Parses settings from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that both thresholds are finite and non-negative.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("zScoreThreshold", self.z_score_threshold),
            ("rppaScoreThreshold", self.rppa_score_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::Threshold { name, value });
            }
        }

        Ok(())
    }
}
