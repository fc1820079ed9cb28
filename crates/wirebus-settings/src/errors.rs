//! Settings errors.

use thiserror::Error;

/// Failure while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Could not read the settings file.
    #[error("failed to read settings file {0}: {1}")]
    Read(String, String),
    /// The settings file was not valid JSON.
    #[error("failed to parse settings file {0}: {1}")]
    Parse(String, String),
    /// Compiled defaults failed to serialize (programming error).
    #[error("failed to serialize default settings: {0}")]
    Serialize(String),
    /// The merged value did not deserialize into settings.
    #[error("invalid settings: {0}")]
    Invalid(String),
}
