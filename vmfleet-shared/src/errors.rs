//! Error taxonomy shared by every vmfleet layer.

use thiserror::Error;

/// Result alias used throughout vmfleet.
pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Template, host, datastore, folder or other inventory object is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lookup matched more than one inventory object.
    #[error("ambiguous reference: {0}")]
    AmbiguousReference(String),

    /// The platform rejected or failed an API call.
    #[error("platform request failed: {0}")]
    PlatformRequestFailed(String),

    /// A storage pod was asked for placement and returned nothing usable.
    #[error("no placement recommendation: {0}")]
    NoPlacementRecommendation(String),

    #[error("unsupported adapter type: {0}")]
    UnsupportedAdapterType(String),

    /// An asynchronous platform task finished in the error state.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// A bounded poll ran out of attempts.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A malformed instance specification, detected before any platform call.
    #[error("input validation failed: {0}")]
    InputValidationFailed(String),

    /// The batch abort signal stopped the pipeline before its next stage.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Batch-level configuration error (config file, batch file).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Short, stable name of the error kind for reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::NotFound(_) => "NotFound",
            FleetError::AmbiguousReference(_) => "AmbiguousReference",
            FleetError::PlatformRequestFailed(_) => "PlatformRequestFailed",
            FleetError::NoPlacementRecommendation(_) => "NoPlacementRecommendation",
            FleetError::UnsupportedAdapterType(_) => "UnsupportedAdapterType",
            FleetError::TaskFailed(_) => "TaskFailed",
            FleetError::Timeout(_) => "Timeout",
            FleetError::InputValidationFailed(_) => "InputValidationFailed",
            FleetError::Aborted(_) => "Aborted",
            FleetError::Config(_) => "Config",
            FleetError::Internal(_) => "Internal",
            FleetError::Io(_) => "Io",
            FleetError::Json(_) => "Json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(FleetError::Timeout("x".into()).kind(), "Timeout");
        assert_eq!(
            FleetError::NoPlacementRecommendation("pod".into()).kind(),
            "NoPlacementRecommendation"
        );
        assert_ne!(
            FleetError::NoPlacementRecommendation("pod".into()).kind(),
            FleetError::NotFound("pod".into()).kind()
        );
    }

    #[test]
    fn test_display_includes_detail() {
        let err = FleetError::NotFound("host esx-01".into());
        assert_eq!(err.to_string(), "not found: host esx-01");
    }
}
