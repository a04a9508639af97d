//! Unified Error Model
use crate::data_model::SourceStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FiscError {
    #[error("CONFIG/{0}")]
    Config(#[from] ConfigError),

    #[error("SOURCE/{0}")]
    Source(String),

    #[error("SERIALIZE/{0}")]
    Serialize(String),
}

/// Configuration problems, reported eagerly at load time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("cannot parse configuration: {0}")]
    Parse(String),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("duplicate source id `{0}`")]
    DuplicateSource(String),

    #[error("source `{source_id}` references unknown rate-limit tier `{tier}`")]
    UnknownTier { source_id: String, tier: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure classification every adapter must apply to its own errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Network failure, timeout or 5xx. Retried.
    #[error("transient: {0}")]
    Transient(String),

    /// 4xx or malformed response. Never retried.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            AdapterError::Transient(r) | AdapterError::Permanent(r) => r,
        }
    }
}

/// Why a source call produced no usable data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("rate limited")]
    RateLimited,

    #[error("circuit open")]
    CircuitOpen,

    #[error("timed out: stage deadline exceeded")]
    StageDeadlineExceeded,
}

impl SourceError {
    /// Status recorded in the call's result
    pub fn status(&self) -> SourceStatus {
        match self {
            SourceError::Transient(_) | SourceError::StageDeadlineExceeded => {
                SourceStatus::TransientError
            }
            SourceError::Permanent(_) => SourceStatus::PermanentError,
            SourceError::RateLimited => SourceStatus::RateLimited,
            SourceError::CircuitOpen => SourceStatus::CircuitOpen,
        }
    }
}

impl From<AdapterError> for SourceError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient(r) => SourceError::Transient(r),
            AdapterError::Permanent(r) => SourceError::Permanent(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_maps_to_transient() {
        assert_eq!(
            SourceError::StageDeadlineExceeded.status(),
            SourceStatus::TransientError
        );
        assert!(SourceError::StageDeadlineExceeded.to_string().contains("timed out"));
    }

    #[test]
    fn test_adapter_error_conversion() {
        let e: SourceError = AdapterError::Permanent("404".into()).into();
        assert_eq!(e.status(), SourceStatus::PermanentError);
    }

    #[test]
    fn test_config_error_prefix() {
        let e: FiscError = ConfigError::DuplicateSource("siafi".into()).into();
        assert_eq!(e.to_string(), "CONFIG/duplicate source id `siafi`");
    }
}
