//! Error types for the security engine
//!
//! Configuration errors are raised when an administrator edits a policy,
//! store errors when the policy document cannot be read or written, and
//! remediation errors when the platform refuses a moderation call.

use serenity::http::HttpError;
use serenity::model::ModelError;
use thiserror::Error;

/// A rejected policy edit. Never written to the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field was not a number
    #[error("`{field}` must be a whole number, got `{value}`")]
    NotANumber { field: &'static str, value: String },

    /// A numeric field was outside its allowed range
    #[error("`{field}` must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    /// The action name is not valid for this feature
    #[error("invalid action `{value}` for {feature}, expected one of: {expected}")]
    InvalidAction {
        feature: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Failure reading or writing policy documents
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy document could not be encoded or decoded: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Outcome of a remediation or audit-log call that did not succeed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemediationError {
    /// The bot lacks the rights for this call in the guild
    #[error("missing permissions")]
    PermissionDenied,

    /// The target (member, role, message, entry) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else the platform returned
    #[error("platform error: {0}")]
    Api(String),
}

impl From<serenity::Error> for RemediationError {
    fn from(error: serenity::Error) -> Self {
        match &error {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                match response.status_code.as_u16() {
                    401 | 403 => Self::PermissionDenied,
                    404 => Self::NotFound(response.error.message.clone()),
                    _ => Self::Api(error.to_string()),
                }
            }
            serenity::Error::Model(ModelError::InvalidPermissions { .. }) => {
                Self::PermissionDenied
            }
            _ => Self::Api(error.to_string()),
        }
    }
}

impl RemediationError {
    /// Whether this failure is an expected skip rather than a fault
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::NotFound(_))
    }
}

/// Result type for remediation calls
pub type RemediationResult<T = ()> = Result<T, RemediationError>;
