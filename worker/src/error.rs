use std::fmt;
use std::time::Duration;

use crate::warehouse::{Scalar, WarehouseError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("undefined variable `{name}` in template `{template}`")]
    UnknownVariable { name: String, template: String },

    #[error("malformed template `{template}`: {reason}")]
    MalformedTemplate { template: String, reason: String },

    #[error("credential `{0}` could not be resolved")]
    MissingCredential(String),

    #[error("invalid stage `{stage}`: {reason}")]
    InvalidStage { stage: String, reason: String },
}

/// A bulk, fact or dimension statement failed in the warehouse.
#[derive(Debug, thiserror::Error)]
#[error("load into `{target}` failed: {source}")]
pub struct LoadError {
    pub target: String,
    #[source]
    pub source: WarehouseError,
}

impl LoadError {
    pub fn new(target: impl Into<String>, source: WarehouseError) -> Self {
        Self {
            target: target.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailureReason {
    EmptyResult,
    Rejected(Scalar),
    NotAnInteger(Scalar),
    Query(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailure {
    pub check: String,
    pub reason: CheckFailureReason,
}

impl CheckFailure {
    pub fn is_query_error(&self) -> bool {
        matches!(self.reason, CheckFailureReason::Query(_))
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            CheckFailureReason::EmptyResult => {
                write!(f, "QualityError: empty result [{}]", self.check)
            }
            CheckFailureReason::Rejected(value) => {
                write!(f, "QualityError: check failed, got {value} [{}]", self.check)
            }
            CheckFailureReason::NotAnInteger(value) => write!(
                f,
                "QualityError: check returned non-integer value {value} [{}]",
                self.check
            ),
            CheckFailureReason::Query(message) => {
                write!(f, "QualityError: query failed: {message} [{}]", self.check)
            }
        }
    }
}

/// Every failing check of one quality gate execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} of {total} quality checks failed", .failures.len())]
pub struct QualityFailure {
    pub failures: Vec<CheckFailure>,
    pub total: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("LoadError: {0}")]
    Load(#[from] LoadError),

    #[error("QualityError: {0}")]
    Quality(#[from] QualityFailure),

    #[error("ConfigError: {0}")]
    Config(#[from] ConfigError),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl StageError {
    /// Load failures and timeouts consume a retry; data and configuration
    /// problems fail the stage immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Timeout(_))
    }

    /// Per-check diagnostics for quality failures.
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::Quality(failure) => failure.failures.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }
}
