//! Engine error types.
//!
//! Every engine operation reports failures as an [`EngineError`]: an
//! [`ErrorKind`] describing what went wrong plus a correlation id that is
//! also emitted on the operation's log lines, so a caller-reported error
//! can be matched against engine logs.

use approval_storage::StorageError;
use approval_types::{CorrelationId, DefinitionError, InstanceStatus};
use thiserror::Error;

/// Result alias used across the engine crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// An engine failure tagged with a correlation id.
#[derive(Debug, Error)]
#[error("[{correlation}] {kind}")]
pub struct EngineError {
    correlation: CorrelationId,
    #[source]
    kind: ErrorKind,
}

impl EngineError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            correlation: CorrelationId::generate(),
            kind,
        }
    }

    /// Re-tags the error with the correlation id of the surrounding
    /// operation, so retries and collaborator failures share one id.
    pub fn with_correlation(mut self, correlation: &CorrelationId) -> Self {
        self.correlation = correlation.clone();
        self
    }

    pub fn correlation(&self) -> &CorrelationId {
        &self.correlation
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation(message.into()))
    }

    pub fn eligibility(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Eligibility(message.into()))
    }

    pub fn level_already_decided(level: u32) -> Self {
        Self::new(ErrorKind::LevelAlreadyDecided { level })
    }

    pub fn instance_terminal(status: InstanceStatus) -> Self {
        Self::new(ErrorKind::InstanceTerminal { status })
    }

    pub fn concurrent_modification(attempts: u32) -> Self {
        Self::new(ErrorKind::ConcurrentModification { attempts })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound(message.into()))
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence(message.into()))
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Collaborator(message.into()))
    }

    /// True when retrying the operation against fresh state could succeed.
    /// Resubmitting an identical decision is idempotent, so persistence
    /// failures and exhausted version conflicts are both safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConcurrentModification { .. } | ErrorKind::Persistence(_)
        )
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<DefinitionError> for EngineError {
    fn from(err: DefinitionError) -> Self {
        Self::new(ErrorKind::InvalidDefinition(err))
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        let kind = match err {
            StorageError::NotFound(msg) => ErrorKind::NotFound(msg),
            StorageError::Conflict(msg) => ErrorKind::Validation(msg),
            StorageError::VersionConflict { .. } => {
                ErrorKind::ConcurrentModification { attempts: 1 }
            }
            StorageError::InvalidInput(msg) => ErrorKind::Validation(msg),
            StorageError::Serialization(msg) | StorageError::Backend(msg) => {
                ErrorKind::Persistence(msg)
            }
        };
        Self::new(kind)
    }
}

/// What went wrong, independent of the correlation id.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not eligible: {0}")]
    Eligibility(String),

    #[error("level {level} is already decided")]
    LevelAlreadyDecided { level: u32 },

    #[error("instance is already {status}")]
    InstanceTerminal { status: InstanceStatus },

    #[error("concurrent modification persisted after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Persistence(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_a_correlation_id() {
        let err = EngineError::validation("bad input");
        assert!(!err.correlation().0.is_empty());
        assert!(err.to_string().contains("bad input"));
        assert!(err.to_string().contains(&err.correlation().0));
    }

    #[test]
    fn with_correlation_replaces_the_generated_id() {
        let shared = CorrelationId::generate();
        let err = EngineError::eligibility("nope").with_correlation(&shared);
        assert_eq!(err.correlation(), &shared);
    }

    #[test]
    fn storage_errors_map_onto_engine_kinds() {
        let err: EngineError = StorageError::NotFound("inst-1".to_string()).into();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));

        let err: EngineError = StorageError::VersionConflict {
            expected: 2,
            found: 3,
        }
        .into();
        assert!(err.is_retryable());
    }
}
