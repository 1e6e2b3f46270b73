//! Validation errors for workflow definitions.

use thiserror::Error;

/// Why a definition failed structural validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("definition name must not be empty")]
    EmptyName,

    #[error("definition has no levels")]
    NoLevels,

    #[error("level numbers start at 1")]
    ZeroLevelNumber,

    #[error("duplicate level number {0}")]
    DuplicateLevel(u32),

    #[error("level numbers must ascend: {found} follows {previous}")]
    NonAscendingLevels { previous: u32, found: u32 },

    #[error("level {level} resolves to no approvers")]
    EmptyApprovers { level: u32 },

    #[error("level {level} has invalid minimum approvals {minimum}")]
    InvalidMinimumApprovals { level: u32, minimum: u32 },

    #[error("level {level} sets minimum approvals but its mode fixes the quorum")]
    MinimumApprovalsNotApplicable { level: u32 },

    #[error("level {level} has a timeout action but no timeout hours")]
    MissingTimeout { level: u32 },

    #[error("level {level} returns on reject but names no target level")]
    MissingReturnTarget { level: u32 },

    #[error("level {level} return target {target} must be an existing earlier level")]
    InvalidReturnTarget { level: u32, target: u32 },
}

/// Result alias for definition validation
pub type DefinitionResult<T> = Result<T, DefinitionError>;
