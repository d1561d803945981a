use crate::StageId;
use kc_db::StorageError;
use kc_integrity::{ConsistencyViolation, IntegrityError};
use std::{borrow::Cow, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0:#}")]
    Store(#[from] StorageError),
    #[error("Stage {stage} failed: {source:#}")]
    StageExecution { stage: StageId, source: anyhow::Error },
    #[error("Consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),
    #[error("Integrity check failed: {0:#}")]
    Integrity(anyhow::Error),
    #[error("Invalid configuration: {0}")]
    Configuration(Cow<'static, str>),
    #[error("Cannot unwind stage {stage} to block {point}: progress is {progress}")]
    InvalidUnwind { stage: StageId, point: u64, progress: u64 },
    #[error("Stage {0} is not registered")]
    UnknownStage(StageId),
    #[error("Cancelled")]
    Cancelled,
    #[error("No mined block received after {0:?}")]
    MiningTimeout(Duration),
}

impl From<IntegrityError> for SyncError {
    fn from(value: IntegrityError) -> Self {
        match value {
            IntegrityError::Violation(violation) => Self::Consistency(violation),
            IntegrityError::Storage(err) => Self::Store(err),
            other => Self::Integrity(other.into()),
        }
    }
}

impl SyncError {
    pub fn stage(stage: StageId) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::StageExecution { stage, source }
    }

    /// Consistency violations are bugs, not operational failures.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }
}
