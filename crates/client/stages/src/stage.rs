use crate::SyncError;
use kc_db::RwTx;
use std::fmt;

/// Names of the stages, in the order the full sync registers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    Headers,
    BlockHashes,
    Bodies,
    Senders,
    Execution,
    HashState,
    IntermediateHashes,
    AccountHistoryIndex,
    StorageHistoryIndex,
    Finish,
    MiningCreateBlock,
    MiningExecution,
    MiningFinish,
}

impl StageId {
    /// Key of the stage progress record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headers => "Headers",
            Self::BlockHashes => "BlockHashes",
            Self::Bodies => "Bodies",
            Self::Senders => "Senders",
            Self::Execution => "Execution",
            Self::HashState => "HashState",
            Self::IntermediateHashes => "IntermediateHashes",
            Self::AccountHistoryIndex => "AccountHistoryIndex",
            Self::StorageHistoryIndex => "StorageHistoryIndex",
            Self::Finish => "Finish",
            Self::MiningCreateBlock => "MiningCreateBlock",
            Self::MiningExecution => "MiningExecution",
            Self::MiningFinish => "MiningFinish",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInput {
    /// Persisted progress of the stage when the cycle reached it.
    pub stage_progress: u64,
    pub first_cycle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutput {
    /// New progress, persisted by the scheduler. Never below the input progress.
    pub progress: u64,
}

/// A one-shot instruction to roll a stage back to `point`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindState {
    pub stage: StageId,
    pub point: u64,
    /// Progress of the stage before the unwind.
    pub progress: u64,
}

impl UnwindState {
    pub fn new(stage: StageId, point: u64, progress: u64) -> Result<Self, SyncError> {
        if point >= progress {
            return Err(SyncError::InvalidUnwind { stage, point, progress });
        }
        Ok(Self { stage, point, progress })
    }
}

/// A named unit of sequential chain-state processing.
///
/// Stages only touch the store through the transaction they are handed and never persist their
/// own progress: the scheduler does, from [ExecOutput::progress] and [UnwindState::point].
pub trait Stage: Send {
    fn id(&self) -> StageId;

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput>;

    /// Reverts everything the stage derived for blocks above `unwind.point`.
    fn unwind(&mut self, tx: &mut RwTx, unwind: &UnwindState) -> anyhow::Result<()>;
}

pub type ExecOverrideFn = Box<dyn FnMut(&mut RwTx, ExecInput) -> anyhow::Result<ExecOutput> + Send>;

/// How a stage is executed: its own [Stage::execute], or a substitute installed by tooling.
#[derive(Default)]
pub enum ExecFn {
    #[default]
    Default,
    Override(ExecOverrideFn),
}

impl fmt::Debug for ExecFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Override(_) => f.write_str("Override(..)"),
        }
    }
}

impl ExecFn {
    pub fn run(&mut self, stage: &mut dyn Stage, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        match self {
            Self::Default => stage.execute(tx, input),
            Self::Override(f) => f(tx, input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case::same_point(10, 10)]
    #[case::forward(11, 10)]
    fn unwind_must_go_backward(#[case] point: u64, #[case] progress: u64) {
        assert_matches!(
            UnwindState::new(StageId::Execution, point, progress),
            Err(SyncError::InvalidUnwind { stage: StageId::Execution, .. })
        );
    }

    #[test]
    fn unwind_state() {
        let unwind = UnwindState::new(StageId::HashState, 4, 7).unwrap();
        assert_eq!((unwind.point, unwind.progress), (4, 7));
    }
}
