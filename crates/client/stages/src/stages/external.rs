use crate::stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState};
use kc_db::RwTx;

/// Headers, block hashes, bodies and senders are produced by the downloader. These stages only
/// report how far the blocks bucket goes.
#[derive(Debug)]
pub struct ExternalStage {
    id: StageId,
}

impl ExternalStage {
    pub const IDS: [StageId; 4] = [StageId::Headers, StageId::BlockHashes, StageId::Bodies, StageId::Senders];

    pub fn new(id: StageId) -> Self {
        Self { id }
    }
}

impl Stage for ExternalStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let highest = tx.highest_block()?.unwrap_or(0);
        Ok(ExecOutput { progress: highest.max(input.stage_progress) })
    }

    /// Downloaded blocks are kept, the downloader re-validates them on its next run.
    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Last stage of a cycle: marks the block everything before it agrees on.
#[derive(Debug, Default)]
pub struct FinishStage;

impl Stage for FinishStage {
    fn id(&self) -> StageId {
        StageId::Finish
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let executed = tx.get_stage_progress(StageId::Execution.as_str())?;
        Ok(ExecOutput { progress: executed.max(input.stage_progress) })
    }

    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}
