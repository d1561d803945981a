use crate::stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState};
use anyhow::Context;
use kc_db::RwTx;
use kc_exec::StateCommitment;
use std::{fmt, sync::Arc};

/// Computes the state root over the hashed state and checks it against the header of the block
/// the hashed state is at.
pub struct IntermediateHashesStage {
    commitment: Arc<dyn StateCommitment>,
}

impl fmt::Debug for IntermediateHashesStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateHashesStage").finish_non_exhaustive()
    }
}

impl IntermediateHashesStage {
    pub fn new(commitment: Arc<dyn StateCommitment>) -> Self {
        Self { commitment }
    }
}

impl Stage for IntermediateHashesStage {
    fn id(&self) -> StageId {
        StageId::IntermediateHashes
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let to = tx.get_stage_progress(StageId::HashState.as_str())?;
        if to <= input.stage_progress {
            return Ok(ExecOutput { progress: input.stage_progress });
        }
        let header = tx.get_header(to)?.with_context(|| format!("Header of block {to} not found"))?;
        let root = self.commitment.state_root(tx).context("Computing state root")?;
        anyhow::ensure!(
            root == header.state_root,
            "Wrong state root at block {to}: header has {:#x}, computed {root:#x}",
            header.state_root
        );
        tracing::debug!("🌳 State root at block {to} is {root:#x}");
        Ok(ExecOutput { progress: to })
    }

    /// The commitment keeps no intermediate data: the next forward run recomputes it from the
    /// hashed state.
    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}
