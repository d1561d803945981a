//! The stages of the default pipeline, in the order they run.

use crate::stage::{Stage, StageId};
use kc_db::{ChangeSetDomain, PruneMode, RwTx};
use kc_exec::StateCommitment;
use std::sync::Arc;

mod execution;
mod external;
mod hash_state;
mod history_index;
mod intermediate_hashes;

pub use execution::{execute_blocks, unwind_execution, ExecutionCfg, ExecutionStage};
pub use external::{ExternalStage, FinishStage};
pub use hash_state::HashStateStage;
pub use history_index::HistoryIndexStage;
pub use intermediate_hashes::IntermediateHashesStage;

/// Unwinding to `point` reads the change-sets of every block above it.
pub(crate) fn ensure_above_prune_horizon(tx: &RwTx, point: u64) -> anyhow::Result<()> {
    for domain in ChangeSetDomain::ALL {
        let horizon = tx.get_prune_horizon(domain)?;
        anyhow::ensure!(
            point + 1 >= horizon,
            "Cannot unwind to block {point}: {domain} change-sets are pruned below block {horizon}"
        );
    }
    Ok(())
}

pub fn default_stages(
    exec: ExecutionCfg,
    commitment: Arc<dyn StateCommitment>,
    prune_mode: PruneMode,
) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> =
        ExternalStage::IDS.into_iter().map(|id| Box::new(ExternalStage::new(id)) as Box<dyn Stage>).collect();
    stages.push(Box::new(ExecutionStage::new(exec)));
    stages.push(Box::new(HashStateStage));
    stages.push(Box::new(IntermediateHashesStage::new(commitment)));
    stages.push(Box::new(HistoryIndexStage::new(ChangeSetDomain::Account, prune_mode)));
    stages.push(Box::new(HistoryIndexStage::new(ChangeSetDomain::Storage, prune_mode)));
    stages.push(Box::new(FinishStage));
    stages
}

/// Ids of [default_stages], in order.
pub const DEFAULT_STAGE_IDS: [StageId; 10] = [
    StageId::Headers,
    StageId::BlockHashes,
    StageId::Bodies,
    StageId::Senders,
    StageId::Execution,
    StageId::HashState,
    StageId::IntermediateHashes,
    StageId::AccountHistoryIndex,
    StageId::StorageHistoryIndex,
    StageId::Finish,
];
