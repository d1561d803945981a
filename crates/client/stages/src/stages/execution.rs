use super::ensure_above_prune_horizon;
use crate::{
    counter::ThroughputCounter,
    stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState},
};
use anyhow::Context;
use kc_db::{ChangeSetDomain, RwTx};
use kc_exec::{BlockExecutor, BufferedState, ChangeSetHook};
use kp_block::{receipts_root, ChainConfig};
use std::{fmt, sync::Arc, time::Duration};

/// Everything needed to apply blocks to the plain state.
#[derive(Clone)]
pub struct ExecutionCfg {
    pub executor: Arc<dyn BlockExecutor>,
    pub chain_config: Arc<ChainConfig>,
    /// Bytes of plain-state writes kept in memory before they are moved into the transaction.
    pub batch_size: usize,
    pub change_set_hook: Option<ChangeSetHook>,
}

impl fmt::Debug for ExecutionCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionCfg")
            .field("chain", &self.chain_config.chain_name)
            .field("batch_size", &self.batch_size)
            .field("change_set_hook", &self.change_set_hook.is_some())
            .finish()
    }
}

impl ExecutionCfg {
    pub fn new(executor: Arc<dyn BlockExecutor>, chain_config: Arc<ChainConfig>, batch_size: usize) -> Self {
        Self { executor, chain_config, batch_size, change_set_hook: None }
    }

    pub fn with_change_set_hook(self, change_set_hook: ChangeSetHook) -> Self {
        Self { change_set_hook: Some(change_set_hook), ..self }
    }
}

/// Applies blocks `(progress, min(to, senders progress)]`, recording change-sets and receipts.
/// Without `to`, executes up to the senders progress.
#[tracing::instrument(skip(cfg, tx))]
pub fn execute_blocks(cfg: &ExecutionCfg, tx: &mut RwTx, progress: u64, to: Option<u64>) -> anyhow::Result<ExecOutput> {
    let senders = tx.get_stage_progress(StageId::Senders.as_str())?;
    let to = to.map_or(senders, |to| to.min(senders));
    if to <= progress {
        return Ok(ExecOutput { progress });
    }

    let mut counter = ThroughputCounter::new(Duration::from_secs(10));
    let mut state = BufferedState::new(tx, cfg.batch_size);
    for block_n in progress + 1..=to {
        let block = state.tx().get_block(block_n)?.with_context(|| format!("Block {block_n} not found"))?;
        let outcome = cfg
            .executor
            .execute_block(&block, &mut state, &cfg.chain_config)
            .with_context(|| format!("Executing block {block_n}"))?;

        anyhow::ensure!(
            outcome.gas_used == block.header.gas_used,
            "Block {block_n}: gas used {} does not match header gas used {}",
            outcome.gas_used,
            block.header.gas_used
        );
        if cfg.chain_config.is_byzantium(block_n) {
            let root = receipts_root(&outcome.receipts);
            anyhow::ensure!(
                root == block.header.receipts_root,
                "Block {block_n}: receipts root {root:#x} does not match header receipts root {:#x}",
                block.header.receipts_root
            );
        }

        let changes = state.finish_block()?;
        if let Some(hook) = &cfg.change_set_hook {
            hook(block_n, &changes);
        }
        for domain in ChangeSetDomain::ALL {
            state.tx().write_changeset(domain, block_n, &changes.changes(domain));
        }
        state.tx().write_receipts(block_n, &outcome.receipts)?;
        if state.flush_if_full()? {
            tracing::debug!("Flushed state buffer at block {block_n}");
        }
        counter.increment();
    }
    state.flush()?;

    tracing::info!(
        "⚡ Executed blocks {}..={to} ({:.1} blocks/s)",
        progress + 1,
        counter.get_throughput()
    );
    Ok(ExecOutput { progress: to })
}

/// Restores the plain state at `point` and drops the change-sets and receipts above it.
pub fn unwind_execution(tx: &mut RwTx, point: u64) -> anyhow::Result<()> {
    ensure_above_prune_horizon(tx, point)?;
    for domain in ChangeSetDomain::ALL {
        let restore = tx.values_at_unwind_point(domain, point)?;
        for (key, value) in &restore {
            tx.put_plain_raw(domain, key, value);
        }
        tx.delete_changesets_from(domain, point + 1)?;
    }
    tx.delete_receipts_from(point + 1)?;
    Ok(())
}

#[derive(Debug)]
pub struct ExecutionStage {
    cfg: ExecutionCfg,
}

impl ExecutionStage {
    pub fn new(cfg: ExecutionCfg) -> Self {
        Self { cfg }
    }
}

impl Stage for ExecutionStage {
    fn id(&self) -> StageId {
        StageId::Execution
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        execute_blocks(&self.cfg, tx, input.stage_progress, None)
    }

    fn unwind(&mut self, tx: &mut RwTx, unwind: &UnwindState) -> anyhow::Result<()> {
        unwind_execution(tx, unwind.point)
    }
}
