use super::ensure_above_prune_horizon;
use crate::stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState};
use kc_db::{keys, ChangeSetDomain, PruneMode, RoaringTreemap, RwTx, StorageError};
use std::collections::BTreeMap;

/// Builds the history index of one domain from its change-set log.
#[derive(Debug)]
pub struct HistoryIndexStage {
    domain: ChangeSetDomain,
    prune_mode: PruneMode,
}

impl HistoryIndexStage {
    pub fn new(domain: ChangeSetDomain, prune_mode: PruneMode) -> Self {
        Self { domain, prune_mode }
    }

    /// Entities changed in blocks `[from, to]` with the blocks they changed at.
    fn collect(&self, tx: &RwTx, from: u64, to: u64) -> kc_db::Result<BTreeMap<Vec<u8>, RoaringTreemap>> {
        let mut changed: BTreeMap<Vec<u8>, RoaringTreemap> = BTreeMap::new();
        tx.walk_changesets(self.domain, from, |block_n, key, _| {
            if block_n > to {
                return Ok::<_, StorageError>(false);
            }
            changed.entry(keys::key_without_incarnation(key)).or_default().insert(block_n);
            Ok(true)
        })?;
        Ok(changed)
    }
}

impl Stage for HistoryIndexStage {
    fn id(&self) -> StageId {
        match self.domain {
            ChangeSetDomain::Account => StageId::AccountHistoryIndex,
            ChangeSetDomain::Storage => StageId::StorageHistoryIndex,
        }
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let to = tx.get_stage_progress(StageId::Execution.as_str())?;
        if to <= input.stage_progress {
            return Ok(ExecOutput { progress: input.stage_progress });
        }
        let changed = self.collect(tx, input.stage_progress + 1, to)?;
        for (entity, blocks) in &changed {
            tx.history_append(self.domain, entity, blocks)?;
        }
        tracing::debug!("Indexed {} {} entities up to block {to}", changed.len(), self.domain);

        let horizon = self.prune_mode.prune_to(to);
        if horizon > 0 {
            tx.prune_domain(self.domain, horizon)?;
        }
        Ok(ExecOutput { progress: to })
    }

    fn unwind(&mut self, tx: &mut RwTx, unwind: &UnwindState) -> anyhow::Result<()> {
        ensure_above_prune_horizon(tx, unwind.point)?;
        let changed = self.collect(tx, unwind.point + 1, u64::MAX)?;
        for entity in changed.keys() {
            tx.history_truncate(self.domain, entity, unwind.point + 1)?;
        }
        Ok(())
    }
}
