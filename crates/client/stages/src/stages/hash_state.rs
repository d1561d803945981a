use super::ensure_above_prune_horizon;
use crate::stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState};
use kc_db::{ChangeSetDomain, RwTx};

/// Mirrors the plain state into the hashed buckets for the keys changed by executed blocks.
#[derive(Debug, Default)]
pub struct HashStateStage;

impl Stage for HashStateStage {
    fn id(&self) -> StageId {
        StageId::HashState
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let to = tx.get_stage_progress(StageId::Execution.as_str())?;
        if to <= input.stage_progress {
            return Ok(ExecOutput { progress: input.stage_progress });
        }
        let mut rehashed = 0;
        for domain in ChangeSetDomain::ALL {
            for key in tx.changed_keys(domain, input.stage_progress + 1, to)? {
                let value = tx.get_plain_raw(domain, &key)?;
                tx.put_hashed_raw(domain, &key, &value)?;
                rehashed += 1;
            }
        }
        tracing::debug!("Re-hashed {rehashed} keys for blocks {}..={to}", input.stage_progress + 1);
        Ok(ExecOutput { progress: to })
    }

    fn unwind(&mut self, tx: &mut RwTx, unwind: &UnwindState) -> anyhow::Result<()> {
        ensure_above_prune_horizon(tx, unwind.point)?;
        for domain in ChangeSetDomain::ALL {
            for (key, value) in tx.values_at_unwind_point(domain, unwind.point)? {
                tx.put_hashed_raw(domain, &key, &value)?;
            }
        }
        Ok(())
    }
}
