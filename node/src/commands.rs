//! What each subcommand does once the configuration is known.

use crate::cli::{GenerateChainParams, LoopParams, StateStagesParams};
use anyhow::Context;
use kc_db::{RocksDBConfig, RocksDBStorage};
use kc_exec::{FlatCommitment, TransferExecutor};
use kc_stages::{
    chain_builder::ChainBuilder,
    stages::ExternalStage,
    Stage, StagedSync, StepOutcome, Stepper, StepperConfig,
};
use kp_block::ChainConfig;
use kp_utils::service::ServiceContext;
use std::sync::Arc;

fn stepper(config: StepperConfig, chain_config: ChainConfig) -> Stepper {
    Stepper::new(config, Arc::new(chain_config), Arc::new(TransferExecutor), Arc::new(FlatCommitment))
}

fn report(outcome: StepOutcome) {
    match outcome {
        StepOutcome::Completed { exec_at } => tracing::info!("🏁 Done, execution at block {exec_at}"),
        StepOutcome::Cancelled { exec_at } => tracing::info!("🛑 Stopped early, execution at block {exec_at}"),
    }
}

/// Runs `f` on a blocking thread. The stepper is synchronous and only checks `ctx` between steps.
async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, kc_stages::SyncError> + Send + 'static,
) -> anyhow::Result<T> {
    match tokio::task::spawn_blocking(f).await.context("Joining the stepper thread")? {
        Ok(value) => Ok(value),
        Err(err) if err.is_consistency_violation() => {
            tracing::error!("❗ {err}");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn state_stages(
    params: &StateStagesParams,
    db: RocksDBStorage,
    db_config: &RocksDBConfig,
    chain_config: ChainConfig,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let config = params.stepper_config()?;
    let reference = match &config.reference_db {
        Some(path) => Some(
            RocksDBStorage::open(path, db_config)
                .with_context(|| format!("Opening reference database at {}", path.display()))?,
        ),
        None => None,
    };
    let stepper = stepper(config, chain_config);

    let outcome = run_blocking(move || stepper.sync_by_small_steps(&db, reference.as_ref(), &ctx)).await?;
    report(outcome);
    Ok(())
}

pub async fn loop_exec(
    params: &LoopParams,
    db: RocksDBStorage,
    chain_config: ChainConfig,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let stepper = stepper(params.stepper_config()?, chain_config);
    let (unwind, iterations) = (params.unwind, params.iterations);

    let outcome = run_blocking(move || stepper.loop_exec(&db, &ctx, unwind, iterations)).await?;
    report(outcome);
    Ok(())
}

pub async fn loop_ih(
    params: &LoopParams,
    db: RocksDBStorage,
    chain_config: ChainConfig,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let stepper = stepper(params.stepper_config()?, chain_config);
    let (unwind, iterations) = (params.unwind, params.iterations);

    let outcome = run_blocking(move || stepper.loop_ih(&db, &ctx, unwind, iterations)).await?;
    report(outcome);
    Ok(())
}

/// Writes the chain and runs the download stages over it.
pub fn generate_chain(
    params: &GenerateChainParams,
    db: &RocksDBStorage,
    chain_config: ChainConfig,
) -> anyhow::Result<()> {
    let mut tx = db.begin_rw()?;
    if let Some(head) = tx.highest_block()? {
        anyhow::bail!("Database already holds blocks up to {head}");
    }

    let mut chain = ChainBuilder::new(chain_config, params.seed, params.funded_accounts)?;
    chain.push_random_blocks(params.blocks)?;
    chain.write_to(&mut tx)?;

    let stages = ExternalStage::IDS.into_iter().map(|id| Box::new(ExternalStage::new(id)) as Box<dyn Stage>).collect();
    StagedSync::new(stages).run_cycle(&mut tx, true)?;
    tx.commit()?;

    tracing::info!("🌱 Generated {} blocks, head state root {:#x}", params.blocks, chain.state().state_root()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_stages::StageId;

    #[test]
    fn generated_chain_is_ready_for_the_stepper() {
        let dir = tempfile::tempdir().unwrap();
        let db = RocksDBStorage::open(dir.path(), &RocksDBConfig::default()).unwrap();
        let params = GenerateChainParams { blocks: 12, seed: 3, funded_accounts: 4 };

        generate_chain(&params, &db, ChainConfig::devnet()).unwrap();
        assert!(generate_chain(&params, &db, ChainConfig::devnet()).is_err());

        let outcome = stepper(StepperConfig::default().unwind(2).unwind_every(5), ChainConfig::devnet())
            .sync_by_small_steps(&db, None, &ServiceContext::new_for_testing())
            .unwrap();
        assert_eq!(outcome, StepOutcome::Completed { exec_at: 12 });
        let tx = db.begin_rw().unwrap();
        assert_eq!(tx.get_stage_progress(StageId::Finish.as_str()).unwrap(), 12);
    }
}
