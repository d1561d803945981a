mod pipeline;

use crate::{
    chain_builder::ChainBuilder,
    stages::{default_stages, execute_blocks, ExecutionCfg, ExternalStage},
    Stage, StageId, StagedSync, Stepper, StepperConfig,
};
use kc_db::{PruneMode, RocksDBStorage, RwTx};
use kc_exec::{FlatCommitment, TransferExecutor};
use kp_block::ChainConfig;
use std::sync::Arc;

/// Small enough that most runs flush the state buffer more than once.
const TEST_BATCH_SIZE: usize = 4 * 1024;

pub(crate) fn chain(blocks: u64) -> ChainBuilder {
    let mut chain = ChainBuilder::new(ChainConfig::devnet(), 42, 6).unwrap();
    chain.push_random_blocks(blocks).unwrap();
    chain
}

/// Runs the download stages so that they report the blocks present in the store.
pub(crate) fn import_blocks(tx: &mut RwTx) {
    let stages = ExternalStage::IDS.into_iter().map(|id| Box::new(ExternalStage::new(id)) as Box<dyn Stage>).collect();
    StagedSync::new(stages).run_cycle(tx, true).unwrap();
}

pub(crate) fn db_with_chain(chain: &ChainBuilder) -> RocksDBStorage {
    let db = RocksDBStorage::open_for_testing();
    let mut tx = db.begin_rw().unwrap();
    chain.write_to(&mut tx).unwrap();
    import_blocks(&mut tx);
    tx.commit().unwrap();
    db
}

pub(crate) fn exec_cfg() -> ExecutionCfg {
    ExecutionCfg::new(Arc::new(TransferExecutor), Arc::new(ChainConfig::devnet()), TEST_BATCH_SIZE)
}

pub(crate) fn full_sync(prune_mode: PruneMode) -> StagedSync {
    StagedSync::new(default_stages(exec_cfg(), Arc::new(FlatCommitment), prune_mode))
}

pub(crate) fn stepper(config: StepperConfig) -> Stepper {
    Stepper::new(
        config.batch_size(TEST_BATCH_SIZE),
        Arc::new(ChainConfig::devnet()),
        Arc::new(TransferExecutor),
        Arc::new(FlatCommitment),
    )
}

pub(crate) fn progress(db: &RocksDBStorage, stage: StageId) -> u64 {
    db.begin_rw().unwrap().get_stage_progress(stage.as_str()).unwrap()
}

/// Runs the state stages with execution capped at `to`.
pub(crate) fn sync_to(db: &RocksDBStorage, to: u64) {
    let cfg = exec_cfg();
    let mut sync = full_sync(PruneMode::Archive);
    sync.set_exec_override(StageId::Execution, move |tx, input| execute_blocks(&cfg, tx, input.stage_progress, Some(to)))
        .unwrap();
    let mut tx = db.begin_rw().unwrap();
    sync.run_cycle(&mut tx, true).unwrap();
    tx.commit().unwrap();
}
