//! Drives the state stages forward and backward in small steps, checking the change-set log,
//! history index, state root and block production along the way.
//!
//! Every step runs inside its own transaction: the transaction is committed and a new one opened
//! before the forward cycle, after it, and after every unwind.

use crate::{
    mining::{Miner, MiningConfig},
    stage::StageId,
    stages::{default_stages, execute_blocks, ExecutionCfg, ExternalStage},
    StagedSync, SyncError,
};
use kc_db::{PruneMode, RocksDBStorage, RwTx};
use kc_exec::{BlockExecutor, StateCommitment};
use kc_integrity::{check_changes, check_mined_block, check_trie, compare_states, ExpectedChangeSets};
use kp_block::ChainConfig;
use kp_utils::{service::ServiceContext, PerfStopwatch};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepperConfig {
    /// Blocks to retreat after every forward step.
    pub unwind: u64,
    /// Blocks to advance before retreating.
    pub unwind_every: u64,
    /// Absolute target. Defaults to the senders progress.
    pub stop_at: Option<u64>,
    /// Check change-sets, history index and state root after every forward step.
    pub integrity_fast: bool,
    /// With `integrity_fast`, also rebuild the hashed state from the plain state and compare.
    pub integrity_slow: bool,
    /// Bytes of state writes buffered in memory before they are flushed into the transaction.
    pub batch_size: usize,
    pub mining: MiningConfig,
    pub prune_mode: PruneMode,
    /// Store to diff the final state against.
    pub reference_db: Option<PathBuf>,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            unwind: 0,
            unwind_every: 0,
            stop_at: None,
            integrity_fast: false,
            integrity_slow: false,
            batch_size: 512 * 1024 * 1024,
            mining: MiningConfig::default(),
            prune_mode: PruneMode::Archive,
            reference_db: None,
        }
    }
}

impl StepperConfig {
    pub fn unwind(self, unwind: u64) -> Self {
        Self { unwind, ..self }
    }

    pub fn unwind_every(self, unwind_every: u64) -> Self {
        Self { unwind_every, ..self }
    }

    pub fn stop_at(self, stop_at: Option<u64>) -> Self {
        Self { stop_at, ..self }
    }

    pub fn integrity(self, fast: bool, slow: bool) -> Self {
        Self { integrity_fast: fast, integrity_slow: slow, ..self }
    }

    pub fn batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn mining(self, mining: MiningConfig) -> Self {
        Self { mining, ..self }
    }

    pub fn prune_mode(self, prune_mode: PruneMode) -> Self {
        Self { prune_mode, ..self }
    }

    pub fn reference_db(self, reference_db: Option<PathBuf>) -> Self {
        Self { reference_db, ..self }
    }
}

/// Where a run of [Stepper::sync_by_small_steps] stops and how far each step goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub stop_at: u64,
    /// Retreating more than advancing: the run walks the chain down to `stop_at`.
    pub backward: bool,
    every: u64,
    unwind: u64,
}

impl StepPlan {
    pub fn new(config: &StepperConfig, exec_at: u64, senders_at: u64) -> Self {
        let (every, unwind) = (config.unwind_every, config.unwind);
        let stop = config.stop_at.filter(|stop| *stop > 0);
        let backward = every < unwind;

        let stop_at = match stop {
            None if every == 0 && unwind > 0 => exec_at.saturating_sub(unwind),
            Some(stop) if stop < senders_at => stop,
            _ if backward => 1,
            _ => senders_at,
        };
        Self { stop_at, backward, every, unwind }
    }

    pub fn is_done(&self, exec_at: u64) -> bool {
        if self.backward {
            exec_at <= self.stop_at
        } else {
            exec_at >= self.stop_at
        }
    }

    /// Forward target of the next step, `None` once no step can make progress. Reaching the stop
    /// block going forward cancels the retreats.
    pub fn next_target(&mut self, exec_at: u64) -> Result<Option<u64>, SyncError> {
        let mut target = self.stop_at;
        if self.every > 0 || self.unwind > 0 {
            let ahead = exec_at.checked_add(self.every).ok_or_else(|| {
                SyncError::Configuration(
                    format!("--unwind-every: {} blocks past block {exec_at} is out of range", self.every).into(),
                )
            })?;
            if ahead <= self.unwind {
                return Ok(None);
            }
            target = ahead - self.unwind;
        }

        if self.backward {
            Ok(Some(target.max(self.stop_at)))
        } else {
            if target >= self.stop_at {
                self.unwind = 0;
            }
            Ok(Some(target.min(self.stop_at)))
        }
    }

    /// Going backward, unwinds never pass the stop block.
    pub fn unwind_point(&self, exec_at: u64) -> Option<u64> {
        let point = exec_at.saturating_sub(self.unwind);
        (self.unwind > 0).then(|| if self.backward { point.max(self.stop_at) } else { point })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { exec_at: u64 },
    /// The context was cancelled, everything up to the last commit is kept.
    Cancelled { exec_at: u64 },
}

impl StepOutcome {
    pub fn exec_at(&self) -> u64 {
        match self {
            Self::Completed { exec_at } | Self::Cancelled { exec_at } => *exec_at,
        }
    }
}

fn reopen(db: &RocksDBStorage, tx: RwTx) -> Result<RwTx, SyncError> {
    tx.commit()?;
    Ok(db.begin_rw()?)
}

fn execution_progress(tx: &RwTx) -> Result<u64, SyncError> {
    Ok(tx.get_stage_progress(StageId::Execution.as_str())?)
}

pub struct Stepper {
    config: StepperConfig,
    chain_config: Arc<ChainConfig>,
    executor: Arc<dyn BlockExecutor>,
    commitment: Arc<dyn StateCommitment>,
}

impl fmt::Debug for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stepper")
            .field("config", &self.config)
            .field("chain", &self.chain_config.chain_name)
            .finish_non_exhaustive()
    }
}

impl Stepper {
    pub fn new(
        config: StepperConfig,
        chain_config: Arc<ChainConfig>,
        executor: Arc<dyn BlockExecutor>,
        commitment: Arc<dyn StateCommitment>,
    ) -> Self {
        Self { config, chain_config, executor, commitment }
    }

    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    fn exec_cfg(&self) -> ExecutionCfg {
        ExecutionCfg::new(Arc::clone(&self.executor), Arc::clone(&self.chain_config), self.config.batch_size)
    }

    fn state_stages(&self, exec: ExecutionCfg) -> StagedSync {
        StagedSync::new(default_stages(exec, Arc::clone(&self.commitment), self.config.prune_mode))
    }

    /// Alternates forward steps of `unwind_every - unwind` blocks with unwinds of `unwind`
    /// blocks until the stop block is reached. Blocks are expected to be present already: the
    /// download stages are not run.
    #[tracing::instrument(skip_all, fields(unwind = self.config.unwind, every = self.config.unwind_every))]
    pub fn sync_by_small_steps(
        &self,
        db: &RocksDBStorage,
        reference: Option<&RocksDBStorage>,
        ctx: &ServiceContext,
    ) -> Result<StepOutcome, SyncError> {
        let expected = ExpectedChangeSets::new();
        let exec = self.exec_cfg().with_change_set_hook(expected.hook());
        let mut sync = self.state_stages(exec.clone());
        sync.disable_stages(&ExternalStage::IDS);
        let mut miner = self
            .config
            .mining
            .enabled
            .then(|| Miner::new(self.config.mining.clone(), self.exec_cfg(), Arc::clone(&self.commitment)));

        let mut tx = db.begin_rw()?;
        let senders_at = tx.get_stage_progress(StageId::Senders.as_str())?;
        let mut exec_at = execution_progress(&tx)?;
        let mut plan = StepPlan::new(&self.config, exec_at, senders_at);
        tracing::info!("🚶 Stepping from block {exec_at} to block {}", plan.stop_at);

        while !plan.is_done(exec_at) {
            if ctx.is_cancelled() {
                tracing::info!("Stopped at block {exec_at}");
                return Ok(StepOutcome::Cancelled { exec_at });
            }
            tx = reopen(db, tx)?;

            exec_at = execution_progress(&tx)?;
            let Some(exec_to) = plan.next_target(exec_at)? else {
                tracing::debug!("No step can go past block {exec_at}");
                break;
            };

            let cfg = exec.clone();
            sync.set_exec_override(StageId::Execution, move |tx, input| {
                execute_blocks(&cfg, tx, input.stage_progress, Some(exec_to))
            })?;
            sync.set_current_stage(StageId::Execution)?;
            sync.run_cycle(&mut tx, false)?;

            if self.config.integrity_fast {
                check_changes(&expected, &tx, exec_at, self.config.prune_mode.prune_to(exec_to))?;
                let hashed_at = tx.get_stage_progress(StageId::IntermediateHashes.as_str())?;
                check_trie(&tx, self.commitment.as_ref(), hashed_at, self.config.integrity_slow)?;
            }

            tx = reopen(db, tx)?;
            exec_at = execution_progress(&tx)?;
            tracing::debug!("Stepped to block {exec_at}");
            if exec_at == plan.stop_at {
                break;
            }

            if let Some(miner) = &mut miner {
                if let Some(next) = tx.get_block(exec_at + 1)?.filter(|block| !block.header.coinbase.is_zero()) {
                    miner.mine_like(&mut tx, &next)?;
                    tx.rollback();
                    tx = db.begin_rw()?;
                    let mined = miner.wait_result(ctx)?;
                    check_mined_block(&next.header, &mined.header, &self.chain_config)?;
                    tracing::debug!("⛏️ Block {} mined identically", next.number());
                }
            }

            if let Some(point) = plan.unwind_point(exec_at) {
                sync.unwind_to(&mut tx, point, None)?;
                tx = reopen(db, tx)?;
                exec_at = execution_progress(&tx)?;
                tracing::debug!("Unwound to block {exec_at}");
            }
        }
        tx.commit()?;

        if let Some(reference) = reference {
            let ours = db.begin_rw()?;
            let theirs = reference.begin_rw()?;
            compare_states(&ours, &theirs)?;
            tracing::info!("🔍 State matches the reference store");
        }

        tracing::info!("✅ Execution at block {exec_at}");
        Ok(StepOutcome::Completed { exec_at })
    }

    /// Re-executes the `unwind` blocks above the execution progress, rolling back after each run,
    /// until cancelled or `iterations` runs are done.
    #[tracing::instrument(skip(self, db, ctx))]
    pub fn loop_exec(
        &self,
        db: &RocksDBStorage,
        ctx: &ServiceContext,
        unwind: u64,
        iterations: Option<u64>,
    ) -> Result<StepOutcome, SyncError> {
        let exec = self.exec_cfg();
        let mut sync = self.state_stages(exec.clone());
        sync.disable_all();
        sync.enable_stages(&[StageId::Execution]);

        let mut tx = db.begin_rw()?;
        let from = execution_progress(&tx)?;
        let to = from.checked_add(unwind).ok_or_else(|| {
            SyncError::Configuration(format!("--unwind: {unwind} blocks past block {from} is out of range").into())
        })?;
        sync.set_exec_override(StageId::Execution, move |tx, input| {
            execute_blocks(&exec, tx, input.stage_progress, Some(to))
        })?;

        let mut runs = 0;
        while iterations.map_or(true, |iterations| runs < iterations) {
            if ctx.is_cancelled() {
                return Ok(StepOutcome::Cancelled { exec_at: from });
            }
            sync.set_current_stage(StageId::Execution)?;
            let stopwatch = PerfStopwatch::new();
            sync.run_cycle(&mut tx, false)?;
            tracing::info!("🔁 Executed blocks {}..={to} in {:?}", from + 1, stopwatch.elapsed());
            tx.rollback();
            tx = db.begin_rw()?;
            runs += 1;
        }
        Ok(StepOutcome::Completed { exec_at: from })
    }

    /// Unwinds the hashed state and the state root stage by `unwind` blocks, brings the hashed
    /// state back, then recomputes the state root over and over, rolling back after each run.
    #[tracing::instrument(skip(self, db, ctx))]
    pub fn loop_ih(
        &self,
        db: &RocksDBStorage,
        ctx: &ServiceContext,
        unwind: u64,
        iterations: Option<u64>,
    ) -> Result<StepOutcome, SyncError> {
        let mut sync = self.state_stages(self.exec_cfg());
        sync.disable_all();
        sync.enable_stages(&[StageId::HashState, StageId::IntermediateHashes]);

        let mut tx = db.begin_rw()?;
        sync.run_cycle(&mut tx, false)?;
        let hashed_at = tx.get_stage_progress(StageId::HashState.as_str())?;
        let to = hashed_at.saturating_sub(unwind);
        sync.unwind_to(&mut tx, to, None)?;
        tx = reopen(db, tx)?;

        sync.disable_stages(&[StageId::IntermediateHashes]);
        sync.set_current_stage(StageId::HashState)?;
        sync.run_cycle(&mut tx, false)?;
        tx = reopen(db, tx)?;

        sync.disable_stages(&[StageId::HashState]);
        sync.enable_stages(&[StageId::IntermediateHashes]);
        let mut runs = 0;
        while iterations.map_or(true, |iterations| runs < iterations) {
            if ctx.is_cancelled() {
                return Ok(StepOutcome::Cancelled { exec_at: hashed_at });
            }
            sync.set_current_stage(StageId::IntermediateHashes)?;
            let stopwatch = PerfStopwatch::new();
            sync.run_cycle(&mut tx, false)?;
            tracing::info!("🔁 State root from block {to} to {hashed_at} in {:?}", stopwatch.elapsed());
            tx.rollback();
            tx = db.begin_rw()?;
            runs += 1;
        }
        Ok(StepOutcome::Completed { exec_at: hashed_at })
    }
}
