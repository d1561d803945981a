//! Block production sub-pipeline, used by the stepper as a determinism check: a block is produced
//! locally from the inputs of a known block and the two headers are compared.
//!
//! The three stages share a [MiningBlock] and run in their own [StagedSync]. They never move
//! their progress, and the transaction they ran in is rolled back by the caller once the result
//! was sent.

use crate::{
    stage::{ExecInput, ExecOutput, Stage, StageId, UnwindState},
    stages::ExecutionCfg,
    StagedSync, SyncError,
};
use alloy_primitives::{Address, Bytes};
use anyhow::Context;
use kc_db::{ChangeSetDomain, RwTx};
use kc_exec::{BufferedState, StateCommitment};
use kp_block::{receipts_root, transactions_root, uncles_hash, Block, Header, Receipt, Transaction};
use kp_utils::service::ServiceContext;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Author of produced blocks.
    pub etherbase: Address,
    pub extra_data: Bytes,
    /// How long to wait for the produced block.
    pub result_timeout: Duration,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self { enabled: false, etherbase: Address::ZERO, extra_data: Bytes::new(), result_timeout: Duration::from_secs(60) }
    }
}

impl MiningConfig {
    pub fn enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn etherbase(self, etherbase: Address) -> Self {
        Self { etherbase, ..self }
    }

    pub fn extra_data(self, extra_data: Bytes) -> Self {
        Self { extra_data, ..self }
    }

    pub fn result_timeout(self, result_timeout: Duration) -> Self {
        Self { result_timeout, ..self }
    }
}

/// The block being produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiningBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
    pub receipts: Vec<Receipt>,
}

impl MiningBlock {
    pub fn to_block(&self) -> Block {
        Block { header: self.header.clone(), transactions: self.transactions.clone(), uncles: self.uncles.clone() }
    }
}

pub type SharedMiningBlock = Arc<Mutex<MiningBlock>>;

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// An empty block on top of the block the execution stage is at.
pub fn create_block_template(tx: &RwTx, config: &MiningConfig) -> anyhow::Result<MiningBlock> {
    let parent_n = tx.get_stage_progress(StageId::Execution.as_str())?;
    let parent = tx.get_header(parent_n)?.with_context(|| format!("Parent header {parent_n} not found"))?;
    let header = Header {
        parent_hash: parent.hash(),
        coinbase: config.etherbase,
        number: parent_n + 1,
        gas_limit: parent.gas_limit,
        difficulty: parent.difficulty,
        timestamp: unix_now().max(parent.timestamp + 1),
        extra_data: config.extra_data.clone(),
        ..Default::default()
    };
    Ok(MiningBlock { header, ..Default::default() })
}

pub struct MiningCreateBlockStage {
    config: MiningConfig,
    block: SharedMiningBlock,
}

impl fmt::Debug for MiningCreateBlockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiningCreateBlockStage").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Stage for MiningCreateBlockStage {
    fn id(&self) -> StageId {
        StageId::MiningCreateBlock
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let template = create_block_template(tx, &self.config)?;
        *self.block.lock().expect("Poisoned lock") = template;
        Ok(ExecOutput { progress: input.stage_progress })
    }

    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Applies the block's transactions on top of the current state and brings the hashed state of
/// the touched keys along, so that the finish stage can compute the state root.
pub struct MiningExecutionStage {
    cfg: ExecutionCfg,
    block: SharedMiningBlock,
}

impl fmt::Debug for MiningExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiningExecutionStage").field("cfg", &self.cfg).finish_non_exhaustive()
    }
}

impl Stage for MiningExecutionStage {
    fn id(&self) -> StageId {
        StageId::MiningExecution
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let block = self.block.lock().expect("Poisoned lock").to_block();
        let block_n = block.number();

        let mut state = BufferedState::new(tx, usize::MAX);
        let outcome = self
            .cfg
            .executor
            .execute_block(&block, &mut state, &self.cfg.chain_config)
            .with_context(|| format!("Executing mined block {block_n}"))?;
        let changes = state.finish_block()?;
        state.flush()?;

        for domain in ChangeSetDomain::ALL {
            for key in changes.touched_keys(domain) {
                let value = tx.get_plain_raw(domain, key)?;
                tx.put_hashed_raw(domain, key, &value)?;
            }
        }

        let mut mining = self.block.lock().expect("Poisoned lock");
        mining.header.gas_used = outcome.gas_used;
        mining.receipts = outcome.receipts;
        Ok(ExecOutput { progress: input.stage_progress })
    }

    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct MiningFinishStage {
    commitment: Arc<dyn StateCommitment>,
    block: SharedMiningBlock,
    results: Sender<MiningBlock>,
}

impl fmt::Debug for MiningFinishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiningFinishStage").finish_non_exhaustive()
    }
}

impl Stage for MiningFinishStage {
    fn id(&self) -> StageId {
        StageId::MiningFinish
    }

    fn execute(&mut self, tx: &mut RwTx, input: ExecInput) -> anyhow::Result<ExecOutput> {
        let state_root = self.commitment.state_root(tx).context("Computing mined state root")?;
        let mined = {
            let mut mining = self.block.lock().expect("Poisoned lock");
            mining.header.state_root = state_root;
            mining.header.transactions_root = transactions_root(&mining.transactions);
            mining.header.receipts_root = receipts_root(&mining.receipts);
            mining.header.uncle_hash = uncles_hash(&mining.uncles);
            mining.clone()
        };

        let block_n = mined.header.number;
        if self.results.send(mined).is_err() {
            anyhow::bail!("Mining result receiver is gone");
        }
        tracing::debug!("⛏️ Mined block {block_n} with state root {state_root:#x}");
        Ok(ExecOutput { progress: input.stage_progress })
    }

    fn unwind(&mut self, _tx: &mut RwTx, _unwind: &UnwindState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Owns the mining pipeline and the receiving end of its result channel.
pub struct Miner {
    config: MiningConfig,
    sync: StagedSync,
    block: SharedMiningBlock,
    results: Receiver<MiningBlock>,
}

impl fmt::Debug for Miner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Miner").field("config", &self.config).field("sync", &self.sync).finish_non_exhaustive()
    }
}

impl Miner {
    pub fn new(config: MiningConfig, exec: ExecutionCfg, commitment: Arc<dyn StateCommitment>) -> Self {
        let block = SharedMiningBlock::default();
        let (sender, results) = mpsc::channel();
        // Produced blocks must not end up in a change-set shadow.
        let exec = ExecutionCfg { change_set_hook: None, ..exec };
        let sync = StagedSync::new(vec![
            Box::new(MiningCreateBlockStage { config: config.clone(), block: Arc::clone(&block) }),
            Box::new(MiningExecutionStage { cfg: exec, block: Arc::clone(&block) }),
            Box::new(MiningFinishStage { commitment, block: Arc::clone(&block), results: sender }),
        ]);
        Self { config, sync, block, results }
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// Runs the pipeline with the default template.
    pub fn mine(&mut self, tx: &mut RwTx) -> Result<(), SyncError> {
        self.sync.clear_exec_override(StageId::MiningCreateBlock)?;
        self.sync.set_current_stage(StageId::MiningCreateBlock)?;
        self.sync.run_cycle(tx, false)
    }

    /// Runs the pipeline with the inputs of `known` instead of locally chosen ones: author, extra
    /// data, uncles, timestamp, gas limit, difficulty, nonce and transactions.
    #[tracing::instrument(skip_all, fields(block_n = known.number()))]
    pub fn mine_like(&mut self, tx: &mut RwTx, known: &Block) -> Result<(), SyncError> {
        let config = self.config.clone().etherbase(known.header.coinbase).extra_data(known.header.extra_data.clone());
        let block = Arc::clone(&self.block);
        let known = known.clone();
        self.sync.set_exec_override(StageId::MiningCreateBlock, move |tx, input| {
            let mut template = create_block_template(tx, &config)?;
            template.header.timestamp = known.header.timestamp;
            template.header.gas_limit = known.header.gas_limit;
            template.header.difficulty = known.header.difficulty;
            template.header.nonce = known.header.nonce;
            template.uncles = known.uncles.clone();
            template.transactions = known.transactions.clone();
            *block.lock().expect("Poisoned lock") = template;
            Ok(ExecOutput { progress: input.stage_progress })
        })?;
        self.sync.set_current_stage(StageId::MiningCreateBlock)?;
        self.sync.run_cycle(tx, false)
    }

    /// Blocks until the pipeline sent a block, the context is cancelled or the configured
    /// timeout elapses. When several blocks are pending, the last one produced wins.
    pub fn wait_result(&self, ctx: &ServiceContext) -> Result<MiningBlock, SyncError> {
        let deadline = Instant::now() + self.config.result_timeout;
        loop {
            if ctx.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SyncError::MiningTimeout(self.config.result_timeout));
            }
            match self.results.recv_timeout(remaining.min(RESULT_POLL_INTERVAL)) {
                Ok(mined) => return Ok(self.results.try_iter().last().unwrap_or(mined)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SyncError::Integrity(anyhow::anyhow!("Mining result channel closed")))
                }
            }
        }
    }
}
