//! Block execution for the staged sync.
//!
//! The state-transition rules are a collaborator behind [BlockExecutor]: the execution stage
//! hands it a block and a [StateAccess] view, and gets back the receipts. [BufferedState] is the
//! view the stages use. It keeps writes in memory up to a byte budget and records the value every
//! key held before the block into a [ChangeSetWriter].

use alloy_primitives::{Address, B256};
use kp_block::{Account, Block, ChainConfig, Receipt};

mod commitment;
mod state;
mod transfer;

pub use commitment::{flat_root, FlatCommitment, StateCommitment};
pub use state::{BufferedState, ChangeSetHook, ChangeSetWriter};
pub use transfer::{intrinsic_gas, TransferExecutor, SELF_DESTRUCT_INPUT, STORAGE_WRITE_INPUT_LEN};

/// Read-write view of the plain state used while applying a block.
pub trait StateAccess {
    fn account(&mut self, address: &Address) -> anyhow::Result<Option<Account>>;
    /// Writes or, with `None`, deletes an account.
    fn set_account(&mut self, address: &Address, account: Option<Account>) -> anyhow::Result<()>;
    fn storage(&mut self, address: &Address, incarnation: u64, slot: &B256) -> anyhow::Result<B256>;
    /// Writing zero deletes the slot.
    fn set_storage(&mut self, address: &Address, incarnation: u64, slot: &B256, value: B256) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
}

/// The state-transition function.
pub trait BlockExecutor: Send + Sync {
    fn execute_block(
        &self,
        block: &Block,
        state: &mut dyn StateAccess,
        chain_config: &ChainConfig,
    ) -> anyhow::Result<ExecutionOutcome>;
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Transaction {index} of block {block_n}: nonce {got} does not match sender nonce {expected}")]
    NonceMismatch { block_n: u64, index: usize, expected: u64, got: u64 },
    #[error("Block {block_n}: gas used overflows")]
    GasOverflow { block_n: u64 },
}
