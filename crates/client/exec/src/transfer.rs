use crate::{BlockExecutor, ExecutionError, ExecutionOutcome, StateAccess};
use alloy_primitives::{Address, B256, U256};
use kp_block::{Account, Block, ChainConfig, Receipt, Transaction};

pub const TX_BASE_GAS: u64 = 21_000;
pub const TX_INPUT_BYTE_GAS: u64 = 16;
/// An input of this length is a `(slot, value)` storage write into the recipient.
pub const STORAGE_WRITE_INPUT_LEN: usize = 64;
/// Sent by an account to itself, re-creates the account with a new incarnation.
pub const SELF_DESTRUCT_INPUT: &[u8] = &[0xff];

pub fn intrinsic_gas(transaction: &Transaction) -> u64 {
    TX_BASE_GAS + TX_INPUT_BYTE_GAS * transaction.input.len() as u64
}

fn new_account() -> Account {
    Account::with_balance(U256::ZERO)
}

/// Minimal state-transition rules: value transfers, raw storage writes and self-destruct, plus a
/// fixed block reward.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferExecutor;

impl TransferExecutor {
    fn apply_transaction(
        &self,
        block_n: u64,
        index: usize,
        transaction: &Transaction,
        state: &mut dyn StateAccess,
    ) -> anyhow::Result<bool> {
        let mut sender = state.account(&transaction.from)?.unwrap_or_else(new_account);
        if transaction.nonce != sender.nonce {
            return Err(ExecutionError::NonceMismatch { block_n, index, expected: sender.nonce, got: transaction.nonce }
                .into());
        }
        sender.nonce += 1;

        if transaction.to == transaction.from && &transaction.input[..] == SELF_DESTRUCT_INPUT {
            let reborn = Account { incarnation: sender.incarnation + 1, ..sender };
            tracing::debug!("Block {block_n}: {} re-created with incarnation {}", transaction.from, reborn.incarnation);
            state.set_account(&transaction.from, Some(reborn))?;
            return Ok(true);
        }

        if sender.balance < transaction.value {
            state.set_account(&transaction.from, Some(sender))?;
            return Ok(false);
        }
        sender.balance -= transaction.value;
        state.set_account(&transaction.from, Some(sender))?;

        let mut recipient = state.account(&transaction.to)?.unwrap_or_else(new_account);
        recipient.balance += transaction.value;
        if transaction.input.len() == STORAGE_WRITE_INPUT_LEN {
            let slot = B256::from_slice(&transaction.input[..32]);
            let value = B256::from_slice(&transaction.input[32..]);
            state.set_storage(&transaction.to, recipient.incarnation, &slot, value)?;
        }
        state.set_account(&transaction.to, Some(recipient))?;
        Ok(true)
    }

    fn reward(&self, coinbase: &Address, reward: U256, state: &mut dyn StateAccess) -> anyhow::Result<()> {
        if reward.is_zero() {
            return Ok(());
        }
        let mut author = state.account(coinbase)?.unwrap_or_else(new_account);
        author.balance += reward;
        state.set_account(coinbase, Some(author))
    }
}

impl BlockExecutor for TransferExecutor {
    fn execute_block(
        &self,
        block: &Block,
        state: &mut dyn StateAccess,
        chain_config: &ChainConfig,
    ) -> anyhow::Result<ExecutionOutcome> {
        let block_n = block.number();
        let mut gas_used = 0u64;
        let mut receipts = Vec::with_capacity(block.transactions.len());
        for (index, transaction) in block.transactions.iter().enumerate() {
            let success = self.apply_transaction(block_n, index, transaction, state)?;
            gas_used = gas_used.checked_add(intrinsic_gas(transaction)).ok_or(ExecutionError::GasOverflow { block_n })?;
            receipts.push(Receipt { success, cumulative_gas_used: gas_used });
        }
        self.reward(&block.header.coinbase, chain_config.block_reward, state)?;
        Ok(ExecutionOutcome { receipts, gas_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferedState;
    use alloy_primitives::Bytes;
    use assert_matches::assert_matches;
    use kc_db::RocksDBStorage;
    use kp_block::Header;
    use rstest::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);
    const MINER: Address = Address::repeat_byte(0xcc);

    fn transfer(nonce: u64, from: Address, to: Address, value: u64, input: &[u8]) -> Transaction {
        Transaction { nonce, from, to, value: U256::from(value), input: Bytes::copy_from_slice(input) }
    }

    fn block(transactions: Vec<Transaction>) -> Block {
        Block { header: Header { number: 1, coinbase: MINER, ..Default::default() }, transactions, uncles: vec![] }
    }

    #[fixture]
    fn db() -> RocksDBStorage {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        tx.put_account(&ALICE, Some(&Account::with_balance(U256::from(100u64)))).unwrap();
        tx.commit().unwrap();
        db
    }

    #[rstest]
    fn transfers_storage_and_reward(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        let mut state = BufferedState::new(&mut tx, usize::MAX);
        let mut input = [0u8; 64];
        input[31] = 1;
        input[63] = 9;
        let block = block(vec![transfer(0, ALICE, BOB, 40, &[]), transfer(1, ALICE, BOB, 0, &input), transfer(2, ALICE, BOB, 1000, &[])]);

        let outcome = TransferExecutor.execute_block(&block, &mut state, &ChainConfig::devnet()).unwrap();
        assert_eq!(outcome.gas_used, 3 * 21_000 + 64 * 16);
        assert_eq!(outcome.receipts.iter().map(|r| r.success).collect::<Vec<_>>(), vec![true, true, false]);
        assert_eq!(outcome.receipts.last().unwrap().cumulative_gas_used, outcome.gas_used);

        let alice = state.account(&ALICE).unwrap().unwrap();
        assert_eq!((alice.nonce, alice.balance), (3, U256::from(60u64)));
        let bob = state.account(&BOB).unwrap().unwrap();
        assert_eq!(bob.balance, U256::from(40u64));
        assert_eq!(state.storage(&BOB, bob.incarnation, &B256::with_last_byte(1)).unwrap(), B256::with_last_byte(9));
        assert_eq!(state.account(&MINER).unwrap().unwrap().balance, ChainConfig::devnet().block_reward);
    }

    #[rstest]
    fn self_destruct_bumps_incarnation(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        let mut state = BufferedState::new(&mut tx, usize::MAX);
        let block = block(vec![transfer(0, ALICE, ALICE, 0, SELF_DESTRUCT_INPUT)]);
        TransferExecutor.execute_block(&block, &mut state, &ChainConfig::devnet()).unwrap();
        let alice = state.account(&ALICE).unwrap().unwrap();
        assert_eq!((alice.nonce, alice.incarnation, alice.balance), (1, 2, U256::from(100u64)));
    }

    #[rstest]
    fn nonce_mismatch_fails_the_block(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        let mut state = BufferedState::new(&mut tx, usize::MAX);
        let block = block(vec![transfer(5, ALICE, BOB, 1, &[])]);
        let err = TransferExecutor.execute_block(&block, &mut state, &ChainConfig::devnet()).unwrap_err();
        assert_matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::NonceMismatch { block_n: 1, index: 0, expected: 0, got: 5 })
        );
    }
}
