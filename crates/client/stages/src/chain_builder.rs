//! Deterministic chain generator.
//!
//! Blocks are executed against an in-memory copy of the plain state with the same rules the node
//! uses, so their headers carry the state, transaction and receipt roots a correct node computes.
//! The same seed always produces the same chain.

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::Context;
use kc_db::{hashed_key, keys, ChangeSetDomain, RwTx};
use kc_exec::{flat_root, BlockExecutor, StateAccess, TransferExecutor, SELF_DESTRUCT_INPUT};
use kp_block::{receipts_root, transactions_root, uncles_hash, Account, Block, ChainConfig, Header, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;

/// Author of every generated block.
pub const MINER: Address = Address::repeat_byte(0xcc);
pub const GAS_LIMIT: u64 = 30_000_000;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 12;
const STORAGE_SLOTS: u8 = 8;

/// Plain state in memory, keyed and encoded like the plain state buckets.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    accounts: BTreeMap<Vec<u8>, Vec<u8>>,
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryState {
    fn set_raw(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, key: Vec<u8>, value: Vec<u8>) {
        if value.is_empty() {
            map.remove(&key);
        } else {
            map.insert(key, value);
        }
    }

    fn hashed(&self, domain: ChangeSetDomain) -> kc_db::Result<BTreeMap<Vec<u8>, &[u8]>> {
        let plain = match domain {
            ChangeSetDomain::Account => &self.accounts,
            ChangeSetDomain::Storage => &self.storage,
        };
        plain.iter().map(|(key, value)| Ok((hashed_key(domain, key)?, value.as_slice()))).collect()
    }

    /// Root of the state as the commitment over the hashed buckets computes it.
    pub fn state_root(&self) -> kc_db::Result<B256> {
        let accounts = self.hashed(ChangeSetDomain::Account)?;
        let storage = self.hashed(ChangeSetDomain::Storage)?;
        Ok(flat_root(
            accounts.iter().map(|(key, value)| (key.as_slice(), *value)),
            storage.iter().map(|(key, value)| (key.as_slice(), *value)),
        ))
    }
}

impl StateAccess for MemoryState {
    fn account(&mut self, address: &Address) -> anyhow::Result<Option<Account>> {
        match self.accounts.get(address.as_slice()) {
            Some(raw) => Ok(Some(Account::decode(raw)?)),
            None => Ok(None),
        }
    }

    fn set_account(&mut self, address: &Address, account: Option<Account>) -> anyhow::Result<()> {
        let raw = match account {
            Some(account) => account.encode()?,
            None => vec![],
        };
        Self::set_raw(&mut self.accounts, address.to_vec(), raw);
        Ok(())
    }

    fn storage(&mut self, address: &Address, incarnation: u64, slot: &B256) -> anyhow::Result<B256> {
        let key = keys::storage_key(address, incarnation, slot);
        Ok(self.storage.get(key.as_slice()).map(|raw| B256::from_slice(raw)).unwrap_or_default())
    }

    fn set_storage(&mut self, address: &Address, incarnation: u64, slot: &B256, value: B256) -> anyhow::Result<()> {
        let raw = if value.is_zero() { vec![] } else { value.to_vec() };
        Self::set_raw(&mut self.storage, keys::storage_key(address, incarnation, slot).to_vec(), raw);
        Ok(())
    }
}

pub struct ChainBuilder {
    chain_config: ChainConfig,
    executor: TransferExecutor,
    state: MemoryState,
    alloc: Vec<(Address, Account)>,
    blocks: Vec<Block>,
    rng: StdRng,
}

impl ChainBuilder {
    /// A chain holding only a genesis block that funds `funded` accounts.
    pub fn new(chain_config: ChainConfig, seed: u64, funded: u8) -> anyhow::Result<Self> {
        let alloc: Vec<_> = (1..=funded)
            .map(|i| (Address::with_last_byte(i), Account::with_balance(U256::from(1_000_000_000u64))))
            .collect();
        let mut state = MemoryState::default();
        for (address, account) in &alloc {
            state.set_account(address, Some(account.clone()))?;
        }
        let genesis = Block {
            header: Header {
                uncle_hash: uncles_hash(&[]),
                state_root: state.state_root()?,
                transactions_root: transactions_root(&[]),
                receipts_root: receipts_root(&[]),
                difficulty: U256::from(1u64),
                gas_limit: GAS_LIMIT,
                timestamp: GENESIS_TIMESTAMP,
                extra_data: Bytes::from_static(b"kestrel genesis"),
                ..Default::default()
            },
            transactions: vec![],
            uncles: vec![],
        };
        Ok(Self {
            chain_config,
            executor: TransferExecutor,
            state,
            alloc,
            blocks: vec![genesis],
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn head(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, block_n: u64) -> Option<&Block> {
        self.blocks.get(block_n as usize)
    }

    pub fn alloc(&self) -> &[(Address, Account)] {
        &self.alloc
    }

    pub fn state(&self) -> &MemoryState {
        &self.state
    }

    /// Appends a block made of `transactions`, sealed with the roots it produces.
    pub fn push_block(&mut self, transactions: Vec<Transaction>) -> anyhow::Result<&Block> {
        let parent = &self.blocks[self.blocks.len() - 1].header;
        let number = parent.number + 1;
        let mut block = Block {
            header: Header {
                parent_hash: parent.hash(),
                uncle_hash: uncles_hash(&[]),
                coinbase: MINER,
                transactions_root: transactions_root(&transactions),
                difficulty: U256::from(1u64),
                number,
                gas_limit: GAS_LIMIT,
                timestamp: GENESIS_TIMESTAMP + BLOCK_TIME * number,
                extra_data: Bytes::from_static(b"kestrel"),
                nonce: number,
                ..Default::default()
            },
            transactions,
            uncles: vec![],
        };

        let outcome = self
            .executor
            .execute_block(&block, &mut self.state, &self.chain_config)
            .with_context(|| format!("Generating block {number}"))?;
        block.header.gas_used = outcome.gas_used;
        block.header.receipts_root = receipts_root(&outcome.receipts);
        block.header.state_root = self.state.state_root()?;

        self.blocks.push(block);
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    pub fn push_random_blocks(&mut self, count: u64) -> anyhow::Result<()> {
        for _ in 0..count {
            let transactions = self.random_transactions()?;
            self.push_block(transactions)?;
        }
        Ok(())
    }

    fn random_transactions(&mut self) -> anyhow::Result<Vec<Transaction>> {
        let mut nonces = BTreeMap::new();
        let count = self.rng.gen_range(1..=4);
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            let from = self.alloc[self.rng.gen_range(0..self.alloc.len())].0;
            let nonce = match nonces.get(&from) {
                Some(nonce) => *nonce,
                None => self.state.account(&from)?.map(|account| account.nonce).unwrap_or_default(),
            };
            nonces.insert(from, nonce + 1);

            let peer = self.alloc[self.rng.gen_range(0..self.alloc.len())].0;
            let transaction = match self.rng.gen_range(0..10) {
                0..=4 => Transaction { to: peer, value: U256::from(self.rng.gen_range(1..1_000u64)), ..Default::default() },
                5 => Transaction {
                    to: Address::from(self.rng.gen::<[u8; 20]>()),
                    value: U256::from(self.rng.gen_range(1..1_000u64)),
                    ..Default::default()
                },
                6 | 7 => {
                    let slot = B256::with_last_byte(self.rng.gen_range(0..STORAGE_SLOTS));
                    // one write in four clears the slot
                    let value = if self.rng.gen_ratio(1, 4) { B256::ZERO } else { B256::from(self.rng.gen::<[u8; 32]>()) };
                    let mut input = slot.to_vec();
                    input.extend_from_slice(value.as_slice());
                    Transaction { to: peer, input: input.into(), ..Default::default() }
                }
                8 => Transaction { to: from, input: Bytes::from_static(SELF_DESTRUCT_INPUT), ..Default::default() },
                _ => Transaction { to: peer, value: U256::MAX, ..Default::default() },
            };
            transactions.push(Transaction { nonce, from, ..transaction });
        }
        Ok(transactions)
    }

    /// Writes genesis with its allocation and every other block into the blocks bucket.
    pub fn write_to(&self, tx: &mut RwTx) -> anyhow::Result<()> {
        self.write_range(tx, 0, self.head())
    }

    /// Writes blocks `from..=to`. Block 0 comes with the genesis allocation.
    pub fn write_range(&self, tx: &mut RwTx, from: u64, to: u64) -> anyhow::Result<()> {
        for block in self.blocks.iter().skip(from as usize).take_while(|block| block.number() <= to) {
            if block.number() == 0 {
                tx.write_genesis(block, &self.alloc)?;
            } else {
                tx.write_block(block)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_db::RocksDBStorage;
    use kc_exec::{FlatCommitment, StateCommitment};

    #[test]
    fn same_seed_same_chain() {
        let mut a = ChainBuilder::new(ChainConfig::devnet(), 7, 4).unwrap();
        let mut b = ChainBuilder::new(ChainConfig::devnet(), 7, 4).unwrap();
        a.push_random_blocks(20).unwrap();
        b.push_random_blocks(20).unwrap();
        assert_eq!(a.blocks(), b.blocks());

        let mut c = ChainBuilder::new(ChainConfig::devnet(), 8, 4).unwrap();
        c.push_random_blocks(20).unwrap();
        assert_ne!(a.blocks()[20].hash(), c.blocks()[20].hash());
    }

    #[test]
    fn headers_link_to_parents() {
        let mut chain = ChainBuilder::new(ChainConfig::devnet(), 1, 3).unwrap();
        chain.push_random_blocks(10).unwrap();
        for pair in chain.blocks().windows(2) {
            assert_eq!(pair[1].header.parent_hash, pair[0].hash());
            assert_eq!(pair[1].number(), pair[0].number() + 1);
        }
    }

    #[test]
    fn genesis_root_matches_written_state() {
        let chain = ChainBuilder::new(ChainConfig::devnet(), 1, 5).unwrap();
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        chain.write_to(&mut tx).unwrap();
        assert_eq!(FlatCommitment.state_root(&tx).unwrap(), chain.blocks()[0].header.state_root);
    }
}
