use crate::StateAccess;
use alloy_primitives::{Address, B256};
use kc_db::{keys, ChangeSet, ChangeSetDomain, RwTx};
use kp_block::Account;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Called by the execution stage once per block with the change-sets it is about to persist.
/// Verification tooling uses it to keep an independent copy of the log.
pub type ChangeSetHook = Arc<dyn Fn(u64, &ChangeSetWriter) + Send + Sync>;

/// Prior values of the keys touched by one block. Only the first prior value of a key is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSetWriter {
    accounts: BTreeMap<Vec<u8>, Vec<u8>>,
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ChangeSetWriter {
    fn domain_mut(&mut self, domain: ChangeSetDomain) -> &mut BTreeMap<Vec<u8>, Vec<u8>> {
        match domain {
            ChangeSetDomain::Account => &mut self.accounts,
            ChangeSetDomain::Storage => &mut self.storage,
        }
    }

    fn domain(&self, domain: ChangeSetDomain) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        match domain {
            ChangeSetDomain::Account => &self.accounts,
            ChangeSetDomain::Storage => &self.storage,
        }
    }

    fn record(&mut self, domain: ChangeSetDomain, key: &[u8], prior: Vec<u8>) {
        self.domain_mut(domain).entry(key.to_vec()).or_insert(prior);
    }

    pub fn changes(&self, domain: ChangeSetDomain) -> ChangeSet {
        self.domain(domain).iter().map(|(key, value)| kc_db::Change { key: key.clone(), value: value.clone() }).collect()
    }

    pub fn account_changes(&self) -> ChangeSet {
        self.changes(ChangeSetDomain::Account)
    }

    pub fn storage_changes(&self) -> ChangeSet {
        self.changes(ChangeSetDomain::Storage)
    }

    /// Plain keys touched in `domain`, in key order.
    pub fn touched_keys(&self, domain: ChangeSetDomain) -> impl Iterator<Item = &[u8]> + '_ {
        self.domain(domain).keys().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.storage.is_empty()
    }
}

/// Plain-state view over a [RwTx] that keeps writes in memory until they exceed `batch_size`
/// bytes, and captures the change-set of the block being applied.
pub struct BufferedState<'a> {
    tx: &'a mut RwTx,
    accounts: BTreeMap<Vec<u8>, Vec<u8>>,
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
    buffered_bytes: usize,
    batch_size: usize,
    current: ChangeSetWriter,
}

impl fmt::Debug for BufferedState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedState")
            .field("buffered_bytes", &self.buffered_bytes)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<'a> BufferedState<'a> {
    pub fn new(tx: &'a mut RwTx, batch_size: usize) -> Self {
        Self {
            tx,
            accounts: BTreeMap::new(),
            storage: BTreeMap::new(),
            buffered_bytes: 0,
            batch_size,
            current: ChangeSetWriter::default(),
        }
    }

    /// The underlying transaction. Plain-state writes still sitting in the buffer are not
    /// visible through it.
    pub fn tx(&mut self) -> &mut RwTx {
        self.tx
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    fn buffer(&self, domain: ChangeSetDomain) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        match domain {
            ChangeSetDomain::Account => &self.accounts,
            ChangeSetDomain::Storage => &self.storage,
        }
    }

    fn read_raw(&self, domain: ChangeSetDomain, key: &[u8]) -> kc_db::Result<Vec<u8>> {
        match self.buffer(domain).get(key) {
            Some(value) => Ok(value.clone()),
            None => self.tx.get_plain_raw(domain, key),
        }
    }

    fn write_raw(&mut self, domain: ChangeSetDomain, key: &[u8], value: Vec<u8>) -> kc_db::Result<()> {
        let prior = self.read_raw(domain, key)?;
        if prior == value {
            return Ok(());
        }
        self.current.record(domain, key, prior);
        self.buffered_bytes += key.len() + value.len();
        let buffer = match domain {
            ChangeSetDomain::Account => &mut self.accounts,
            ChangeSetDomain::Storage => &mut self.storage,
        };
        buffer.insert(key.to_vec(), value);
        Ok(())
    }

    /// Closes the current block and returns its change-set. Keys that ended the block with their
    /// prior value are dropped.
    pub fn finish_block(&mut self) -> kc_db::Result<ChangeSetWriter> {
        let mut writer = std::mem::take(&mut self.current);
        for domain in ChangeSetDomain::ALL {
            let mut unchanged = vec![];
            for (key, prior) in writer.domain(domain) {
                if &self.read_raw(domain, key)? == prior {
                    unchanged.push(key.clone());
                }
            }
            for key in unchanged {
                writer.domain_mut(domain).remove(&key);
            }
        }
        Ok(writer)
    }

    pub fn is_full(&self) -> bool {
        self.buffered_bytes >= self.batch_size
    }

    /// Flushes when the buffer is over budget. Returns whether it did.
    pub fn flush_if_full(&mut self) -> kc_db::Result<bool> {
        if !self.is_full() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Moves every buffered write into the transaction.
    pub fn flush(&mut self) -> kc_db::Result<()> {
        tracing::debug!("Flushing {} buffered state bytes", self.buffered_bytes);
        for (key, value) in std::mem::take(&mut self.accounts) {
            self.tx.put_plain_raw(ChangeSetDomain::Account, &key, &value);
        }
        for (key, value) in std::mem::take(&mut self.storage) {
            self.tx.put_plain_raw(ChangeSetDomain::Storage, &key, &value);
        }
        self.buffered_bytes = 0;
        Ok(())
    }
}

impl StateAccess for BufferedState<'_> {
    fn account(&mut self, address: &Address) -> anyhow::Result<Option<Account>> {
        let raw = self.read_raw(ChangeSetDomain::Account, address.as_slice())?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(Account::decode(&raw)?))
    }

    fn set_account(&mut self, address: &Address, account: Option<Account>) -> anyhow::Result<()> {
        let raw = match account {
            Some(account) => account.encode()?,
            None => vec![],
        };
        self.write_raw(ChangeSetDomain::Account, address.as_slice(), raw)?;
        Ok(())
    }

    fn storage(&mut self, address: &Address, incarnation: u64, slot: &B256) -> anyhow::Result<B256> {
        let raw = self.read_raw(ChangeSetDomain::Storage, &keys::storage_key(address, incarnation, slot))?;
        match raw.len() {
            0 => Ok(B256::ZERO),
            32 => Ok(B256::from_slice(&raw)),
            len => anyhow::bail!("Storage value of {address} slot {slot} has length {len}, expected 32"),
        }
    }

    fn set_storage(&mut self, address: &Address, incarnation: u64, slot: &B256, value: B256) -> anyhow::Result<()> {
        let raw = if value.is_zero() { vec![] } else { value.to_vec() };
        self.write_raw(ChangeSetDomain::Storage, &keys::storage_key(address, incarnation, slot), raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use kc_db::RocksDBStorage;

    #[test]
    fn records_first_prior_value_per_block() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        let address = Address::repeat_byte(1);
        let slot = B256::repeat_byte(2);
        let before = Account::with_balance(U256::from(10u64));
        tx.put_account(&address, Some(&before)).unwrap();

        let mut state = BufferedState::new(&mut tx, usize::MAX);
        state.set_account(&address, Some(Account::with_balance(U256::from(20u64)))).unwrap();
        state.set_account(&address, Some(Account::with_balance(U256::from(30u64)))).unwrap();
        state.set_storage(&address, 1, &slot, B256::repeat_byte(3)).unwrap();
        // write-then-revert within the block leaves no entry
        state.set_storage(&address, 1, &B256::repeat_byte(4), B256::repeat_byte(5)).unwrap();
        state.set_storage(&address, 1, &B256::repeat_byte(4), B256::ZERO).unwrap();

        let writer = state.finish_block().unwrap();
        let accounts = writer.account_changes();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts.get(0).unwrap().value, before.encode().unwrap());
        let storage = writer.storage_changes();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(0).unwrap().key, keys::storage_key(&address, 1, &slot).to_vec());
        assert!(storage.get(0).unwrap().value.is_empty());

        // next block starts a fresh change-set with the buffered values as priors
        state.set_account(&address, None).unwrap();
        let writer = state.finish_block().unwrap();
        assert_eq!(writer.account_changes().get(0).unwrap().value, Account::with_balance(U256::from(30u64)).encode().unwrap());
    }

    #[test]
    fn flushes_over_budget() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        let address = Address::repeat_byte(7);

        let mut state = BufferedState::new(&mut tx, 16);
        state.set_account(&address, Some(Account::with_balance(U256::from(1u64)))).unwrap();
        assert!(state.tx().get_account(&address).unwrap().is_none());
        assert!(state.flush_if_full().unwrap());
        assert_eq!(state.buffered_bytes(), 0);
        assert_eq!(state.tx().get_account(&address).unwrap(), Some(Account::with_balance(U256::from(1u64))));
        assert!(!state.flush_if_full().unwrap());
    }
}
