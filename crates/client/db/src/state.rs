use crate::{
    changeset::ChangeSetDomain,
    error::{Result, StorageError},
    keys,
    rocksdb::Column,
    tx::RwTx,
};
use alloy_primitives::{Address, B256};
use kp_block::Account;

/// address -> encoded [Account]
pub const PLAIN_ACCOUNTS_COLUMN: Column = Column::new("plain_accounts").use_state_mem_budget();
/// address ‖ incarnation ‖ slot -> 32 byte value. Zero values are never stored.
pub const PLAIN_STORAGE_COLUMN: Column = Column::new("plain_storage").use_state_mem_budget();
/// keccak(address) -> encoded [Account]
pub const HASHED_ACCOUNTS_COLUMN: Column = Column::new("hashed_accounts").use_state_mem_budget();
/// keccak(address) ‖ incarnation ‖ keccak(slot) -> 32 byte value
pub const HASHED_STORAGE_COLUMN: Column = Column::new("hashed_storage").use_state_mem_budget();

impl RwTx {
    pub fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        let Some(data) = self.get(&PLAIN_ACCOUNTS_COLUMN, address.as_slice())? else {
            return Ok(None);
        };
        Ok(Some(Account::decode(&data)?))
    }

    /// Writes or, with `None`, deletes an account.
    pub fn put_account(&mut self, address: &Address, account: Option<&Account>) -> Result<()> {
        match account {
            Some(account) => self.put(&PLAIN_ACCOUNTS_COLUMN, address.as_slice(), account.encode()?),
            None => self.delete(&PLAIN_ACCOUNTS_COLUMN, address.as_slice()),
        }
        Ok(())
    }

    pub fn get_storage(&self, address: &Address, incarnation: u64, slot: &B256) -> Result<B256> {
        let key = keys::storage_key(address, incarnation, slot);
        match self.get(&PLAIN_STORAGE_COLUMN, &key)? {
            Some(data) if data.len() == 32 => Ok(B256::from_slice(&data)),
            Some(data) => Err(StorageError::InconsistentStorage(
                format!("Storage value has length {}, expected 32", data.len()).into(),
            )),
            None => Ok(B256::ZERO),
        }
    }

    pub fn put_storage(&mut self, address: &Address, incarnation: u64, slot: &B256, value: &B256) {
        let key = keys::storage_key(address, incarnation, slot);
        if value.is_zero() {
            self.delete(&PLAIN_STORAGE_COLUMN, key);
        } else {
            self.put(&PLAIN_STORAGE_COLUMN, key, value.as_slice());
        }
    }

    /// Raw plain-state value under a change-set key. Absent entries read as an empty value, like
    /// the prior values recorded in change-sets.
    pub fn get_plain_raw(&self, domain: ChangeSetDomain, key: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get(domain.plain_state_column(), key)?.unwrap_or_default())
    }

    /// Writes a raw plain-state value, an empty value deletes the entry.
    pub fn put_plain_raw(&mut self, domain: ChangeSetDomain, key: &[u8], value: &[u8]) {
        if value.is_empty() {
            self.delete(domain.plain_state_column(), key);
        } else {
            self.put(domain.plain_state_column(), key, value);
        }
    }

    /// Writes the hashed-state entry mirroring plain key `key`, an empty value deletes it.
    pub fn put_hashed_raw(&mut self, domain: ChangeSetDomain, key: &[u8], value: &[u8]) -> Result<()> {
        let hashed_key = hashed_key(domain, key)?;
        if value.is_empty() {
            self.delete(domain.hashed_state_column(), hashed_key);
        } else {
            self.put(domain.hashed_state_column(), hashed_key, value);
        }
        Ok(())
    }
}

/// Hashed-state key for a plain-state key of `domain`.
pub fn hashed_key(domain: ChangeSetDomain, key: &[u8]) -> Result<Vec<u8>> {
    Ok(match domain {
        ChangeSetDomain::Account => keys::hashed_account_key(&keys::split_account_key(key)?).to_vec(),
        ChangeSetDomain::Storage => {
            let (address, incarnation, slot) = keys::split_storage_key(key)?;
            keys::hashed_storage_key(&address, incarnation, &slot).to_vec()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RocksDBStorage;
    use alloy_primitives::U256;

    #[test]
    fn zero_storage_is_deleted() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        let address = Address::repeat_byte(1);
        let slot = B256::repeat_byte(2);

        tx.put_storage(&address, 1, &slot, &B256::repeat_byte(3));
        assert_eq!(tx.get_storage(&address, 1, &slot).unwrap(), B256::repeat_byte(3));
        // other incarnation does not see it
        assert_eq!(tx.get_storage(&address, 2, &slot).unwrap(), B256::ZERO);

        tx.put_storage(&address, 1, &slot, &B256::ZERO);
        let key = keys::storage_key(&address, 1, &slot);
        assert_eq!(tx.get_plain_raw(ChangeSetDomain::Storage, &key).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn account_roundtrip_and_hashed_mirror() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        let address = Address::repeat_byte(9);
        let account = Account::with_balance(U256::from(5u64));
        tx.put_account(&address, Some(&account)).unwrap();
        assert_eq!(tx.get_account(&address).unwrap(), Some(account.clone()));

        let raw = tx.get_plain_raw(ChangeSetDomain::Account, address.as_slice()).unwrap();
        tx.put_hashed_raw(ChangeSetDomain::Account, address.as_slice(), &raw).unwrap();
        let hashed = keys::hashed_account_key(&address);
        assert_eq!(tx.get(&HASHED_ACCOUNTS_COLUMN, hashed.as_slice()).unwrap(), Some(raw));

        tx.put_account(&address, None).unwrap();
        assert_eq!(tx.get_account(&address).unwrap(), None);
    }
}
