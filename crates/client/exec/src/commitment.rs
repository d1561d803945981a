use alloy_primitives::{keccak256, Keccak256, B256};
use kc_db::{RwTx, StorageError, HASHED_ACCOUNTS_COLUMN, HASHED_STORAGE_COLUMN};

/// Computes the state root from the hashed state buckets.
pub trait StateCommitment: Send + Sync {
    fn state_root(&self, tx: &RwTx) -> anyhow::Result<B256>;
}

/// Keccak over every hashed account entry, then every hashed storage entry, each entry
/// contributing `key ‖ keccak(value)`. Order is the bucket's key order.
///
/// Stands in for a Merkle-Patricia trie: it has the same inputs and changes whenever any of them
/// does, without intermediate nodes to maintain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatCommitment;

struct FlatHasher(Keccak256);

impl FlatHasher {
    fn new() -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(b"accounts");
        Self(hasher)
    }

    fn entry(&mut self, key: &[u8], value: &[u8]) {
        self.0.update(key);
        self.0.update(keccak256(value));
    }

    fn start_storage(&mut self) {
        self.0.update(b"storage");
    }

    fn finalize(self) -> B256 {
        self.0.finalize()
    }
}

/// Root of a hashed state given as entries already sorted by hashed key.
pub fn flat_root<'a>(
    accounts: impl IntoIterator<Item = (&'a [u8], &'a [u8])>,
    storage: impl IntoIterator<Item = (&'a [u8], &'a [u8])>,
) -> B256 {
    let mut hasher = FlatHasher::new();
    for (key, value) in accounts {
        hasher.entry(key, value);
    }
    hasher.start_storage();
    for (key, value) in storage {
        hasher.entry(key, value);
    }
    hasher.finalize()
}

impl StateCommitment for FlatCommitment {
    #[tracing::instrument(skip_all)]
    fn state_root(&self, tx: &RwTx) -> anyhow::Result<B256> {
        let mut hasher = FlatHasher::new();
        tx.walk(&HASHED_ACCOUNTS_COLUMN, &[], |key, value| {
            hasher.entry(key, value);
            Ok::<_, StorageError>(true)
        })?;
        hasher.start_storage();
        tx.walk(&HASHED_STORAGE_COLUMN, &[], |key, value| {
            hasher.entry(key, value);
            Ok::<_, StorageError>(true)
        })?;
        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_db::{ChangeSetDomain, RocksDBStorage};

    #[test]
    fn bucket_root_matches_in_memory_root() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        let empty = FlatCommitment.state_root(&tx).unwrap();
        assert_eq!(empty, flat_root([], []));

        let account_keys: [&[u8]; 2] = [&[0x22; 20], &[0x11; 20]];
        for key in account_keys {
            tx.put_hashed_raw(ChangeSetDomain::Account, key, b"account").unwrap();
        }
        let root = FlatCommitment.state_root(&tx).unwrap();
        assert_ne!(root, empty);

        let mut entries: Vec<(Vec<u8>, &[u8])> = account_keys
            .iter()
            .map(|key| (kc_db::hashed_key(ChangeSetDomain::Account, key).unwrap(), &b"account"[..]))
            .collect();
        entries.sort();
        assert_eq!(root, flat_root(entries.iter().map(|(k, v)| (k.as_slice(), *v)), []));
    }
}
