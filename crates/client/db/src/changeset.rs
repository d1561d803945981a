//! Per-block undo log.
//!
//! For every block the execution stage records, per domain, the value each touched key held
//! before the block. Entries live under `block_n ‖ key` so that one ordered scan from a block
//! number visits the log block by block, with keys sorted inside each block.
use crate::{
    error::{Result, StorageError},
    history, keys,
    rocksdb::Column,
    state, tx::RwTx,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

pub const ACCOUNT_CHANGESETS_COLUMN: Column = Column::new("account_changesets");
pub const STORAGE_CHANGESETS_COLUMN: Column = Column::new("storage_changesets");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeSetDomain {
    Account,
    Storage,
}

impl ChangeSetDomain {
    pub const ALL: [Self; 2] = [Self::Account, Self::Storage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Storage => "storage",
        }
    }

    pub fn changeset_column(&self) -> &'static Column {
        match self {
            Self::Account => &ACCOUNT_CHANGESETS_COLUMN,
            Self::Storage => &STORAGE_CHANGESETS_COLUMN,
        }
    }

    pub fn history_column(&self) -> &'static Column {
        match self {
            Self::Account => &history::ACCOUNT_HISTORY_COLUMN,
            Self::Storage => &history::STORAGE_HISTORY_COLUMN,
        }
    }

    pub fn plain_state_column(&self) -> &'static Column {
        match self {
            Self::Account => &state::PLAIN_ACCOUNTS_COLUMN,
            Self::Storage => &state::PLAIN_STORAGE_COLUMN,
        }
    }

    pub fn hashed_state_column(&self) -> &'static Column {
        match self {
            Self::Account => &state::HASHED_ACCOUNTS_COLUMN,
            Self::Storage => &state::HASHED_STORAGE_COLUMN,
        }
    }
}

impl fmt::Display for ChangeSetDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One undo record: `value` is what `key` held before the block. Empty means absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Change {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// The change-set of one block in one domain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.changes.push(Change { key: key.into(), value: value.into() })
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Stable sort by key: entries with the same key keep their insertion order.
    pub fn sort(&mut self) {
        self.changes.sort_by(|a, b| a.key.cmp(&b.key))
    }

    pub fn get(&self, index: usize) -> Option<&Change> {
        self.changes.get(index)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = Change>>(iter: T) -> Self {
        Self { changes: iter.into_iter().collect() }
    }
}

fn changeset_key(block_n: u64, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(keys::BLOCK_N_LEN + key.len());
    out.extend_from_slice(&keys::encode_block_n(block_n));
    out.extend_from_slice(key);
    out
}

impl RwTx {
    #[tracing::instrument(skip(self, changes), fields(len = changes.len()))]
    pub fn write_changeset(&mut self, domain: ChangeSetDomain, block_n: u64, changes: &ChangeSet) {
        for change in changes {
            self.put(domain.changeset_column(), changeset_key(block_n, &change.key), change.value.as_slice());
        }
    }

    /// Visits every change-set entry of `domain` at `block >= from_block`, in (block, key) order.
    pub fn walk_changesets<E>(
        &self,
        domain: ChangeSetDomain,
        from_block: u64,
        mut f: impl FnMut(u64, &[u8], &[u8]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        self.walk(domain.changeset_column(), &keys::encode_block_n(from_block), |key, value| {
            let block_n = keys::decode_block_n(key)?;
            f(block_n, &key[keys::BLOCK_N_LEN..], value)
        })
    }

    /// Visits the change-set entries of a single block in key order.
    pub fn walk_changeset_block<E>(
        &self,
        domain: ChangeSetDomain,
        block_n: u64,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        self.walk_prefix(domain.changeset_column(), &keys::encode_block_n(block_n), |key, value| {
            f(&key[keys::BLOCK_N_LEN..], value)
        })
    }

    pub fn read_changeset(&self, domain: ChangeSetDomain, block_n: u64) -> Result<ChangeSet> {
        let mut changes = ChangeSet::new();
        self.walk_changeset_block(domain, block_n, |key, value| {
            changes.insert(key, value);
            Ok::<_, StorageError>(true)
        })?;
        Ok(changes)
    }

    /// Keys changed in blocks `[from_block, to_block]`.
    pub fn changed_keys(&self, domain: ChangeSetDomain, from_block: u64, to_block: u64) -> Result<BTreeSet<Vec<u8>>> {
        let mut changed = BTreeSet::new();
        self.walk_changesets(domain, from_block, |block_n, key, _| {
            if block_n > to_block {
                return Ok::<_, StorageError>(false);
            }
            changed.insert(key.to_vec());
            Ok(true)
        })?;
        Ok(changed)
    }

    /// For every key changed after `block_n`, the value it held at the end of `block_n`: the prior
    /// value of its earliest change above that block.
    pub fn values_at_unwind_point(&self, domain: ChangeSetDomain, block_n: u64) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut restore = BTreeMap::new();
        self.walk_changesets(domain, block_n + 1, |_, key, value| {
            restore.entry(key.to_vec()).or_insert_with(|| value.to_vec());
            Ok::<_, StorageError>(true)
        })?;
        Ok(restore)
    }

    /// Removes every change-set entry of `domain` at `block >= from_block`.
    pub fn delete_changesets_from(&mut self, domain: ChangeSetDomain, from_block: u64) -> Result<()> {
        let mut stale = vec![];
        self.walk(domain.changeset_column(), &keys::encode_block_n(from_block), |key, _| {
            stale.push(key.to_vec());
            Ok::<_, StorageError>(true)
        })?;
        for key in stale {
            self.delete(domain.changeset_column(), key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RocksDBStorage;

    fn changes(entries: &[(&str, &str)]) -> ChangeSet {
        entries.iter().map(|(k, v)| Change { key: k.as_bytes().to_vec(), value: v.as_bytes().to_vec() }).collect()
    }

    #[test]
    fn sort_is_stable_on_equal_keys() {
        let mut set = changes(&[("b", "1"), ("a", "2"), ("b", "3")]);
        set.sort();
        assert_eq!(set, changes(&[("a", "2"), ("b", "1"), ("b", "3")]));
    }

    #[test]
    fn changesets_are_walked_in_block_then_key_order() {
        let db = RocksDBStorage::open_for_testing();
        let mut tx = db.begin_rw().unwrap();
        tx.write_changeset(ChangeSetDomain::Account, 5, &changes(&[("kb", "5b"), ("ka", "5a")]));
        tx.write_changeset(ChangeSetDomain::Account, 6, &changes(&[("ka", "6a")]));
        tx.write_changeset(ChangeSetDomain::Account, 7, &changes(&[("kc", "")]));

        assert_eq!(tx.read_changeset(ChangeSetDomain::Account, 5).unwrap(), changes(&[("ka", "5a"), ("kb", "5b")]));
        assert!(tx.read_changeset(ChangeSetDomain::Storage, 5).unwrap().is_empty());

        let mut seen = vec![];
        tx.walk_changesets(ChangeSetDomain::Account, 6, |block_n, key, _| {
            seen.push((block_n, key.to_vec()));
            Ok::<_, StorageError>(true)
        })
        .unwrap();
        assert_eq!(seen, vec![(6, b"ka".to_vec()), (7, b"kc".to_vec())]);

        assert_eq!(
            tx.changed_keys(ChangeSetDomain::Account, 5, 6).unwrap().into_iter().collect::<Vec<_>>(),
            vec![b"ka".to_vec(), b"kb".to_vec()]
        );

        // Unwinding to 4 restores the oldest prior value of each key.
        let restore = tx.values_at_unwind_point(ChangeSetDomain::Account, 4).unwrap();
        assert_eq!(restore.get(&b"ka"[..]).unwrap(), b"5a");
        assert_eq!(restore.get(&b"kc"[..]).unwrap(), b"");

        tx.delete_changesets_from(ChangeSetDomain::Account, 6).unwrap();
        assert!(tx.read_changeset(ChangeSetDomain::Account, 6).unwrap().is_empty());
        assert_eq!(tx.read_changeset(ChangeSetDomain::Account, 5).unwrap().len(), 2);
    }
}
