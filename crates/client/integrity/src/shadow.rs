use kc_db::{ChangeSet, ChangeSetDomain};
use kc_exec::{ChangeSetHook, ChangeSetWriter};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<u64, ChangeSet>,
    storage: BTreeMap<u64, ChangeSet>,
}

/// In-memory copy of the change-sets emitted by the execution stage, keyed by block number.
/// Filled through [ExpectedChangeSets::hook], drained by [crate::check_changes].
#[derive(Debug, Default, Clone)]
pub struct ExpectedChangeSets {
    inner: Arc<Mutex<Inner>>,
}

impl ExpectedChangeSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook for the execution stage that records into this shadow.
    pub fn hook(&self) -> ChangeSetHook {
        let this = self.clone();
        Arc::new(move |block_n, writer| this.record(block_n, writer))
    }

    /// Blocks without storage changes get no storage entry.
    pub fn record(&self, block_n: u64, writer: &ChangeSetWriter) {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        inner.accounts.insert(block_n, writer.account_changes());
        let storage = writer.storage_changes();
        if storage.is_empty() {
            inner.storage.remove(&block_n);
        } else {
            inner.storage.insert(block_n, storage);
        }
    }

    pub fn insert(&self, domain: ChangeSetDomain, block_n: u64, changes: ChangeSet) {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        match domain {
            ChangeSetDomain::Account => inner.accounts.insert(block_n, changes),
            ChangeSetDomain::Storage => inner.storage.insert(block_n, changes),
        };
    }

    /// Removes every recorded block and returns, per block, the account and storage change-sets.
    /// A block with no storage entry gets an empty storage change-set.
    pub fn take_all(&self) -> BTreeMap<u64, (ChangeSet, ChangeSet)> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        let accounts = std::mem::take(&mut inner.accounts);
        let mut storage = std::mem::take(&mut inner.storage);
        let mut out: BTreeMap<u64, (ChangeSet, ChangeSet)> = accounts
            .into_iter()
            .map(|(block_n, accounts)| {
                let storage = storage.remove(&block_n).unwrap_or_default();
                (block_n, (accounts, storage))
            })
            .collect();
        for (block_n, storage) in storage {
            out.insert(block_n, (ChangeSet::new(), storage));
        }
        out
    }

    pub fn block_count(&self) -> usize {
        let inner = self.inner.lock().expect("Poisoned lock");
        inner.accounts.keys().chain(inner.storage.keys()).collect::<std::collections::BTreeSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_omits_empty_storage() {
        let shadow = ExpectedChangeSets::new();
        let hook = shadow.hook();
        hook(7, &ChangeSetWriter::default());
        assert_eq!(shadow.block_count(), 1);
        assert!(shadow.inner.lock().unwrap().storage.is_empty());

        let mut storage = ChangeSet::new();
        storage.insert(vec![1; 60], vec![]);
        shadow.insert(ChangeSetDomain::Storage, 9, storage.clone());

        let all = shadow.take_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&9], (ChangeSet::new(), storage));
        assert!(shadow.is_empty());
    }
}
