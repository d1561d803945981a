//! Block-number set index, one set per entity, built from the change-set log.
//!
//! The set of an entity is split into shards keyed `entity ‖ suffix`. Full shards are keyed by
//! their largest block number, the open shard (the one appends go to) by `u64::MAX`, so a forward
//! scan from `entity ‖ from` reaches the first shard that can contain `from`. A shard holds at
//! most [RocksDBConfig::history_shard_capacity](crate::RocksDBConfig) block numbers.
use crate::{
    changeset::ChangeSetDomain,
    error::{Result, StorageError},
    keys,
    rocksdb::Column,
    tx::RwTx,
};
use roaring::RoaringTreemap;

/// address ‖ shard suffix -> serialized block set
pub const ACCOUNT_HISTORY_COLUMN: Column = Column::new("account_history");
/// address ‖ slot ‖ shard suffix -> serialized block set
pub const STORAGE_HISTORY_COLUMN: Column = Column::new("storage_history");

const OPEN_SHARD_SUFFIX: u64 = u64::MAX;

pub fn shard_key(entity: &[u8], suffix: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(entity.len() + keys::BLOCK_N_LEN);
    key.extend_from_slice(entity);
    key.extend_from_slice(&keys::encode_block_n(suffix));
    key
}

fn shard_suffix(key: &[u8]) -> Result<u64> {
    let at = key
        .len()
        .checked_sub(keys::BLOCK_N_LEN)
        .ok_or(StorageError::InconsistentStorage("History shard key too short".into()))?;
    keys::decode_block_n(&key[at..])
}

pub(crate) fn decode_block_set(data: &[u8]) -> Result<RoaringTreemap> {
    Ok(RoaringTreemap::deserialize_from(data)?)
}

pub(crate) fn encode_block_set(set: &RoaringTreemap) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(set.serialized_size());
    set.serialize_into(&mut out)?;
    Ok(out)
}

impl RwTx {
    fn history_shard_capacity(&self) -> u64 {
        self.config().history_shard_capacity.max(1)
    }

    /// Visits the shards of `entity` whose suffix is `>= from`, in suffix order.
    fn walk_shards(
        &self,
        domain: ChangeSetDomain,
        entity: &[u8],
        from: u64,
        mut f: impl FnMut(&[u8], u64, RoaringTreemap) -> Result<bool>,
    ) -> Result<()> {
        let col = domain.history_column();
        let expected_len = entity.len() + keys::BLOCK_N_LEN;
        self.walk(col, &shard_key(entity, from), |key, value| {
            if key.len() != expected_len || !key.starts_with(entity) {
                return Ok(false);
            }
            f(key, shard_suffix(key)?, decode_block_set(value)?)
        })
    }

    /// Adds block numbers to the set of `entity`, splitting full shards off the open one.
    pub fn history_append(&mut self, domain: ChangeSetDomain, entity: &[u8], blocks: &RoaringTreemap) -> Result<()> {
        let col = domain.history_column();
        let open_key = shard_key(entity, OPEN_SHARD_SUFFIX);
        let mut open = match self.get(col, &open_key)? {
            Some(data) => decode_block_set(&data)?,
            None => RoaringTreemap::new(),
        };
        open |= blocks;

        let capacity = self.history_shard_capacity();
        while open.len() > capacity {
            let full: RoaringTreemap = open.iter().take(capacity as usize).collect();
            let Some(last) = full.max() else { break };
            self.put(col, shard_key(entity, last), encode_block_set(&full)?);
            open.remove_range(..=last);
        }
        self.put(col, open_key, encode_block_set(&open)?);
        Ok(())
    }

    /// Block numbers of `entity` in `[from, to)`, merged across shards.
    pub fn history_get(&self, domain: ChangeSetDomain, entity: &[u8], from: u64, to: u64) -> Result<RoaringTreemap> {
        let mut out = RoaringTreemap::new();
        if from >= to {
            return Ok(out);
        }
        self.walk_shards(domain, entity, from, |_, suffix, set| {
            out |= set;
            Ok(suffix < to)
        })?;
        out.remove_range(..from);
        out.remove_range(to..);
        Ok(out)
    }

    /// Drops every block number `>= from` from the set of `entity`.
    pub fn history_truncate(&mut self, domain: ChangeSetDomain, entity: &[u8], from: u64) -> Result<()> {
        let mut stale = vec![];
        let mut kept = RoaringTreemap::new();
        self.walk_shards(domain, entity, from, |key, _, mut set| {
            stale.push(key.to_vec());
            set.remove_range(from..);
            kept |= set;
            Ok(true)
        })?;
        let col = domain.history_column();
        for key in stale {
            self.delete(col, key);
        }
        // Only the first visited shard can hold numbers below `from`, and it fits a shard.
        if !kept.is_empty() {
            self.put(col, shard_key(entity, OPEN_SHARD_SUFFIX), encode_block_set(&kept)?);
        }
        Ok(())
    }

    /// Drops every block number `< below` from the set of `entity`.
    pub fn history_prune(&mut self, domain: ChangeSetDomain, entity: &[u8], below: u64) -> Result<()> {
        let mut updates = vec![];
        self.walk_shards(domain, entity, 0, |key, suffix, mut set| {
            if suffix < below {
                updates.push((key.to_vec(), None));
                return Ok(true);
            }
            set.remove_range(..below);
            updates.push((key.to_vec(), Some(set)));
            Ok(false)
        })?;
        let col = domain.history_column();
        for (key, set) in updates {
            match set {
                Some(set) if !set.is_empty() => self.put(col, key, encode_block_set(&set)?),
                _ => self.delete(col, key),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RocksDBConfig, RocksDBStorage};
    use rstest::*;

    const ENTITY: &[u8] = &[0xaa; 20];

    #[fixture]
    fn db() -> RocksDBStorage {
        RocksDBStorage::open_for_testing_with_config(&RocksDBConfig::default().history_shard_capacity(4))
    }

    fn set(blocks: impl IntoIterator<Item = u64>) -> RoaringTreemap {
        blocks.into_iter().collect()
    }

    fn shard_suffixes(tx: &RwTx) -> Vec<u64> {
        let mut suffixes = vec![];
        tx.walk_shards(ChangeSetDomain::Account, ENTITY, 0, |_, suffix, _| {
            suffixes.push(suffix);
            Ok(true)
        })
        .unwrap();
        suffixes
    }

    #[rstest]
    fn append_splits_full_shards(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        tx.history_append(ChangeSetDomain::Account, ENTITY, &set([1, 3, 5])).unwrap();
        tx.history_append(ChangeSetDomain::Account, ENTITY, &set([7, 9, 11, 13, 15, 17])).unwrap();
        assert_eq!(shard_suffixes(&tx), vec![7, 15, u64::MAX]);

        assert_eq!(tx.history_get(ChangeSetDomain::Account, ENTITY, 0, 100).unwrap(), set([1, 3, 5, 7, 9, 11, 13, 15, 17]));
        assert_eq!(tx.history_get(ChangeSetDomain::Account, ENTITY, 8, 14).unwrap(), set([9, 11, 13]));
        assert_eq!(tx.history_get(ChangeSetDomain::Account, ENTITY, 16, 18).unwrap(), set([17]));
        assert!(tx.history_get(ChangeSetDomain::Account, ENTITY, 18, 18).unwrap().is_empty());
        // different entity sharing a prefix is not visible
        assert!(tx.history_get(ChangeSetDomain::Account, &[0xaa; 19], 0, 100).unwrap().is_empty());
    }

    #[rstest]
    fn truncate_rebuilds_open_shard(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        tx.history_append(ChangeSetDomain::Account, ENTITY, &set(1..=10)).unwrap();
        assert_eq!(shard_suffixes(&tx), vec![4, 8, u64::MAX]);

        tx.history_truncate(ChangeSetDomain::Account, ENTITY, 6).unwrap();
        assert_eq!(shard_suffixes(&tx), vec![4, u64::MAX]);
        assert_eq!(tx.history_get(ChangeSetDomain::Account, ENTITY, 0, 100).unwrap(), set(1..=5));

        // appending again after an unwind keeps the shards ordered
        tx.history_append(ChangeSetDomain::Account, ENTITY, &set([6, 7, 8, 9])).unwrap();
        assert_eq!(tx.history_get(ChangeSetDomain::Account, ENTITY, 0, 100).unwrap(), set(1..=9));
        assert_eq!(shard_suffixes(&tx), vec![4, 8, u64::MAX]);
    }

    #[rstest]
    fn prune_drops_old_numbers(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        tx.history_append(ChangeSetDomain::Storage, ENTITY, &set(1..=10)).unwrap();
        tx.history_prune(ChangeSetDomain::Storage, ENTITY, 7).unwrap();
        assert_eq!(tx.history_get(ChangeSetDomain::Storage, ENTITY, 0, 100).unwrap(), set(7..=10));
        tx.history_prune(ChangeSetDomain::Storage, ENTITY, 100).unwrap();
        assert!(tx.history_get(ChangeSetDomain::Storage, ENTITY, 0, 100).unwrap().is_empty());
    }
}
