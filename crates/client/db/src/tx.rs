use crate::{
    error::{Result, StorageError},
    rocksdb::{Column, RocksDBConfig, RocksDBStorageInner},
};
use rocksdb::{Direction, IteratorMode, WriteBatch};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    ops::Bound,
    sync::{atomic, Arc},
};

/// Pending writes of one column. `None` is a deletion.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// The read-write transaction of a store.
///
/// Writes are staged in an ordered in-memory overlay and become visible to reads (point lookups
/// and ordered walks) through this transaction immediately. [RwTx::commit] writes the whole
/// overlay as one atomic [WriteBatch], [RwTx::rollback] (or dropping the transaction) discards it.
pub struct RwTx {
    inner: Arc<RocksDBStorageInner>,
    pending: HashMap<&'static str, Overlay>,
    pending_bytes: usize,
}

impl fmt::Debug for RwTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwTx").field("pending_bytes", &self.pending_bytes).finish()
    }
}

impl Drop for RwTx {
    fn drop(&mut self) {
        self.inner.writer_active.store(false, atomic::Ordering::Release);
    }
}

impl RwTx {
    pub(crate) fn new(inner: Arc<RocksDBStorageInner>) -> Self {
        Self { inner, pending: HashMap::new(), pending_bytes: 0 }
    }

    pub(crate) fn config(&self) -> &RocksDBConfig {
        &self.inner.config
    }

    /// Approximate size in bytes of the writes staged in this transaction.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn get(&self, col: &Column, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(col.rocksdb_name).and_then(|overlay| overlay.get(key)) {
            return Ok(staged.clone());
        }
        let handle = self.inner.get_column(col)?;
        Ok(self.inner.db.get_pinned_cf(&handle, key)?.map(|value| value.to_vec()))
    }

    pub fn put(&mut self, col: &Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let (key, value) = (key.into(), value.into());
        self.pending_bytes += key.len() + value.len();
        self.pending.entry(col.rocksdb_name).or_default().insert(key, Some(value));
    }

    pub fn delete(&mut self, col: &Column, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.pending_bytes += key.len();
        self.pending.entry(col.rocksdb_name).or_default().insert(key, None);
    }

    /// Visits entries with `key >= from` in ascending key order until `f` returns `false`.
    pub fn walk<E>(&self, col: &Column, from: &[u8], f: impl FnMut(&[u8], &[u8]) -> Result<bool, E>) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        self.merged_walk(col, Some(from), Direction::Forward, f)
    }

    /// Visits the entries whose key starts with `prefix`, in ascending key order.
    pub fn walk_prefix<E>(
        &self,
        col: &Column,
        prefix: &[u8],
        mut f: impl FnMut(&[u8], &[u8]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        self.merged_walk(
            col,
            Some(prefix),
            Direction::Forward,
            |key, value| {
                if !key.starts_with(prefix) {
                    return Ok(false);
                }
                f(key, value)
            },
        )
    }

    /// Visits entries in descending key order, starting at `from` (inclusive) or at the last key.
    pub fn walk_back<E>(
        &self,
        col: &Column,
        from: Option<&[u8]>,
        f: impl FnMut(&[u8], &[u8]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        self.merged_walk(col, from, Direction::Reverse, f)
    }

    pub fn last_entry(&self, col: &Column) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut last = None;
        self.walk_back(col, None, |key, value| {
            last = Some((key.to_vec(), value.to_vec()));
            Ok::<_, StorageError>(false)
        })?;
        Ok(last)
    }

    fn merged_walk<E>(
        &self,
        col: &Column,
        from: Option<&[u8]>,
        direction: Direction,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        let forward = matches!(direction, Direction::Forward);
        let handle = self.inner.get_column(col)?;
        let mode = match from {
            Some(key) => IteratorMode::From(key, direction),
            None if forward => IteratorMode::Start,
            None => IteratorMode::End,
        };
        let mut db_iter = self.inner.db.iterator_cf(&handle, mode);

        let empty = Overlay::new();
        let overlay = self.pending.get(col.rocksdb_name).unwrap_or(&empty);
        let mut overlay_iter: Box<dyn Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> + '_> = match (from, forward) {
            (Some(key), true) => Box::new(overlay.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))),
            (Some(key), false) => Box::new(overlay.range::<[u8], _>((Bound::Unbounded, Bound::Included(key))).rev()),
            (None, true) => Box::new(overlay.iter()),
            (None, false) => Box::new(overlay.iter().rev()),
        };

        let mut db_next = db_iter.next().transpose().map_err(StorageError::from)?;
        let mut overlay_next = overlay_iter.next();

        loop {
            // Less: the committed entry comes first. Equal: the staged write shadows it.
            let ordering = match (&db_next, &overlay_next) {
                (None, None) => return Ok(()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((db_key, _)), Some((staged_key, _))) => {
                    let ordering = db_key.as_ref().cmp(staged_key.as_slice());
                    if forward {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                }
            };

            match ordering {
                Ordering::Less => {
                    if let Some((key, value)) = &db_next {
                        if !f(key, value)? {
                            return Ok(());
                        }
                    }
                    db_next = db_iter.next().transpose().map_err(StorageError::from)?;
                }
                Ordering::Greater | Ordering::Equal => {
                    if let Some((key, Some(value))) = overlay_next {
                        if !f(key, value)? {
                            return Ok(());
                        }
                    }
                    overlay_next = overlay_iter.next();
                    if ordering == Ordering::Equal {
                        db_next = db_iter.next().transpose().map_err(StorageError::from)?;
                    }
                }
            }
        }
    }

    /// Atomically writes every staged change.
    #[tracing::instrument(skip(self), fields(pending_bytes = self.pending_bytes))]
    pub fn commit(mut self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (name, overlay) in std::mem::take(&mut self.pending) {
            let handle = self.inner.get_column_by_name(name)?;
            for (key, value) in overlay {
                match value {
                    Some(value) => batch.put_cf(&handle, key, value),
                    None => batch.delete_cf(&handle, key),
                }
            }
        }
        self.inner.db.write(batch)?;
        Ok(())
    }

    /// Discards every staged change.
    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use crate::{rocksdb::RocksDBStorage, StorageError, META_COLUMN};
    use assert_matches::assert_matches;
    use rstest::*;

    #[fixture]
    fn db() -> RocksDBStorage {
        RocksDBStorage::open_for_testing()
    }

    fn collect_forward(tx: &super::RwTx, from: &[u8]) -> Vec<Vec<u8>> {
        let mut keys = vec![];
        tx.walk(&META_COLUMN, from, |key, _| {
            keys.push(key.to_vec());
            Ok::<_, StorageError>(true)
        })
        .unwrap();
        keys
    }

    #[rstest]
    fn single_writer(db: RocksDBStorage) {
        let tx = db.begin_rw().unwrap();
        assert_matches!(db.begin_rw(), Err(StorageError::WriterBusy));
        tx.rollback();
        let tx = db.begin_rw().unwrap();
        tx.commit().unwrap();
        db.begin_rw().unwrap();
    }

    #[rstest]
    fn rollback_discards_and_commit_persists(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        tx.put(&META_COLUMN, b"a".to_vec(), b"1".to_vec());
        assert_eq!(tx.get(&META_COLUMN, b"a").unwrap(), Some(b"1".to_vec()));
        tx.rollback();

        let mut tx = db.begin_rw().unwrap();
        assert_eq!(tx.get(&META_COLUMN, b"a").unwrap(), None);
        tx.put(&META_COLUMN, b"a".to_vec(), b"2".to_vec());
        tx.commit().unwrap();

        let tx = db.begin_rw().unwrap();
        assert_eq!(tx.get(&META_COLUMN, b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[rstest]
    fn walks_merge_overlay_and_committed(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        for key in [b"b", b"d", b"f"] {
            tx.put(&META_COLUMN, key.to_vec(), b"old".to_vec());
        }
        tx.commit().unwrap();

        let mut tx = db.begin_rw().unwrap();
        tx.put(&META_COLUMN, b"a".to_vec(), b"new".to_vec());
        tx.put(&META_COLUMN, b"e".to_vec(), b"new".to_vec());
        tx.put(&META_COLUMN, b"f".to_vec(), b"new".to_vec());
        tx.delete(&META_COLUMN, b"d".to_vec());

        assert_eq!(collect_forward(&tx, b""), vec![b"a".to_vec(), b"b".to_vec(), b"e".to_vec(), b"f".to_vec()]);
        assert_eq!(collect_forward(&tx, b"c"), vec![b"e".to_vec(), b"f".to_vec()]);

        let mut back = vec![];
        tx.walk_back(&META_COLUMN, Some(&b"e"[..]), |key, value| {
            back.push((key.to_vec(), value.to_vec()));
            Ok::<_, StorageError>(true)
        })
        .unwrap();
        assert_eq!(
            back,
            vec![(b"e".to_vec(), b"new".to_vec()), (b"b".to_vec(), b"old".to_vec()), (b"a".to_vec(), b"new".to_vec())]
        );

        assert_eq!(tx.last_entry(&META_COLUMN).unwrap(), Some((b"f".to_vec(), b"new".to_vec())));
        tx.delete(&META_COLUMN, b"f".to_vec());
        assert_eq!(tx.last_entry(&META_COLUMN).unwrap(), Some((b"e".to_vec(), b"new".to_vec())));
    }

    #[rstest]
    fn walk_prefix_stops_at_prefix_end(db: RocksDBStorage) {
        let mut tx = db.begin_rw().unwrap();
        let keys: [&[u8]; 4] = [b"ab1", b"ab2", b"ac1", b"aa9"];
        for key in keys {
            tx.put(&META_COLUMN, key.to_vec(), vec![]);
        }
        let mut keys = vec![];
        tx.walk_prefix(&META_COLUMN, b"ab", |key, _| {
            keys.push(key.to_vec());
            Ok::<_, StorageError>(true)
        })
        .unwrap();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
    }
}
