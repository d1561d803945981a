use crate::{ConsistencyViolation, IntegrityError};
use alloy_primitives::Bytes;
use itertools::{EitherOrBoth, Itertools};
use kc_db::{
    Column, RwTx, StorageError, ACCOUNT_HISTORY_COLUMN, HASHED_ACCOUNTS_COLUMN, HASHED_STORAGE_COLUMN,
    PLAIN_ACCOUNTS_COLUMN, PLAIN_STORAGE_COLUMN, STORAGE_HISTORY_COLUMN,
};

const COMPARED_COLUMNS: [&Column; 6] = [
    &PLAIN_ACCOUNTS_COLUMN,
    &PLAIN_STORAGE_COLUMN,
    &HASHED_ACCOUNTS_COLUMN,
    &HASHED_STORAGE_COLUMN,
    &ACCOUNT_HISTORY_COLUMN,
    &STORAGE_HISTORY_COLUMN,
];

fn entries(tx: &RwTx, col: &Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
    let mut out = vec![];
    tx.walk(col, &[], |key, value| {
        out.push((key.to_vec(), value.to_vec()));
        Ok::<_, StorageError>(true)
    })?;
    Ok(out)
}

/// Diffs the state and history buckets of two stores. The first differing key is reported.
#[tracing::instrument(skip_all)]
pub fn compare_states(ours: &RwTx, reference: &RwTx) -> Result<(), IntegrityError> {
    for col in COMPARED_COLUMNS {
        let divergence = entries(ours, col)?
            .into_iter()
            .merge_join_by(entries(reference, col)?, |(a, _), (b, _)| a.cmp(b))
            .find_map(|pair| match pair {
                EitherOrBoth::Both((key, ours), (_, reference)) if ours != reference => {
                    Some((key, Some(ours), Some(reference)))
                }
                EitherOrBoth::Both(..) => None,
                EitherOrBoth::Left((key, ours)) => Some((key, Some(ours), None)),
                EitherOrBoth::Right((key, reference)) => Some((key, None, Some(reference))),
            });
        if let Some((key, ours, reference)) = divergence {
            return Err(ConsistencyViolation::ReferenceStoreDivergence {
                column: col.rocksdb_name,
                key: key.into(),
                ours: ours.map(Bytes::from),
                reference: reference.map(Bytes::from),
            }
            .into());
        }
        tracing::debug!("Bucket {} matches the reference store", col.rocksdb_name);
    }
    tracing::info!("🔍 State matches the reference store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use assert_matches::assert_matches;
    use kc_db::RocksDBStorage;
    use kp_block::Account;

    #[test]
    fn first_difference_is_reported() {
        let ours = RocksDBStorage::open_for_testing();
        let reference = RocksDBStorage::open_for_testing();
        let mut ours_tx = ours.begin_rw().unwrap();
        let mut reference_tx = reference.begin_rw().unwrap();
        for tx in [&mut ours_tx, &mut reference_tx] {
            tx.put_account(&Address::repeat_byte(1), Some(&Account::with_balance(U256::from(1u64)))).unwrap();
        }
        compare_states(&ours_tx, &reference_tx).unwrap();

        reference_tx.put_account(&Address::repeat_byte(2), Some(&Account::default())).unwrap();
        assert_matches!(
            compare_states(&ours_tx, &reference_tx),
            Err(IntegrityError::Violation(ConsistencyViolation::ReferenceStoreDivergence {
                column: "plain_accounts",
                ours: None,
                ..
            }))
        );
    }
}
