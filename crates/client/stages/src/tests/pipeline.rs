use super::{chain, db_with_chain, exec_cfg, full_sync};
use crate::{
    stages::{default_stages, DEFAULT_STAGE_IDS},
    StageId, StagedSync, SyncError,
};
use assert_matches::assert_matches;
use kc_db::{ChangeSet, ChangeSetDomain, PruneMode, RwTx, StorageError, PLAIN_ACCOUNTS_COLUMN, PLAIN_STORAGE_COLUMN};
use kc_exec::{FlatCommitment, StateCommitment};
use kc_integrity::{check_changes, check_history, check_trie, ExpectedChangeSets};
use kp_block::B256;
use rstest::rstest;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    root: B256,
    plain: Vec<(Vec<u8>, Vec<u8>)>,
    change_sets: Vec<(u64, ChangeSet, ChangeSet)>,
}

fn snapshot(tx: &RwTx, blocks: std::ops::RangeInclusive<u64>) -> Snapshot {
    let mut plain = vec![];
    for col in [&PLAIN_ACCOUNTS_COLUMN, &PLAIN_STORAGE_COLUMN] {
        tx.walk(col, &[], |key, value| {
            plain.push((key.to_vec(), value.to_vec()));
            Ok::<_, StorageError>(true)
        })
        .unwrap();
    }
    let change_sets = blocks
        .map(|block_n| {
            (
                block_n,
                tx.read_changeset(ChangeSetDomain::Account, block_n).unwrap(),
                tx.read_changeset(ChangeSetDomain::Storage, block_n).unwrap(),
            )
        })
        .collect();
    Snapshot { root: FlatCommitment.state_root(tx).unwrap(), plain, change_sets }
}

#[test]
fn default_stage_order() {
    assert_eq!(full_sync(PruneMode::Archive).stage_ids(), DEFAULT_STAGE_IDS);
}

#[test]
fn full_cycle_reaches_head() {
    let chain = chain(30);
    let db = db_with_chain(&chain);
    let mut tx = db.begin_rw().unwrap();

    full_sync(PruneMode::Archive).run_cycle(&mut tx, true).unwrap();

    for id in DEFAULT_STAGE_IDS {
        assert_eq!(tx.get_stage_progress(id.as_str()).unwrap(), 30, "{id}");
    }
    assert_eq!(FlatCommitment.state_root(&tx).unwrap(), chain.blocks()[30].header.state_root);
    for domain in ChangeSetDomain::ALL {
        check_history(&tx, domain, 0).unwrap();
    }
    check_trie(&tx, &FlatCommitment, 30, true).unwrap();
    assert_eq!(tx.get_receipts(30).unwrap().map(|receipts| receipts.len()), Some(chain.blocks()[30].transactions.len()));
}

#[rstest]
#[case::one_block(29)]
#[case::ten_blocks(20)]
#[case::to_genesis(0)]
fn unwind_then_replay_is_identical(#[case] point: u64) {
    let chain = chain(30);
    let db = db_with_chain(&chain);
    let mut sync = full_sync(PruneMode::Archive);
    let mut tx = db.begin_rw().unwrap();
    sync.run_cycle(&mut tx, true).unwrap();
    let before = snapshot(&tx, point + 1..=30);
    tx.commit().unwrap();

    let mut tx = db.begin_rw().unwrap();
    sync.unwind_to(&mut tx, point, None).unwrap();
    for id in &DEFAULT_STAGE_IDS[4..] {
        assert_eq!(tx.get_stage_progress(id.as_str()).unwrap(), point, "{id}");
    }
    // blocks stay downloaded
    assert_eq!(tx.get_stage_progress(StageId::Senders.as_str()).unwrap(), 30);
    assert_eq!(FlatCommitment.state_root(&tx).unwrap(), chain.blocks()[point as usize].header.state_root);
    check_trie(&tx, &FlatCommitment, point, true).unwrap();
    assert!(tx.read_changeset(ChangeSetDomain::Account, point + 1).unwrap().is_empty());
    assert_eq!(tx.get_receipts(point + 1).unwrap(), None);
    tx.commit().unwrap();

    let mut tx = db.begin_rw().unwrap();
    sync.run_cycle(&mut tx, false).unwrap();
    assert_eq!(snapshot(&tx, point + 1..=30), before);
    for domain in ChangeSetDomain::ALL {
        check_history(&tx, domain, 0).unwrap();
    }
}

#[test]
fn hook_shadow_matches_the_log() {
    let chain = chain(15);
    let db = db_with_chain(&chain);
    let expected = ExpectedChangeSets::new();
    let mut sync = StagedSync::new(default_stages(
        exec_cfg().with_change_set_hook(expected.hook()),
        Arc::new(FlatCommitment),
        PruneMode::Archive,
    ));
    let mut tx = db.begin_rw().unwrap();

    sync.run_cycle(&mut tx, true).unwrap();

    assert_eq!(expected.block_count(), 15);
    check_changes(&expected, &tx, 0, 0).unwrap();
    assert!(expected.is_empty());
}

#[test]
fn pruning_keeps_history_above_horizon() {
    let chain = chain(30);
    let db = db_with_chain(&chain);
    let mut tx = db.begin_rw().unwrap();

    full_sync(PruneMode::Distance(5)).run_cycle(&mut tx, true).unwrap();

    for domain in ChangeSetDomain::ALL {
        assert_eq!(tx.get_prune_horizon(domain).unwrap(), 25);
        assert!(tx.read_changeset(domain, 24).unwrap().is_empty());
        check_history(&tx, domain, 25).unwrap();
    }
}

#[test]
fn unwind_below_prune_horizon_fails() {
    let chain = chain(30);
    let db = db_with_chain(&chain);
    let mut sync = full_sync(PruneMode::Distance(5));
    let mut tx = db.begin_rw().unwrap();
    sync.run_cycle(&mut tx, true).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin_rw().unwrap();
    let err = sync.unwind_to(&mut tx, 20, None).unwrap_err();
    assert_matches!(&err, SyncError::StageExecution { stage: StageId::StorageHistoryIndex, .. });
    assert!(err.to_string().contains("pruned below block 25"), "{err}");
    tx.rollback();

    let mut tx = db.begin_rw().unwrap();
    sync.unwind_to(&mut tx, 24, None).unwrap();
    assert_eq!(FlatCommitment.state_root(&tx).unwrap(), chain.blocks()[24].header.state_root);
}

#[test]
fn wrong_state_root_stops_the_cycle() {
    let chain = chain(10);
    let db = db_with_chain(&chain);
    let mut tx = db.begin_rw().unwrap();
    let mut head = chain.blocks()[10].clone();
    head.header.state_root = B256::repeat_byte(0xee);
    tx.write_block(&head).unwrap();

    let mut sync = full_sync(PruneMode::Archive);
    let err = sync.run_cycle(&mut tx, true).unwrap_err();
    assert_matches!(&err, SyncError::StageExecution { stage: StageId::IntermediateHashes, .. });
    assert!(err.to_string().contains("Wrong state root at block 10"), "{err}");
    // the stages before it went through
    assert_eq!(tx.get_stage_progress(StageId::HashState.as_str()).unwrap(), 10);
    assert_eq!(tx.get_stage_progress(StageId::IntermediateHashes.as_str()).unwrap(), 0);
}

#[test]
fn wrong_receipts_root_fails_execution() {
    let chain = chain(10);
    let db = db_with_chain(&chain);
    let mut tx = db.begin_rw().unwrap();
    let mut block = chain.blocks()[4].clone();
    block.header.receipts_root = B256::repeat_byte(0xee);
    tx.write_block(&block).unwrap();

    let err = full_sync(PruneMode::Archive).run_cycle(&mut tx, true).unwrap_err();
    assert_matches!(&err, SyncError::StageExecution { stage: StageId::Execution, .. });
    assert!(err.to_string().contains("Block 4: receipts root"), "{err}");
}
