mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chainsync_core::{
    Checkpoint, Cycle, CycleOutcome, CycleScheduler, MemoryStore, RpcErrorKind, SyncConfig,
    SyncEngine, SyncError, TransferRecord, TransferStore,
};
use chrono::{DateTime, Utc};

use common::{block_time, hash_of, instant_retry, transfer, MockChain, RecordingSleeper};

fn engine(chain: &Arc<MockChain>, store: &Arc<MemoryStore>) -> (SyncEngine, Arc<RecordingSleeper>) {
    let config = SyncConfig::default();
    let (retry, sleeper) = instant_retry(&config);
    let engine = SyncEngine::with_retry(chain.clone(), store.clone(), config, retry);
    (engine, sleeper)
}

async fn checkpoint(store: &MemoryStore) -> Checkpoint {
    store.checkpoint().await.unwrap().expect("checkpoint written")
}

#[tokio::test]
async fn bootstrap_without_checkpoint_starts_initial_depth_behind_tip() {
    let chain = MockChain::new(100_000);
    let store = Arc::new(MemoryStore::new());
    let (engine, _) = engine(&chain, &store);

    let outcome = engine.sync_once().await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Committed {
            from: 99_951,
            to: 99_955,
            transfers: 0
        }
    );
    assert_eq!(chain.log_ranges(), vec![(99_951, 99_955)]);
    let cp = checkpoint(&store).await;
    assert_eq!(cp.block_number, 99_955);
    assert_eq!(cp.block_hash, hash_of(99_955));
}

#[tokio::test]
async fn batch_bound_is_respected() {
    let chain = MockChain::new(1_050);
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();

    assert_eq!(chain.log_ranges(), vec![(1_001, 1_005)]);
    assert_eq!(checkpoint(&store).await.block_number, 1_005);
}

#[tokio::test]
async fn batch_is_clamped_to_finalized_height() {
    let chain = MockChain::new(1_013);
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();

    // finalized = 1013 - 10 = 1003
    assert_eq!(chain.log_ranges(), vec![(1_001, 1_003)]);
    assert_eq!(checkpoint(&store).await.block_number, 1_003);
}

#[tokio::test]
async fn checkpoint_advances_with_zero_events() {
    let chain = MockChain::new(2_050);
    let store = Arc::new(MemoryStore::with_checkpoint(2_000, hash_of(2_000)));
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();

    let cp = checkpoint(&store).await;
    assert_eq!(cp.block_number, 2_005);
    assert_eq!(cp.block_hash, hash_of(2_005));
    assert!(store.transfers().is_empty());
}

#[tokio::test]
async fn nothing_to_do_performs_no_writes() {
    let chain = MockChain::new(3_005);
    let store = Arc::new(MemoryStore::with_checkpoint(3_000, hash_of(3_000)));
    let (engine, _) = engine(&chain, &store);

    let outcome = engine.sync_once().await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Idle {
            last_processed: 3_000
        }
    );
    assert_eq!(store.write_count(), 0);
    assert!(chain.log_ranges().is_empty());
    assert_eq!(checkpoint(&store).await.block_number, 3_000);
}

#[tokio::test]
async fn transfers_are_committed_with_exact_amount_and_block_time() {
    let chain = MockChain::new(1_050);
    chain.push_log(transfer("0x-tx-hash", 1, 1_002, "10000000000000000000"));
    chain.push_log(transfer("0x-tx-other", 0, 1_004, "1"));
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    let outcome = engine.sync_once().await.unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Committed {
            from: 1_001,
            to: 1_005,
            transfers: 2
        }
    );
    let stored = store.transfers();
    assert_eq!(stored.len(), 2);
    let first = stored.iter().find(|t| t.tx_hash == "0x-tx-hash").unwrap();
    assert_eq!(first.amount, "10000000000000000000");
    assert_eq!(first.block_number, 1_002);
    assert_eq!(first.log_index, 1);
    assert_eq!(first.block_timestamp.timestamp(), block_time(1_002));
    // Records and checkpoint land in one write.
    assert_eq!(store.write_count(), 1);
    assert_eq!(checkpoint(&store).await.block_hash, hash_of(1_005));
}

#[tokio::test]
async fn unresolved_block_timestamp_defaults_to_epoch() {
    let chain = MockChain::new(1_050);
    chain.push_log(transfer("0xtx", 0, 1_003, "42"));
    chain.remove_block(1_003);
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();

    let stored = store.transfers();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].block_timestamp, DateTime::<Utc>::default());
}

#[tokio::test]
async fn missing_batch_end_block_aborts_without_commit() {
    let chain = MockChain::new(1_050);
    chain.push_log(transfer("0xtx", 0, 1_002, "42"));
    chain.remove_block(1_005);
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    let err = engine.sync_once().await.unwrap_err();

    assert!(matches!(err, SyncError::MissingBlock { number: 1_005 }));
    assert_eq!(store.write_count(), 0);
    assert!(store.transfers().is_empty());
    assert_eq!(checkpoint(&store).await.block_number, 1_000);
}

#[tokio::test]
async fn overlapping_cycles_do_not_double_insert() {
    let chain = MockChain::new(1_050);
    chain.push_log(transfer("0xdup", 3, 1_002, "7"));
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    store.seed_transfers(vec![TransferRecord::from_log(
        transfer("0xdup", 3, 1_002, "7"),
        DateTime::<Utc>::default(),
    )]);
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();

    assert_eq!(store.transfers().len(), 1);
}

#[tokio::test]
async fn consecutive_cycles_walk_forward() {
    let chain = MockChain::new(1_050);
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, _) = engine(&chain, &store);

    engine.sync_once().await.unwrap();
    engine.sync_once().await.unwrap();

    assert_eq!(chain.log_ranges(), vec![(1_001, 1_005), (1_006, 1_010)]);
}

#[tokio::test]
async fn retry_then_succeed_waits_twice() {
    let chain = MockChain::new(5_000);
    chain.fail_tip(SyncError::rpc(RpcErrorKind::Timeout, "Network timeout"));
    chain.fail_tip(SyncError::rpc(RpcErrorKind::Timeout, "Network timeout"));
    let store = Arc::new(MemoryStore::new());
    let (engine, sleeper) = engine(&chain, &store);

    engine.run_cycle().await;

    // Two failures, then one success for the bootstrap and one for finalization.
    assert_eq!(chain.tip_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        sleeper.waits(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(checkpoint(&store).await.block_number, 4_955);
}

#[tokio::test]
async fn non_retriable_error_aborts_cycle_without_writes() {
    let chain = MockChain::new(5_000);
    chain.fail_tip(SyncError::rpc(RpcErrorKind::InvalidArgument, "Invalid params"));
    let store = Arc::new(MemoryStore::new());
    let (engine, sleeper) = engine(&chain, &store);

    engine.run_cycle().await;

    assert_eq!(chain.tip_calls.load(Ordering::SeqCst), 1);
    assert!(sleeper.waits().is_empty());
    assert_eq!(store.write_count(), 0);
    assert!(store.checkpoint().await.unwrap().is_none());
}

#[tokio::test]
async fn timestamp_group_is_retried_as_a_unit() {
    let chain = MockChain::new(1_050);
    chain.push_log(transfer("0xa", 0, 1_001, "1"));
    chain.push_log(transfer("0xb", 0, 1_002, "2"));
    let store = Arc::new(MemoryStore::with_checkpoint(1_000, hash_of(1_000)));
    let (engine, sleeper) = engine(&chain, &store);

    chain.fail_block(1_002, SyncError::rpc(RpcErrorKind::Server, "bad gateway"));

    engine.sync_once().await.unwrap();

    assert_eq!(sleeper.waits().len(), 1);
    // The sibling fetch is repeated with the failed one.
    assert_eq!(chain.block_fetches(1_001), 2);
    assert_eq!(chain.block_fetches(1_002), 2);
    assert_eq!(store.transfers().len(), 2);
}

#[tokio::test]
async fn single_flight_trigger_makes_no_calls() {
    let chain = MockChain::new(100_000);
    let gate = chain.gate_tip();
    let store = Arc::new(MemoryStore::new());
    let (engine, _) = engine(&chain, &store);
    let scheduler = CycleScheduler::new(Arc::new(engine), Duration::from_secs(20));

    let first = scheduler.spawn_trigger().expect("first cycle starts");
    while chain.tip_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    let calls_before = chain.total_calls();
    let writes_before = store.write_count();

    assert!(!scheduler.trigger().await);
    assert_eq!(chain.total_calls(), calls_before);
    assert_eq!(store.write_count(), writes_before);

    gate.notify_one();
    gate.notify_one();
    first.await.unwrap();
    assert!(!scheduler.is_running());
}
