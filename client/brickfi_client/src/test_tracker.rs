use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};

use crate::actions::{buy_shares, claim_returns};
use crate::cache::ReadCache;
use crate::contracts::{Deployment, IStablecoin};
use crate::errors::TxError;
use crate::reads::Reader;
use crate::rpc::RpcFault;
use crate::testutils::{word, MockChain, ReceiptMode};
use crate::tracker::{TrackerConfig, TxCallbacks, TxStatus, TxTracker};

const INVESTOR: Address = Address::repeat_byte(0x11);
const POOL: Address = Address::repeat_byte(0xaa);

fn fast() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_millis(5),
        confirmation_timeout: Duration::from_millis(200),
        simulate: true,
    }
}

fn setup() -> (Arc<MockChain>, ReadCache, TxTracker) {
    let mock = MockChain::connected(INVESTOR);
    let cache = ReadCache::new();
    let tracker = TxTracker::new(mock.clone(), mock.clone(), cache.clone(), fast());
    (mock, cache, tracker)
}

fn pool() -> crate::contracts::ContractBinding {
    Deployment::default().pool_at(POOL)
}

async fn wait_until_busy(tracker: &TxTracker) {
    while !tracker.is_busy() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_confirmed_call_reaches_success_and_fires_callback() {
    let mock = MockChain::connected(INVESTOR);
    let successes = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let callbacks = {
        let s = successes.clone();
        let e = errors.clone();
        TxCallbacks::default()
            .on_success(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
    };
    let tracker = TxTracker::with_callbacks(
        mock.clone(),
        mock.clone(),
        ReadCache::new(),
        fast(),
        callbacks,
    );

    let receipt = tracker
        .submit_and_confirm(claim_returns(&pool()))
        .await
        .unwrap()
        .expect("tracker was idle");

    assert!(receipt.succeeded());
    let state = tracker.state();
    assert_eq!(state.status, TxStatus::Confirmed);
    assert_eq!(state.hash, Some(receipt.transaction_hash));
    assert!(state.is_success() && !state.is_loading());
    assert!(!tracker.is_busy());
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    // One dry run, one send.
    assert_eq!(mock.single_calls(), 1);
    assert_eq!(mock.send_count(), 1);
}

#[tokio::test]
async fn test_reinvoke_while_submitting_is_noop() {
    let (mock, _, tracker) = setup();
    mock.hold_sends();

    let first = {
        let t = tracker.clone();
        tokio::spawn(async move { t.submit(claim_returns(&pool())).await })
    };
    wait_until_busy(&tracker).await;
    assert_eq!(tracker.state().status, TxStatus::Submitting);

    let second = tracker.submit(claim_returns(&pool())).await.unwrap();
    assert_eq!(second, None);

    mock.release_sends();
    let hash = first.await.unwrap().unwrap();
    assert!(hash.is_some());
    assert_eq!(mock.send_count(), 1);
}

#[tokio::test]
async fn test_reinvoke_while_pending_is_noop_until_timeout() {
    let (mock, _, tracker) = setup();
    mock.set_receipt_mode(ReceiptMode::Never);
    let mut rx = tracker.subscribe();

    let hash = tracker.submit(claim_returns(&pool())).await.unwrap();
    assert!(hash.is_some());
    assert_eq!(tracker.state().status, TxStatus::Pending);
    assert_eq!(tracker.submit(claim_returns(&pool())).await.unwrap(), None);

    let failed = rx
        .wait_for(|s| s.status == TxStatus::Failed)
        .await
        .unwrap()
        .clone();
    assert!(matches!(failed.error, Some(TxError::ConfirmationTimeout(_))));
    assert!(!tracker.is_busy());
    assert_eq!(mock.send_count(), 1);
}

#[tokio::test]
async fn test_simulation_revert_never_reaches_wallet() {
    let (mock, _, tracker) = setup();
    mock.fail_simulation(Some("not whitelisted"));

    let err = tracker
        .submit(buy_shares(&pool(), U256::from(100u64)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TxError::Simulation("execution reverted: not whitelisted".to_string())
    );
    assert_eq!(mock.send_count(), 0);
    assert_eq!(tracker.state().status, TxStatus::Failed);
    assert_eq!(tracker.state().error, Some(err));
    assert!(!tracker.is_busy());

    // The user can try again.
    mock.fail_simulation(None);
    let receipt = tracker
        .submit_and_confirm(buy_shares(&pool(), U256::from(100u64)))
        .await
        .unwrap();
    assert!(receipt.is_some());
    assert_eq!(tracker.state().error, None);
}

#[tokio::test]
async fn test_wallet_rejection_is_reported() {
    let (mock, _, tracker) = setup();
    mock.fail_send(Some(RpcFault {
        code: 4001,
        message: "User rejected the request".to_string(),
    }));

    let err = tracker.submit(claim_returns(&pool())).await.unwrap_err();
    assert_eq!(err, TxError::Rejected("User rejected the request".to_string()));
    assert_eq!(tracker.state().status, TxStatus::Failed);
    assert!(!tracker.is_busy());
}

#[tokio::test]
async fn test_missing_account_fails_without_network() {
    let mock = MockChain::new();
    let tracker = TxTracker::new(mock.clone(), mock.clone(), ReadCache::new(), fast());

    let err = tracker.submit(claim_returns(&pool())).await.unwrap_err();
    assert!(matches!(err, TxError::Rejected(_)));
    assert_eq!(mock.network_calls(), 0);
}

#[tokio::test]
async fn test_reverted_receipt_fails_and_keeps_cache() {
    let (mock, cache, tracker) = setup();
    mock.set_receipt_mode(ReceiptMode::Revert);
    let reader = Reader::new(mock.clone(), cache.clone(), Deployment::default());
    let stablecoin = Deployment::default().stablecoin.address;
    mock.respond(
        stablecoin,
        IStablecoin::allowanceCall {
            owner: INVESTOR,
            spender: POOL,
        },
        word(U256::from(5u64)),
    );
    reader.allowance(INVESTOR, POOL).await.unwrap();

    let err = tracker
        .submit_and_confirm(claim_returns(&pool()))
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::Reverted(_)));
    assert!(tracker.state().receipt.is_some());

    reader.allowance(INVESTOR, POOL).await.unwrap();
    assert_eq!(mock.batches(), 1);
}

#[tokio::test]
async fn test_confirmation_marks_reads_stale_then_refetches() {
    let (mock, cache, tracker) = setup();
    let reader = Reader::new(mock.clone(), cache.clone(), Deployment::default());
    let stablecoin = Deployment::default().stablecoin.address;
    let query = IStablecoin::allowanceCall {
        owner: INVESTOR,
        spender: POOL,
    };
    mock.respond(stablecoin, query.clone(), word(U256::ZERO));

    assert_eq!(reader.allowance(INVESTOR, POOL).await.unwrap(), U256::ZERO);
    assert_eq!(reader.allowance(INVESTOR, POOL).await.unwrap(), U256::ZERO);
    assert_eq!(mock.batches(), 1);

    mock.respond(stablecoin, query, word(U256::from(500u64)));
    tracker
        .submit_and_confirm(claim_returns(&pool()))
        .await
        .unwrap();

    assert_eq!(cache.len().await, 1);
    assert_eq!(
        reader.allowance(INVESTOR, POOL).await.unwrap(),
        U256::from(500u64)
    );
    assert_eq!(mock.batches(), 2);
}

#[tokio::test]
async fn test_independent_trackers_may_both_be_pending() {
    let mock = MockChain::connected(INVESTOR);
    mock.set_receipt_mode(ReceiptMode::Never);
    let cache = ReadCache::new();
    let a = TxTracker::new(mock.clone(), mock.clone(), cache.clone(), fast());
    let b = TxTracker::new(mock.clone(), mock.clone(), cache, fast());

    assert!(a.submit(claim_returns(&pool())).await.unwrap().is_some());
    assert!(b.submit(claim_returns(&pool())).await.unwrap().is_some());
    assert!(a.is_busy() && b.is_busy());
    assert_eq!(mock.send_count(), 2);
}

async fn wait_until_settled(tracker: &TxTracker) {
    let mut rx = tracker.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| matches!(s.status, TxStatus::Confirmed | TxStatus::Failed)),
    )
    .await
    .expect("tracker never settled")
    .expect("tracker dropped");
}

#[tokio::test]
async fn test_abandoned_submit_still_settles() {
    let (mock, _, tracker) = setup();
    mock.hold_sends();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        tracker.submit(claim_returns(&pool())),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(tracker.is_busy());

    mock.release_sends();
    wait_until_settled(&tracker).await;

    assert_eq!(tracker.state().status, TxStatus::Confirmed);
    assert!(!tracker.is_busy());
    assert_eq!(mock.send_count(), 1);

    let again = tracker.submit(claim_returns(&pool())).await.unwrap();
    assert!(again.is_some());
}

#[tokio::test]
async fn test_abandoned_submit_and_confirm_releases_the_tracker() {
    let (mock, _, tracker) = setup();
    mock.set_receipt_mode(ReceiptMode::Revert);
    mock.hold_sends();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        tracker.submit_and_confirm(claim_returns(&pool())),
    )
    .await;
    assert!(abandoned.is_err());

    mock.release_sends();
    wait_until_settled(&tracker).await;

    let state = tracker.state();
    assert_eq!(state.status, TxStatus::Failed);
    assert!(matches!(state.error, Some(TxError::Reverted(_))));
    assert!(!tracker.is_busy());
}
