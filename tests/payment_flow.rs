//! Payment builder workflow: the full send path, sufficiency checks,
//! conflicts, cancellation, and authentication.

mod common;

use std::time::Duration;

use common::{BroadcastBehavior, TestHarness};
use wallet_engine::{AssetType, FeeType, PaymentState, StoreTarget, WalletError, WalletEvent};

const DEST_ETH: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

#[tokio::test]
async fn regular_send_decrements_amount_plus_fee() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 100_000).await;
    let mut events = h.engine.subscribe_events();

    let asset = AssetType::Bitcoin;
    let source = StoreTarget::Account(account.index);

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, source.clone())
        .await
        .unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 40_000).await.unwrap();

    // Custom rate 2 * estimated 250 vbytes = 500.
    let fee = h
        .engine
        .payment_estimate_fee(asset, FeeType::Custom(2))
        .await
        .unwrap();
    assert_eq!(fee, 500);

    h.engine.payment_check_sufficiency(asset).await.unwrap();
    let signed = h.engine.payment_sign(asset, None).await.unwrap();
    assert!(!signed.raw_hex.is_empty());
    assert_eq!(h.engine.payment_state(asset).await, Some(PaymentState::Signed));

    let txid = h.engine.payment_broadcast(asset).await.unwrap();
    assert!(!txid.is_empty());

    // 100000 - 40000 - 500 = 59500, per the optimistic decrement.
    let balance = h.engine.balance_for(asset, &source).await.unwrap();
    assert_eq!(balance.amount, 59_500);

    // Flow is gone; a new one may begin.
    assert_eq!(h.engine.payment_state(asset).await, None);
    h.engine.payment_begin(asset).await.unwrap();

    common::expect_event(&mut events, |e| {
        matches!(e, WalletEvent::PaymentSucceeded { amount: 40_000, fee: 500, .. })
    })
    .await;
}

#[tokio::test]
async fn insufficiency_leaves_payment_retryable() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 10_000).await;
    let asset = AssetType::Bitcoin;

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, StoreTarget::Account(account.index))
        .await
        .unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 9_900).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Custom(2))
        .await
        .unwrap();

    let err = h.engine.payment_check_sufficiency(asset).await.unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds(_)));
    assert_eq!(
        h.engine.payment_state(asset).await,
        Some(PaymentState::FeeEstimated)
    );

    // Adjust the amount and the same flow goes through.
    h.engine.payment_set_amount(asset, 9_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Custom(2))
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();
    h.engine.payment_sign(asset, None).await.unwrap();
    h.engine.payment_broadcast(asset).await.unwrap();

    let balance = h
        .engine
        .balance_for(asset, &StoreTarget::Account(account.index))
        .await
        .unwrap();
    assert_eq!(balance.amount, 10_000 - 9_000 - 500);
}

#[tokio::test]
async fn second_flow_for_same_asset_conflicts() {
    let h = TestHarness::new();
    h.funded_account(AssetType::Bitcoin, "Main", 100_000).await;
    h.funded_account(AssetType::Ethereum, "Eth", 1_000_000_000).await;

    h.engine.payment_begin(AssetType::Bitcoin).await.unwrap();
    let err = h.engine.payment_begin(AssetType::Bitcoin).await.unwrap_err();
    assert!(matches!(
        err,
        WalletError::Conflict {
            asset: AssetType::Bitcoin,
            ..
        }
    ));

    // A different asset is unaffected.
    h.engine.payment_begin(AssetType::Ethereum).await.unwrap();
    h.engine.payment_cancel(AssetType::Ethereum).await.unwrap();
    h.engine.payment_cancel(AssetType::Bitcoin).await.unwrap();
}

#[tokio::test]
async fn cancel_before_broadcast_restores_idle() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;
    let source = StoreTarget::Account(account.index);

    // Cancel in Building.
    h.engine.payment_begin(asset).await.unwrap();
    h.engine.payment_cancel(asset).await.unwrap();
    assert_eq!(h.engine.payment_state(asset).await, None);

    // Cancel in Signed.
    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, source.clone())
        .await
        .unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 20_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Regular)
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();
    h.engine.payment_sign(asset, None).await.unwrap();
    h.engine.payment_cancel(asset).await.unwrap();

    // No balance mutation happened on any of that.
    let balance = h.engine.balance_for(asset, &source).await.unwrap();
    assert_eq!(balance.amount, 50_000);
    assert_eq!(h.broadcaster.call_count(), 0);
}

#[tokio::test]
async fn cancel_after_broadcast_is_irreversible() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;

    // A broadcast that outlives the operation timeout leaves the flow in
    // Broadcasting: the network may still accept it.
    h.broadcaster
        .queue(BroadcastBehavior::Delay(Duration::from_secs(2)));

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, StoreTarget::Account(account.index))
        .await
        .unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 20_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Regular)
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();
    h.engine.payment_sign(asset, None).await.unwrap();

    let err = h.engine.payment_broadcast(asset).await.unwrap_err();
    assert!(matches!(err, WalletError::Timeout(_)));
    assert_eq!(
        h.engine.payment_state(asset).await,
        Some(PaymentState::Broadcasting)
    );

    let err = h.engine.payment_cancel(asset).await.unwrap_err();
    assert!(matches!(err, WalletError::Irreversible(_)));
}

#[tokio::test]
async fn rejected_broadcast_rolls_back_nothing() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;
    let mut events = h.engine.subscribe_events();

    h.broadcaster
        .queue(BroadcastBehavior::Reject("mempool full".into()));

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, StoreTarget::Account(account.index))
        .await
        .unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 20_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Regular)
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();
    h.engine.payment_sign(asset, None).await.unwrap();

    let err = h.engine.payment_broadcast(asset).await.unwrap_err();
    assert!(matches!(err, WalletError::Broadcast(_)));

    // Balance untouched, flow freed.
    let balance = h
        .engine
        .balance_for(asset, &StoreTarget::Account(account.index))
        .await
        .unwrap();
    assert_eq!(balance.amount, 50_000);
    assert_eq!(h.engine.payment_state(asset).await, None);

    common::expect_event(&mut events, |e| {
        matches!(
            e,
            WalletEvent::PaymentFailed {
                operation: "broadcast",
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn wrong_second_password_is_retryable() {
    let h = TestHarness::with_second_password(Some("hunter2"));
    let account = h.funded_account(AssetType::Ethereum, "Eth", 10_000_000).await;
    let asset = AssetType::Ethereum;
    let mut events = h.engine.subscribe_events();

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, StoreTarget::Account(account.index))
        .await
        .unwrap();
    h.engine.payment_set_destination(asset, DEST_ETH).await.unwrap();
    h.engine.payment_set_amount(asset, 500_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Custom(1))
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();

    let err = h.engine.payment_sign(asset, Some("wrong")).await.unwrap_err();
    assert!(matches!(err, WalletError::Authentication(_)));
    assert_eq!(
        h.engine.payment_state(asset).await,
        Some(PaymentState::FeeEstimated)
    );
    common::expect_event(&mut events, |e| {
        matches!(e, WalletEvent::AuthenticationRequired { operation: "sign", .. })
    })
    .await;

    // Retry with the right credential, same flow.
    h.engine.payment_sign(asset, Some("hunter2")).await.unwrap();
    h.engine.payment_broadcast(asset).await.unwrap();
}

#[tokio::test]
async fn sub_dust_amount_rejected() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;

    h.engine.payment_begin(asset).await.unwrap();
    h.engine
        .payment_set_source(asset, StoreTarget::Account(account.index))
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 300).await.unwrap();

    let err = h
        .engine
        .payment_estimate_fee(asset, FeeType::Regular)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Dust { amount: 300, dust_threshold: 546 }));
}

#[tokio::test]
async fn invalid_destination_keeps_previous() {
    let h = TestHarness::new();
    h.funded_account(AssetType::Ethereum, "Eth", 10_000_000).await;
    let asset = AssetType::Ethereum;

    h.engine.payment_begin(asset).await.unwrap();
    h.engine.payment_set_destination(asset, DEST_ETH).await.unwrap();
    let err = h
        .engine
        .payment_set_destination(asset, "not-an-address")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
}

/// Drive a flow into `Broadcasting` via a broadcast that outlives the
/// operation timeout. 20_000 + 500 fee from a 50_000 account.
async fn timed_out_send(h: &TestHarness, asset: AssetType, source: StoreTarget) {
    h.broadcaster
        .queue(BroadcastBehavior::Delay(Duration::from_secs(2)));

    h.engine.payment_begin(asset).await.unwrap();
    h.engine.payment_set_source(asset, source).await.unwrap();
    h.engine
        .payment_set_destination(asset, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        .await
        .unwrap();
    h.engine.payment_set_amount(asset, 20_000).await.unwrap();
    h.engine
        .payment_estimate_fee(asset, FeeType::Custom(2))
        .await
        .unwrap();
    h.engine.payment_check_sufficiency(asset).await.unwrap();
    h.engine.payment_sign(asset, None).await.unwrap();

    let err = h.engine.payment_broadcast(asset).await.unwrap_err();
    assert!(matches!(err, WalletError::Timeout(_)));
    assert_eq!(
        h.engine.payment_state(asset).await,
        Some(PaymentState::Broadcasting)
    );
}

#[tokio::test]
async fn timed_out_broadcast_resolves_as_confirmed() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;
    let source = StoreTarget::Account(account.index);
    let mut events = h.engine.subscribe_events();

    timed_out_send(&h, asset, source.clone()).await;

    h.engine.payment_resolve(asset, true).await.unwrap();

    let balance = h.engine.balance_for(asset, &source).await.unwrap();
    assert_eq!(balance.amount, 50_000 - 20_500);
    assert_eq!(h.engine.payment_state(asset).await, None);

    common::expect_event(&mut events, |e| {
        matches!(
            e,
            WalletEvent::PaymentSucceeded {
                amount: 20_000,
                fee: 500,
                ..
            }
        )
    })
    .await;

    // The asset can send again.
    h.engine.payment_begin(asset).await.unwrap();
}

#[tokio::test]
async fn timed_out_broadcast_resolves_as_dropped() {
    let h = TestHarness::new();
    let account = h.funded_account(AssetType::Bitcoin, "Main", 50_000).await;
    let asset = AssetType::Bitcoin;
    let source = StoreTarget::Account(account.index);

    timed_out_send(&h, asset, source.clone()).await;

    h.engine.payment_resolve(asset, false).await.unwrap();

    // Nothing was debited and the slot is free.
    let balance = h.engine.balance_for(asset, &source).await.unwrap();
    assert_eq!(balance.amount, 50_000);
    assert_eq!(h.engine.payment_state(asset).await, None);
    h.engine.payment_begin(asset).await.unwrap();
}

#[tokio::test]
async fn resolve_requires_an_unresolved_broadcast() {
    let h = TestHarness::new();
    let asset = AssetType::Bitcoin;
    h.funded_account(asset, "Main", 50_000).await;

    // No pending payment at all.
    let err = h.engine.payment_resolve(asset, true).await.unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));

    // A flow that has not reached broadcast cannot be resolved either.
    h.engine.payment_begin(asset).await.unwrap();
    let err = h.engine.payment_resolve(asset, false).await.unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
    assert_eq!(
        h.engine.payment_state(asset).await,
        Some(PaymentState::Building)
    );
}
