// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

mod common;

use channel_claim::{amount::Drops, ClaimSigner, KeyType};
use channel_core::{
    channel::{ChannelStatus, RoomId},
    Error,
};
use common::{channel_id, ChannelFixture};
use rstest::*;

#[fixture]
fn fixture() -> ChannelFixture {
    ChannelFixture::new(KeyType::Secp256k1)
}

#[rstest]
#[tokio::test]
async fn repeated_claim_is_stale(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.claim(&channel.channel_id, 500).await;

    let result = fixture
        .registry
        .record_claim(
            &channel.channel_id,
            Drops::new(500),
            fixture.sign(&channel.channel_id, 500),
        )
        .await;

    assert!(matches!(result, Err(Error::StaleClaim { .. })));
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.last_amount, Some(Drops::new(500)));
}

#[rstest]
#[tokio::test]
async fn signature_for_other_amount_is_rejected(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;

    let result = fixture
        .registry
        .record_claim(
            &channel.channel_id,
            Drops::new(1000),
            fixture.sign(&channel.channel_id, 999),
        )
        .await;

    assert!(matches!(result, Err(Error::InvalidSignature { .. })));
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.last_amount, None);
    assert_eq!(stored.last_signature, None);
}

#[rstest]
#[tokio::test]
async fn signature_from_other_key_is_rejected(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let impostor = ClaimSigner::random(KeyType::Ed25519);
    let signature = impostor
        .sign(&channel_claim::Claim::new(channel.channel_id, Drops::new(10)))
        .unwrap();

    let result = fixture
        .registry
        .record_claim(&channel.channel_id, Drops::new(10), signature)
        .await;

    assert!(matches!(result, Err(Error::InvalidSignature { .. })));
}

#[rstest]
#[tokio::test]
async fn claim_above_deposit_is_stale(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000).await;

    let result = fixture
        .registry
        .record_claim(
            &channel.channel_id,
            Drops::new(1_001),
            fixture.sign(&channel.channel_id, 1_001),
        )
        .await;

    assert!(matches!(result, Err(Error::StaleClaim { .. })));
    fixture.claim(&channel.channel_id, 1_000).await;
}

#[rstest]
#[case::increasing(vec![10, 20, 30], vec![true, true, true])]
#[case::repeat(vec![10, 10, 11], vec![true, false, true])]
#[case::regress(vec![50, 40, 60, 55], vec![true, false, true, false])]
#[case::zero_first(vec![0, 1], vec![false, true])]
#[tokio::test]
async fn accepted_claims_only_increase(
    fixture: ChannelFixture,
    #[case] amounts: Vec<u64>,
    #[case] accepted: Vec<bool>,
) {
    let channel = fixture.open_channel(1, 1_000).await;
    let mut highest = None;

    for (amount, expected) in amounts.into_iter().zip(accepted) {
        let result = fixture
            .registry
            .record_claim(
                &channel.channel_id,
                Drops::new(amount),
                fixture.sign(&channel.channel_id, amount),
            )
            .await;
        assert_eq!(result.is_ok(), expected, "claim of {amount}");
        if expected {
            highest = Some(Drops::new(amount));
        }

        let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
        assert_eq!(stored.last_amount, highest);
        assert!(stored.last_amount.unwrap_or(Drops::ZERO) <= stored.amount);
    }
}

#[rstest]
#[tokio::test]
async fn stored_signature_verifies(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let updated = fixture.claim(&channel.channel_id, 42_000).await;

    let claim = updated.latest_claim().unwrap();
    assert_eq!(claim.claim.amount, Drops::new(42_000));
    assert!(claim.verify(&updated.public_key));
}

#[rstest]
#[tokio::test]
async fn deposit_preserves_claim_history(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.claim(&channel.channel_id, 500_000).await;

    let updated = fixture
        .registry
        .apply_deposit(&channel.channel_id, Drops::new(2_000_000))
        .await
        .unwrap();
    assert_eq!(updated.amount, Drops::new(2_000_000));
    assert_eq!(updated.last_amount, Some(Drops::new(500_000)));

    let again = fixture
        .registry
        .record_claim(
            &channel.channel_id,
            Drops::new(500_000),
            fixture.sign(&channel.channel_id, 500_000),
        )
        .await;
    assert!(matches!(again, Err(Error::StaleClaim { .. })));

    let lower = fixture
        .registry
        .apply_deposit(&channel.channel_id, Drops::new(1_500_000))
        .await
        .unwrap();
    assert_eq!(lower.amount, Drops::new(2_000_000));
}

#[rstest]
#[tokio::test]
async fn only_open_channels_accept_writes(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture
        .registry
        .mark_closing(&channel.channel_id)
        .await
        .unwrap();

    let claim = fixture
        .registry
        .record_claim(
            &channel.channel_id,
            Drops::new(10),
            fixture.sign(&channel.channel_id, 10),
        )
        .await;
    assert!(matches!(
        claim,
        Err(Error::ChannelNotOpen {
            status: ChannelStatus::Closing,
            ..
        })
    ));

    let deposit = fixture
        .registry
        .apply_deposit(&channel.channel_id, Drops::new(5_000_000))
        .await;
    assert!(matches!(deposit, Err(Error::ChannelNotOpen { .. })));
}

#[rstest]
#[tokio::test]
async fn status_never_moves_back(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;

    let closed = fixture
        .registry
        .mark_closed(&channel.channel_id)
        .await
        .unwrap();
    assert_eq!(closed.status, ChannelStatus::Closed);
    assert!(closed.closed_at.is_some());

    let result = fixture.registry.mark_closing(&channel.channel_id).await;
    assert!(matches!(
        result,
        Err(Error::InvalidTransition {
            from: ChannelStatus::Closed,
            to: ChannelStatus::Closing,
            ..
        })
    ));
}

#[rstest]
#[tokio::test]
async fn unknown_channel_is_not_found(fixture: ChannelFixture) {
    let result = fixture.registry.get(&channel_id(9)).await;
    assert!(matches!(result, Err(Error::ChannelNotFound { .. })));
}

#[rstest]
#[tokio::test]
async fn room_holds_one_funded_channel(fixture: ChannelFixture) {
    fixture.open_channel(1, 1_000_000).await;

    let result = fixture
        .registry
        .register(fixture.payment_channel(2, 1_000_000))
        .await;

    assert!(matches!(result, Err(Error::ChannelAlreadyOpen { .. })));
}

#[rstest]
#[tokio::test]
async fn reconcile_discovers_ledger_channel(fixture: ChannelFixture) {
    fixture
        .ledger
        .open_channel(fixture.ledger_channel(3, 2_000_000));

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.channel_id, channel_id(3));
    assert_eq!(found.room_id, fixture.room_id);
    assert_eq!(found.amount, Drops::new(2_000_000));
    assert_eq!(found.last_amount, None);
    assert_eq!(fixture.store.len(), 1);
}

#[rstest]
#[tokio::test]
async fn reconcile_updates_deposit_but_not_claims(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.claim(&channel.channel_id, 250_000).await;
    fixture
        .ledger
        .fund(&channel.channel_id, Drops::new(500_000))
        .unwrap();

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.amount, Drops::new(1_500_000));
    assert_eq!(found.last_amount, Some(Drops::new(250_000)));
    assert!(found.latest_claim().unwrap().verify(&found.public_key));
}

#[rstest]
#[tokio::test]
async fn ledger_outage_falls_back_to_cache(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.ledger.set_unavailable(true);

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert_eq!(found.map(|c| c.channel_id), Some(channel.channel_id));
    assert_eq!(fixture.ledger.reads(), 3);
}

#[rstest]
#[tokio::test]
async fn exhausted_cached_channel_is_absent(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000).await;
    fixture.claim(&channel.channel_id, 1_000).await;
    fixture.ledger.set_unavailable(true);

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert!(found.is_none());
}

#[rstest]
#[tokio::test]
async fn channel_gone_from_ledger_is_closed(fixture: ChannelFixture) {
    let first = fixture.open_channel(1, 1_000_000).await;
    fixture
        .ledger
        .open_channel(fixture.ledger_channel(2, 3_000_000));
    fixture.ledger.remove(&first.channel_id);

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.channel_id, channel_id(2));
    let closed = fixture.registry.get(&first.channel_id).await.unwrap();
    assert_eq!(closed.status, ChannelStatus::Closed);
    assert!(closed.closed_at.is_some());
}

#[rstest]
#[tokio::test]
async fn exhausted_channel_is_replaced_for_room(fixture: ChannelFixture) {
    let first = fixture.open_channel(1, 1_000).await;
    fixture.claim(&first.channel_id, 1_000).await;
    fixture
        .ledger
        .open_channel(fixture.ledger_channel(2, 5_000));

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.channel_id, channel_id(2));
    let previous = fixture.registry.get(&first.channel_id).await.unwrap();
    assert_eq!(previous.status, ChannelStatus::Closing);
    assert_eq!(previous.last_amount, Some(Drops::new(1_000)));
}

#[rstest]
#[tokio::test]
async fn fully_redeemed_ledger_channel_is_skipped(fixture: ChannelFixture) {
    let mut redeemed = fixture.ledger_channel(4, 1_000);
    redeemed.balance = Drops::new(1_000);
    fixture.ledger.open_channel(redeemed);

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert!(found.is_none());
    assert!(fixture.store.is_empty());
}

#[rstest]
#[tokio::test]
async fn close_requested_on_ledger_moves_to_closing(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture
        .ledger
        .request_close(&channel.channel_id, 800_000_000)
        .unwrap();

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert!(found.is_none());
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.status, ChannelStatus::Closing);
}

#[rstest]
#[tokio::test]
async fn channel_of_another_room_is_not_handed_out(fixture: ChannelFixture) {
    let first = fixture.open_channel(1, 1_000_000).await;
    let other_room = RoomId::from("room-2");

    let found = fixture
        .registry
        .find_or_reconcile(&other_room, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();
    assert!(found.is_none());

    fixture
        .ledger
        .open_channel(fixture.ledger_channel(2, 500_000));
    let found = fixture
        .registry
        .find_or_reconcile(&other_room, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.channel_id, channel_id(2));
    assert_eq!(found.room_id, other_room);

    let own = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(own.channel_id, first.channel_id);
    assert_eq!(own.room_id, fixture.room_id);
}

#[rstest]
#[tokio::test]
async fn closing_ledger_channel_is_passed_over(fixture: ChannelFixture) {
    let mut closing = fixture.ledger_channel(1, 1_000_000);
    closing.expiration = Some(800_000_000);
    fixture.ledger.open_channel(closing);
    fixture
        .ledger
        .open_channel(fixture.ledger_channel(2, 1_000_000));

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert_eq!(found.map(|c| c.channel_id), Some(channel_id(2)));
}

#[rstest]
#[tokio::test]
async fn close_request_reaches_cache_while_another_channel_is_used(fixture: ChannelFixture) {
    let first = fixture.open_channel(1, 1_000_000).await;
    fixture
        .ledger
        .open_channel(fixture.ledger_channel(2, 1_000_000));
    fixture
        .ledger
        .request_close(&first.channel_id, 800_000_000)
        .unwrap();

    let found = fixture
        .registry
        .find_or_reconcile(&fixture.room_id, &fixture.sender, &fixture.receiver)
        .await
        .unwrap();

    assert_eq!(found.map(|c| c.channel_id), Some(channel_id(2)));
    let stored = fixture.registry.get(&first.channel_id).await.unwrap();
    assert_eq!(stored.status, ChannelStatus::Closing);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_keep_the_highest_claim(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000).await;
    let channel_id = channel.channel_id;

    let mut tasks = Vec::new();
    for amount in (1..=40u64).rev().chain(41..=80) {
        let registry = fixture.registry.clone();
        let signature = fixture.sign(&channel_id, amount);
        tasks.push(tokio::spawn(async move {
            registry
                .record_claim(&channel_id, Drops::new(amount), signature)
                .await
        }));
    }
    let registry = fixture.registry.clone();
    let deposit =
        tokio::spawn(async move { registry.apply_deposit(&channel_id, Drops::new(5_000)).await });

    for task in tasks {
        match task.await.unwrap() {
            Ok(_) | Err(Error::StaleClaim { .. }) => {}
            Err(err) => panic!("unexpected claim error: {err}"),
        }
    }
    deposit.await.unwrap().unwrap();

    let stored = fixture.registry.get(&channel_id).await.unwrap();
    assert_eq!(stored.amount, Drops::new(5_000));
    assert_eq!(stored.last_amount, Some(Drops::new(80)));
    assert!(stored.latest_claim().unwrap().verify(&stored.public_key));
}
