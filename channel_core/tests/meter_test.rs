// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use channel_claim::{amount::Drops, ChannelId, KeyType};
use channel_core::{
    meter::{MeterConfig, MeterStop, PaymentMeter, Resume, TickOutcome},
    Error,
};
use common::ChannelFixture;
use rstest::*;

#[fixture]
fn fixture() -> ChannelFixture {
    ChannelFixture::new(KeyType::Ed25519)
}

fn counting_handler() -> (Arc<AtomicUsize>, impl Fn(&ChannelId) + Send + Sync + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    (calls, move |_: &ChannelId| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[rstest]
#[tokio::test]
async fn hour_of_streaming_uses_up_sixty_xrp(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 60_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(1_000_000));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();

    for _ in 0..60 {
        meter.tick().await.unwrap();
    }
    let after_minute = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(after_minute.last_amount, Some(Drops::new(1_000_000)));

    let mut last = None;
    for _ in 60..3600 {
        last = Some(meter.tick().await.unwrap());
    }
    assert_eq!(
        last,
        Some(TickOutcome::Claimed {
            amount: Drops::new(60_000_000),
            exhausted: true
        })
    );

    let result = meter.tick().await;
    assert!(matches!(result, Err(Error::InsufficientBalance { .. })));
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.last_amount, Some(Drops::new(60_000_000)));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn running_meter_stops_when_deposit_is_used_up(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(600_000));
    let meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();
    let (calls, handler) = counting_handler();

    let outcome = meter.start(handler).join().await.unwrap();

    assert!(outcome.is_insufficient_balance());
    assert_eq!(outcome.elapsed_secs, 100);
    assert_eq!(outcome.last_signed_amount, Some(Drops::new(1_000_000)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.last_amount, Some(Drops::new(1_000_000)));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stop_is_immediate_and_idempotent(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 60_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(60_000));
    let meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();
    let (calls, handler) = counting_handler();
    let handle = meter.start(handler);

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    handle.stop();
    handle.stop();
    let progress = handle.progress();
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome.stop, MeterStop::Stopped));
    assert_eq!(outcome.elapsed_secs, 5);
    assert_eq!(outcome.elapsed_secs, progress.elapsed_secs);
    assert_eq!(outcome.last_signed_amount, Some(Drops::new(5_000)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.last_amount, Some(Drops::new(5_000)));
}

#[rstest]
#[tokio::test]
async fn top_up_keeps_last_signed_amount(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.claim(&channel.channel_id, 500_000).await;
    fixture
        .registry
        .apply_deposit(&channel.channel_id, Drops::new(2_000_000))
        .await
        .unwrap();

    let below = MeterConfig::new(channel.channel_id, Drops::new(400_000))
        .with_resume(Resume::FromSeconds(59));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), below)
        .await
        .unwrap();
    assert_eq!(meter.last_signed_amount(), Some(Drops::new(500_000)));
    assert_eq!(
        meter.tick().await.unwrap(),
        TickOutcome::Skipped {
            owed: Drops::new(400_000)
        }
    );

    let above = MeterConfig::new(channel.channel_id, Drops::new(600_000))
        .with_resume(Resume::FromSeconds(59));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), above)
        .await
        .unwrap();
    assert_eq!(
        meter.tick().await.unwrap(),
        TickOutcome::Claimed {
            amount: Drops::new(600_000),
            exhausted: false
        }
    );

    let stored = fixture.registry.get(&channel.channel_id).await.unwrap();
    assert_eq!(stored.amount, Drops::new(2_000_000));
    assert_eq!(stored.last_amount, Some(Drops::new(600_000)));
}

#[rstest]
#[tokio::test]
async fn rejoin_adds_to_existing_claims(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture.claim(&channel.channel_id, 300_000).await;

    let config = MeterConfig::new(channel.channel_id, Drops::new(60_000))
        .with_resume(Resume::FromAmount(Drops::new(300_000)));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();

    assert_eq!(
        meter.tick().await.unwrap(),
        TickOutcome::Claimed {
            amount: Drops::new(301_000),
            exhausted: false
        }
    );
}

#[rstest]
#[tokio::test]
async fn small_rates_skip_until_a_drop_is_owed(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(2));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();

    for _ in 0..14 {
        assert!(matches!(
            meter.tick().await.unwrap(),
            TickOutcome::Skipped { .. }
        ));
    }
    assert_eq!(
        meter.tick().await.unwrap(),
        TickOutcome::Claimed {
            amount: Drops::new(1),
            exhausted: false
        }
    );
}

#[rstest]
#[tokio::test]
async fn rejected_claim_is_a_payment_failure(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(60_000));
    let mut meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();
    fixture
        .registry
        .mark_closing(&channel.channel_id)
        .await
        .unwrap();

    let result = meter.tick().await;

    assert!(matches!(
        result,
        Err(Error::PaymentFailure { source, .. }) if matches!(*source, Error::ChannelNotOpen { .. })
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_meter_does_not_signal_host(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(60_000));
    let meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();
    fixture
        .registry
        .mark_closed(&channel.channel_id)
        .await
        .unwrap();
    let (calls, handler) = counting_handler();

    let outcome = meter.start(handler).join().await.unwrap();

    assert!(matches!(
        outcome.stop,
        MeterStop::Failed(Error::PaymentFailure { .. })
    ));
    assert_eq!(outcome.elapsed_secs, 1);
    assert_eq!(outcome.last_signed_amount, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn closed_channel_cannot_be_metered(fixture: ChannelFixture) {
    let channel = fixture.open_channel(1, 1_000_000).await;
    fixture
        .registry
        .mark_closed(&channel.channel_id)
        .await
        .unwrap();

    let config = MeterConfig::new(channel.channel_id, Drops::new(60_000));
    let result = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config).await;

    assert!(matches!(result, Err(Error::ChannelNotOpen { .. })));
}

#[rstest]
#[case::sixty_xrp_per_hour(1_000_000, 90)]
#[case::slow_rate(30, 7)]
#[tokio::test(start_paused = true)]
async fn billing_follows_wall_clock(
    fixture: ChannelFixture,
    #[case] rate_per_minute: u64,
    #[case] wall_secs: u64,
) {
    let channel = fixture.open_channel(1, 60_000_000).await;
    let config = MeterConfig::new(channel.channel_id, Drops::new(rate_per_minute));
    let meter = PaymentMeter::new(fixture.registry.clone(), fixture.signer.clone(), config)
        .await
        .unwrap();
    let (_, handler) = counting_handler();
    let handle = meter.start(handler);

    tokio::time::sleep(Duration::from_millis(wall_secs * 1_000 + 500)).await;
    handle.stop();
    let outcome = handle.join().await.unwrap();

    assert_eq!(outcome.elapsed_secs, wall_secs);
    let expected = channel_claim::amount::prorate(Drops::new(rate_per_minute), wall_secs).unwrap();
    assert_eq!(outcome.last_signed_amount, Some(expected));
}
