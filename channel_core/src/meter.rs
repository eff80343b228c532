// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Payment meter
//!
//! A [`PaymentMeter`] bills one streaming session. Once per tick it computes
//! the cumulative amount owed for the time elapsed, signs a claim for it and
//! records the claim through the [`ChannelRegistry`].
//!
//! The meter never retries. A claim the registry rejects ends the session
//! with [`Error::PaymentFailure`], and running out of deposit ends it with
//! [`Error::InsufficientBalance`] after notifying the host through an
//! [`InsufficientBalanceHandler`]. The final [`MeterOutcome`] carries the
//! elapsed time and last signed amount so a later run can resume.
//!
//! The meter only reads the registry cache. It never calls the ledger, so a
//! slow reconciliation cannot delay claim signing.

use std::{sync::Arc, time::Duration};

use channel_claim::{
    amount::{prorate, AmountError, Drops},
    ChannelId, Claim, ClaimSigner,
};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{ChannelStore, LedgerGateway},
    channel::PaymentChannel,
    registry::ChannelRegistry,
    Error, Result,
};

/// Each tick bills one second of session time.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Where a new meter run picks up from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum Resume {
    #[default]
    Fresh,
    /// Keep the running clock, e.g. after a deposit top up.
    FromSeconds(u64),
    /// Rejoin a channel that already carries claims up to this amount.
    /// Owed amounts for the new run are added on top of it.
    FromAmount(Drops),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub channel_id: ChannelId,
    /// Drops billed per minute of elapsed time
    pub rate_per_minute: Drops,
    pub resume: Resume,
}

impl MeterConfig {
    pub fn new(channel_id: ChannelId, rate_per_minute: Drops) -> Self {
        Self {
            channel_id,
            rate_per_minute,
            resume: Resume::Fresh,
        }
    }

    pub fn with_resume(mut self, resume: Resume) -> Self {
        self.resume = resume;
        self
    }
}

/// Signal to the host process that a meter ran out of deposit.
///
/// The host is expected to halt whatever the session was paying for.
pub trait InsufficientBalanceHandler: Send + Sync {
    fn on_insufficient_balance(&self, channel_id: &ChannelId);
}

impl<F> InsufficientBalanceHandler for F
where
    F: Fn(&ChannelId) + Send + Sync,
{
    fn on_insufficient_balance(&self, channel_id: &ChannelId) {
        self(channel_id)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new owed beyond the last signed claim
    Skipped { owed: Drops },
    /// A claim for `amount` was recorded; `exhausted` when it used up the deposit
    Claimed { amount: Drops, exhausted: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterProgress {
    pub elapsed_secs: u64,
    pub last_signed_amount: Option<Drops>,
}

#[derive(Debug)]
pub enum MeterStop {
    /// Stopped by the caller
    Stopped,
    /// Stopped itself; `InsufficientBalance` or `PaymentFailure`
    Failed(Error),
}

#[derive(Debug)]
pub struct MeterOutcome {
    pub channel_id: ChannelId,
    pub elapsed_secs: u64,
    pub last_signed_amount: Option<Drops>,
    pub stop: MeterStop,
}

impl MeterOutcome {
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self.stop, MeterStop::Failed(Error::InsufficientBalance { .. }))
    }
}

pub struct PaymentMeter<S, L> {
    registry: Arc<ChannelRegistry<S, L>>,
    signer: Arc<ClaimSigner>,
    config: MeterConfig,
    elapsed_secs: u64,
    base: Drops,
    last_signed: Option<Drops>,
}

impl<S, L> PaymentMeter<S, L>
where
    S: ChannelStore,
    L: LedgerGateway,
{
    /// Prepares a meter for `config.channel_id`.
    ///
    /// The last signed amount is seeded from the registry (or the resume
    /// amount, whichever is larger) so a resumed run never signs below a
    /// claim already issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the registry has no record of
    /// the channel and [`Error::ChannelNotOpen`] unless it is open.
    pub async fn new(
        registry: Arc<ChannelRegistry<S, L>>,
        signer: Arc<ClaimSigner>,
        config: MeterConfig,
    ) -> Result<Self> {
        let channel = registry.get(&config.channel_id).await?;
        if !channel.is_open() {
            return Err(Error::ChannelNotOpen {
                channel_id: channel.channel_id,
                status: channel.status,
            });
        }

        let (elapsed_secs, base) = match config.resume {
            Resume::Fresh => (0, Drops::ZERO),
            Resume::FromSeconds(secs) => (secs, Drops::ZERO),
            Resume::FromAmount(amount) => (0, amount),
        };
        let last_signed = match (channel.last_amount, base.is_zero()) {
            (Some(last), _) => Some(last.max(base)),
            (None, false) => Some(base),
            (None, true) => None,
        };

        Ok(Self {
            registry,
            signer,
            config,
            elapsed_secs,
            base,
            last_signed,
        })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.config.channel_id
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn last_signed_amount(&self) -> Option<Drops> {
        self.last_signed
    }

    pub fn progress(&self) -> MeterProgress {
        MeterProgress {
            elapsed_secs: self.elapsed_secs,
            last_signed_amount: self.last_signed,
        }
    }

    fn owed_at(&self, elapsed_secs: u64) -> Result<Drops> {
        let accrued = prorate(self.config.rate_per_minute, elapsed_secs)?;
        self.base.checked_add(accrued).ok_or_else(|| {
            Error::Precision(AmountError::Overflow {
                value: format!("{} + {accrued}", self.base),
            })
        })
    }

    fn payment_failure(&self, source: Error) -> Error {
        Error::PaymentFailure {
            channel_id: self.config.channel_id,
            source: Box::new(source),
        }
    }

    fn insufficient_balance(&self, owed: Drops, channel: &PaymentChannel) -> Error {
        Error::InsufficientBalance {
            channel_id: channel.channel_id,
            owed,
            deposit: channel.amount,
        }
    }

    /// Advances the clock by one second and claims whatever is newly owed.
    ///
    /// # Errors
    ///
    /// - [`Error::InsufficientBalance`] if the owed amount exceeds the deposit
    /// - [`Error::PaymentFailure`] if the claim could not be signed or recorded
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.elapsed_secs += 1;
        let channel_id = self.config.channel_id;

        let owed = self
            .owed_at(self.elapsed_secs)
            .map_err(|err| self.payment_failure(err))?;
        let channel = self
            .registry
            .get(&channel_id)
            .await
            .map_err(|err| self.payment_failure(err))?;

        if owed > channel.amount {
            return Err(self.insufficient_balance(owed, &channel));
        }
        if owed <= self.last_signed.unwrap_or(Drops::ZERO) {
            return Ok(TickOutcome::Skipped { owed });
        }

        let signature = self
            .signer
            .sign(&Claim::new(channel_id, owed))
            .map_err(|err| self.payment_failure(err.into()))?;
        let channel = self
            .registry
            .record_claim(&channel_id, owed, signature)
            .await
            .map_err(|err| self.payment_failure(err))?;

        self.last_signed = Some(owed);
        Ok(TickOutcome::Claimed {
            amount: owed,
            exhausted: channel.remaining().is_zero(),
        })
    }
}

impl<S, L> PaymentMeter<S, L>
where
    S: ChannelStore + 'static,
    L: LedgerGateway + 'static,
{
    /// Spawns the meter on the tokio runtime, ticking every
    /// [`TICK_INTERVAL`] until stopped or failed.
    pub fn start<H>(mut self, handler: H) -> MeterHandle
    where
        H: InsufficientBalanceHandler + 'static,
    {
        let channel_id = self.config.channel_id;
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(self.progress());
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Meter started on channel {channel_id} at {} drops/min",
                self.config.rate_per_minute
            );

            let stop = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break MeterStop::Stopped,
                    _ = interval.tick() => {}
                }

                let tick = self.tick().await;
                progress_tx.send_replace(self.progress());
                match tick {
                    Ok(TickOutcome::Claimed {
                        exhausted: true, ..
                    }) => {
                        let err = match self.registry.get(&channel_id).await {
                            Ok(channel) => {
                                let next = self
                                    .owed_at(self.elapsed_secs + 1)
                                    .unwrap_or(channel.amount);
                                self.insufficient_balance(next, &channel)
                            }
                            Err(err) => self.payment_failure(err),
                        };
                        info!("Meter on channel {channel_id} used up the deposit");
                        handler.on_insufficient_balance(&channel_id);
                        break MeterStop::Failed(err);
                    }
                    Ok(outcome) => debug!("Meter tick on {channel_id}: {outcome:?}"),
                    Err(err @ Error::InsufficientBalance { .. }) => {
                        info!("Meter on channel {channel_id} stopped: {err}");
                        handler.on_insufficient_balance(&channel_id);
                        break MeterStop::Failed(err);
                    }
                    Err(err) => {
                        error!("Meter on channel {channel_id} failed: {err}");
                        break MeterStop::Failed(err);
                    }
                }
            };

            MeterOutcome {
                channel_id,
                elapsed_secs: self.elapsed_secs,
                last_signed_amount: self.last_signed,
                stop,
            }
        });

        MeterHandle {
            channel_id,
            cancel,
            progress: progress_rx,
            task,
        }
    }
}

/// Control handle of a running meter
pub struct MeterHandle {
    channel_id: ChannelId,
    cancel: CancellationToken,
    progress: watch::Receiver<MeterProgress>,
    task: JoinHandle<MeterOutcome>,
}

impl MeterHandle {
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Stops the meter. Calling it again, or after the meter stopped on its
    /// own, has no effect.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn progress(&self) -> MeterProgress {
        *self.progress.borrow()
    }

    /// Waits for the meter task to end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MeterAborted`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<MeterOutcome> {
        let channel_id = self.channel_id;
        self.task.await.map_err(|err| Error::MeterAborted {
            channel_id,
            reason: err.to_string(),
        })
    }
}
