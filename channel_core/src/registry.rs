// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Channel registry
//!
//! [`ChannelRegistry`] owns every write to [`PaymentChannel`] records. It
//! reconciles the cached view against the ledger on read and is the only
//! place the claim invariants are enforced on write:
//!
//! - a recorded claim strictly exceeds the previous one and never exceeds the
//!   deposit,
//! - its signature verifies against the channel's public key,
//! - only `Open` channels accept claims or deposits.
//!
//! Writes to one channel are serialized by a per-channel mutex, so a meter
//! tick racing a deposit confirmation can never let a lower amount overwrite
//! a higher one.

use std::{collections::HashMap, sync::Arc};

use channel_claim::{amount::Drops, ChannelId, ClaimSignature, ClaimVerifier};
use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    adapters::{ChannelStore, LedgerChannel, LedgerGateway},
    channel::{Account, ChannelStatus, PaymentChannel, RoomId},
    now_secs, Error, Result, RetrySchedule,
};

pub struct ChannelRegistry<S, L> {
    store: S,
    gateway: L,
    retry: RetrySchedule,
    locks: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

fn store_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Store {
        source_error: anyhow::Error::new(err),
    }
}

impl<S, L> ChannelRegistry<S, L>
where
    S: ChannelStore,
    L: LedgerGateway,
{
    pub fn new(store: S, gateway: L) -> Self {
        Self {
            store,
            gateway,
            retry: RetrySchedule::reconcile(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the retry schedule used for ledger reads during
    /// reconciliation.
    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    pub fn gateway(&self) -> &L {
        &self.gateway
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn lock(&self, channel_id: &ChannelId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(*channel_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn load(&self, channel_id: &ChannelId) -> Result<PaymentChannel> {
        self.store
            .get(channel_id)
            .await
            .map_err(store_error)?
            .ok_or(Error::ChannelNotFound {
                channel_id: *channel_id,
            })
    }

    /// Returns the cached record for `channel_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if the channel was never registered
    /// or reconciled.
    pub async fn get(&self, channel_id: &ChannelId) -> Result<PaymentChannel> {
        self.load(channel_id).await
    }

    /// Inserts a freshly funded channel for `channel.room_id`.
    ///
    /// The record starts `Open` with no claims. A record that already exists
    /// for the same id is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelAlreadyOpen`] if the room already has an open
    /// channel with deposit left for this pair.
    pub async fn register(&self, mut channel: PaymentChannel) -> Result<PaymentChannel> {
        let _guard = self.lock(&channel.channel_id).await;

        if let Some(existing) = self
            .store
            .get(&channel.channel_id)
            .await
            .map_err(store_error)?
        {
            return Ok(existing);
        }

        if let Some(open) = self
            .store
            .find_open(&channel.room_id, &channel.sender, &channel.receiver)
            .await
            .map_err(store_error)?
        {
            if !open.remaining().is_zero() {
                return Err(Error::ChannelAlreadyOpen {
                    room_id: channel.room_id,
                    existing: open.channel_id,
                });
            }
        }

        let now = now_secs();
        channel.last_amount = None;
        channel.last_signature = None;
        channel.status = ChannelStatus::Open;
        channel.created_at = now;
        channel.updated_at = now;
        channel.closed_at = None;

        self.store
            .insert(channel.clone())
            .await
            .map_err(store_error)?;
        info!(
            "Registered channel {} for room {} with deposit {} drops",
            channel.channel_id, channel.room_id, channel.amount
        );
        Ok(channel)
    }

    /// Finds the channel that pays for `room_id`, reconciling the cache with
    /// the ledger first.
    ///
    /// Ledger reads are retried on the registry's schedule. When the ledger
    /// cannot be reached or reports no channels, the cached open record for
    /// the room is used instead. Either way a channel whose deposit is fully
    /// claimed is treated as absent so the caller funds a new one.
    pub async fn find_or_reconcile(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Option<PaymentChannel>> {
        match self.ledger_channels(sender, receiver).await {
            Ok(channels) if !channels.is_empty() => {
                self.reconcile(room_id, sender, receiver, channels).await
            }
            Ok(_) => {
                debug!("Ledger reports no channels from {sender} to {receiver}, using cache");
                self.cached_open(room_id, sender, receiver).await
            }
            Err(err) => {
                warn!("Channel lookup for room {room_id} failed, using cache: {err}");
                self.cached_open(room_id, sender, receiver).await
            }
        }
    }

    async fn ledger_channels(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<LedgerChannel>> {
        let mut last_error = None;
        for (attempt, delay) in self.retry.delays().iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            match self.gateway.account_channels(sender, receiver).await {
                Ok(channels) => return Ok(channels),
                Err(err) => {
                    debug!("Ledger read attempt {} failed: {err}", attempt + 1);
                    last_error = Some(err);
                }
            }
        }
        Err(Error::LedgerGateway {
            source_error: match last_error {
                Some(err) => anyhow::Error::new(err),
                None => anyhow::anyhow!("retry schedule allows no attempts"),
            },
        })
    }

    async fn cached_open(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Option<PaymentChannel>> {
        let cached = self
            .store
            .find_open(room_id, sender, receiver)
            .await
            .map_err(store_error)?;
        Ok(cached.filter(|channel| !channel.remaining().is_zero()))
    }

    async fn reconcile(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
        ledger: Vec<LedgerChannel>,
    ) -> Result<Option<PaymentChannel>> {
        let cached = self
            .store
            .list_for_pair(sender, receiver)
            .await
            .map_err(store_error)?;
        let on_ledger = |channel_id: &ChannelId| ledger.iter().any(|c| &c.channel_id == channel_id);

        for record in &cached {
            if !on_ledger(&record.channel_id) && record.status != ChannelStatus::Closed {
                info!(
                    "Channel {} no longer exists on ledger, marking closed",
                    record.channel_id
                );
                self.mark_closed(&record.channel_id).await?;
            }
        }

        let cached_record =
            |channel_id: &ChannelId| cached.iter().find(|record| &record.channel_id == channel_id);

        // Close requests seen on the ledger still reach the cache.
        for closing in ledger
            .iter()
            .filter(|c| c.status() != ChannelStatus::Open)
        {
            if cached_record(&closing.channel_id).is_some() {
                self.upsert(room_id, closing).await?;
            }
        }

        // A ledger channel is usable when it is open, has unredeemed deposit
        // and a known signing key, and is either unbound or bound to this room
        // with deposit left after our own claims.
        let usable: Vec<&LedgerChannel> = ledger
            .iter()
            .filter(|c| c.status() == ChannelStatus::Open)
            .filter(|c| !c.remaining().is_zero() && c.public_key.is_some())
            .filter(|c| {
                cached_record(&c.channel_id).map_or(true, |record| {
                    &record.room_id == room_id
                        && record.is_open()
                        && !record.remaining().is_zero()
                })
            })
            .collect();

        let bound_to_room = usable
            .iter()
            .find(|c| cached_record(&c.channel_id).is_some());
        let Some(active) = bound_to_room.or(usable.first()).copied() else {
            debug!("No usable ledger channel from {sender} to {receiver} for room {room_id}");
            return Ok(None);
        };

        let channel = self.upsert(room_id, active).await?;

        if let Some(previous) = cached.iter().find(|record| {
            &record.room_id == room_id
                && record.channel_id != channel.channel_id
                && on_ledger(&record.channel_id)
                && record.is_open()
                && record.remaining().is_zero()
        }) {
            self.mark_closing(&previous.channel_id).await?;
        }

        Ok(channel.is_open().then_some(channel))
    }

    /// Writes ledger facts into the cache. Never touches claim fields.
    async fn upsert(&self, room_id: &RoomId, ledger: &LedgerChannel) -> Result<PaymentChannel> {
        let _guard = self.lock(&ledger.channel_id).await;
        let now = now_secs();

        match self
            .store
            .get(&ledger.channel_id)
            .await
            .map_err(store_error)?
        {
            Some(mut channel) => {
                let mut changed = false;
                if ledger.amount > channel.amount {
                    debug!(
                        "Channel {} deposit on ledger is {} drops, cache had {}",
                        channel.channel_id, ledger.amount, channel.amount
                    );
                    channel.amount = ledger.amount;
                    changed = true;
                }
                let status = ledger.status();
                if status != channel.status && channel.status.can_transition_to(status) {
                    channel.status = status;
                    changed = true;
                }
                if changed {
                    channel.updated_at = now;
                    self.store
                        .update(channel.clone())
                        .await
                        .map_err(store_error)?;
                }
                Ok(channel)
            }
            None => {
                let Some(public_key) = ledger.public_key.clone() else {
                    return Err(Error::ChannelNotFound {
                        channel_id: ledger.channel_id,
                    });
                };
                let channel = PaymentChannel {
                    channel_id: ledger.channel_id,
                    room_id: room_id.clone(),
                    sender: ledger.account.clone(),
                    receiver: ledger.destination.clone(),
                    amount: ledger.amount,
                    last_amount: None,
                    last_signature: None,
                    public_key,
                    status: ledger.status(),
                    settle_delay: ledger.settle_delay,
                    created_at: now,
                    updated_at: now,
                    closed_at: None,
                };
                self.store
                    .insert(channel.clone())
                    .await
                    .map_err(store_error)?;
                info!(
                    "Discovered channel {} on ledger for room {room_id}",
                    channel.channel_id
                );
                Ok(channel)
            }
        }
    }

    /// Records a signed claim for `amount`, the new cumulative total owed.
    ///
    /// This is the only write path for `last_amount`/`last_signature`; both
    /// are replaced together or not at all.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotOpen`] if the channel is closing or closed
    /// - [`Error::StaleClaim`] if `amount` does not exceed the last signed
    ///   amount or exceeds the deposit
    /// - [`Error::InvalidSignature`] if `signature` does not verify against
    ///   the channel's public key
    pub async fn record_claim(
        &self,
        channel_id: &ChannelId,
        amount: Drops,
        signature: ClaimSignature,
    ) -> Result<PaymentChannel> {
        let _guard = self.lock(channel_id).await;
        let mut channel = self.load(channel_id).await?;

        if !channel.is_open() {
            return Err(Error::ChannelNotOpen {
                channel_id: *channel_id,
                status: channel.status,
            });
        }

        let baseline = channel.last_amount.unwrap_or(Drops::ZERO);
        if amount <= baseline || amount > channel.amount {
            return Err(Error::StaleClaim {
                channel_id: *channel_id,
                proposed: amount,
                last_amount: channel.last_amount,
                deposit: channel.amount,
            });
        }

        if !ClaimVerifier::verify(channel_id, amount, &signature, &channel.public_key) {
            return Err(Error::InvalidSignature {
                channel_id: *channel_id,
                amount,
            });
        }

        channel.last_amount = Some(amount);
        channel.last_signature = Some(signature);
        channel.updated_at = now_secs();
        self.store
            .update(channel.clone())
            .await
            .map_err(store_error)?;

        debug!("Channel {channel_id} claim raised to {amount} drops");
        Ok(channel)
    }

    /// Raises the channel deposit to `new_total`. Lower totals are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotOpen`] unless the channel is open.
    pub async fn apply_deposit(
        &self,
        channel_id: &ChannelId,
        new_total: Drops,
    ) -> Result<PaymentChannel> {
        let _guard = self.lock(channel_id).await;
        let mut channel = self.load(channel_id).await?;

        if !channel.is_open() {
            return Err(Error::ChannelNotOpen {
                channel_id: *channel_id,
                status: channel.status,
            });
        }

        if new_total <= channel.amount {
            debug!(
                "Ignoring deposit total {new_total} for channel {channel_id}, already at {}",
                channel.amount
            );
            return Ok(channel);
        }

        info!(
            "Channel {channel_id} deposit raised from {} to {new_total} drops",
            channel.amount
        );
        channel.amount = new_total;
        channel.updated_at = now_secs();
        self.store
            .update(channel.clone())
            .await
            .map_err(store_error)?;
        Ok(channel)
    }

    pub async fn mark_closing(&self, channel_id: &ChannelId) -> Result<PaymentChannel> {
        self.transition(channel_id, ChannelStatus::Closing).await
    }

    /// Moves the channel to `Closed` and stamps `closed_at`.
    pub async fn mark_closed(&self, channel_id: &ChannelId) -> Result<PaymentChannel> {
        self.transition(channel_id, ChannelStatus::Closed).await
    }

    async fn transition(&self, channel_id: &ChannelId, to: ChannelStatus) -> Result<PaymentChannel> {
        let _guard = self.lock(channel_id).await;
        let mut channel = self.load(channel_id).await?;

        if !channel.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                channel_id: *channel_id,
                from: channel.status,
                to,
            });
        }
        if channel.status == to {
            return Ok(channel);
        }

        let now = now_secs();
        channel.status = to;
        channel.updated_at = now;
        if to == ChannelStatus::Closed {
            channel.closed_at = Some(now);
        }
        self.store
            .update(channel.clone())
            .await
            .map_err(store_error)?;
        if to == ChannelStatus::Closed {
            self.locks.lock().await.remove(channel_id);
        }
        info!("Channel {channel_id} is now {to}");
        Ok(channel)
    }
}
