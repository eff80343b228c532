// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory adapter implementations.
//!
//! The ledger and wallet here are scriptable so tests can play out deposits,
//! closures, outages and user decisions without a network.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use channel_claim::{amount::Drops, ChannelId};
use thiserror::Error;

use crate::{
    adapters::*,
    channel::{Account, ChannelStatus, PaymentChannel, RoomId},
    transaction::Transaction,
};

pub type ChannelStorage = Arc<RwLock<HashMap<ChannelId, PaymentChannel>>>;
pub type LedgerStorage = Arc<RwLock<Vec<LedgerChannel>>>;

#[derive(Debug, Error)]
pub enum InMemoryError {
    #[error("something went wrong: {error}")]
    AdapterError { error: String },
}

fn adapter_error(error: impl Into<String>) -> InMemoryError {
    InMemoryError::AdapterError {
        error: error.into(),
    }
}

/// Channel records in a shared hash map
#[derive(Clone, Default)]
pub struct InMemoryChannelStore {
    channels: ChannelStorage,
}

impl InMemoryChannelStore {
    pub fn new(channels: ChannelStorage) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    type AdapterError = InMemoryError;

    async fn get(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<PaymentChannel>, Self::AdapterError> {
        Ok(self.channels.read().unwrap().get(channel_id).cloned())
    }

    async fn insert(&self, channel: PaymentChannel) -> Result<(), Self::AdapterError> {
        let mut channels = self.channels.write().unwrap();
        if channels.contains_key(&channel.channel_id) {
            return Err(adapter_error(format!(
                "channel {} already stored",
                channel.channel_id
            )));
        }
        channels.insert(channel.channel_id, channel);
        Ok(())
    }

    async fn update(&self, channel: PaymentChannel) -> Result<(), Self::AdapterError> {
        let mut channels = self.channels.write().unwrap();
        match channels.get_mut(&channel.channel_id) {
            Some(stored) => {
                *stored = channel;
                Ok(())
            }
            None => Err(adapter_error(format!(
                "channel {} not stored",
                channel.channel_id
            ))),
        }
    }

    async fn find_open(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Option<PaymentChannel>, Self::AdapterError> {
        let channels = self.channels.read().unwrap();
        Ok(channels
            .values()
            .filter(|channel| {
                channel.status == ChannelStatus::Open
                    && &channel.room_id == room_id
                    && &channel.sender == sender
                    && &channel.receiver == receiver
            })
            .min_by_key(|channel| (channel.created_at, channel.channel_id))
            .cloned())
    }

    async fn list_for_pair(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<PaymentChannel>, Self::AdapterError> {
        let channels = self.channels.read().unwrap();
        let mut found: Vec<PaymentChannel> = channels
            .values()
            .filter(|channel| &channel.sender == sender && &channel.receiver == receiver)
            .cloned()
            .collect();
        found.sort_by_key(|channel| (channel.created_at, channel.channel_id));
        Ok(found)
    }
}

/// A ledger that only knows about payment channels.
///
/// Channels are kept in creation order, which is the order
/// [`LedgerGateway::account_channels`] reports them in.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    channels: LedgerStorage,
    submitted: Arc<RwLock<Vec<String>>>,
    unavailable: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryLedger {
    pub fn new(channels: LedgerStorage) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    pub fn open_channel(&self, channel: LedgerChannel) {
        self.channels.write().unwrap().push(channel);
    }

    fn with_channel<T>(
        &self,
        channel_id: &ChannelId,
        f: impl FnOnce(&mut LedgerChannel) -> T,
    ) -> Result<T, InMemoryError> {
        let mut channels = self.channels.write().unwrap();
        channels
            .iter_mut()
            .find(|channel| &channel.channel_id == channel_id)
            .map(f)
            .ok_or_else(|| adapter_error(format!("channel {channel_id} not on ledger")))
    }

    /// Adds `additional` to the channel deposit.
    pub fn fund(&self, channel_id: &ChannelId, additional: Drops) -> Result<(), InMemoryError> {
        self.with_channel(channel_id, |channel| {
            channel.amount = Drops::new(channel.amount.get() + additional.get());
        })
    }

    /// Sets the amount already paid out, as a redeemed claim would.
    pub fn set_balance(&self, channel_id: &ChannelId, balance: Drops) -> Result<(), InMemoryError> {
        self.with_channel(channel_id, |channel| channel.balance = balance)
    }

    pub fn request_close(&self, channel_id: &ChannelId, expiration: u32) -> Result<(), InMemoryError> {
        self.with_channel(channel_id, |channel| channel.expiration = Some(expiration))
    }

    pub fn remove(&self, channel_id: &ChannelId) {
        self.channels
            .write()
            .unwrap()
            .retain(|channel| &channel.channel_id != channel_id);
    }

    /// Makes every read fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of read calls served or refused so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.read().unwrap().clone()
    }

    fn check_available(&self) -> Result<(), InMemoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            Err(adapter_error("ledger unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    type AdapterError = InMemoryError;

    async fn account_channels(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<LedgerChannel>, Self::AdapterError> {
        self.check_available()?;
        Ok(self
            .channels
            .read()
            .unwrap()
            .iter()
            .filter(|channel| &channel.account == sender && &channel.destination == receiver)
            .cloned()
            .collect())
    }

    async fn channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<LedgerChannel>, Self::AdapterError> {
        self.check_available()?;
        Ok(self
            .channels
            .read()
            .unwrap()
            .iter()
            .find(|channel| &channel.channel_id == channel_id)
            .cloned())
    }

    async fn submit(&self, tx_blob: &str) -> Result<SubmitResult, Self::AdapterError> {
        let mut submitted = self.submitted.write().unwrap();
        submitted.push(tx_blob.to_owned());
        Ok(SubmitResult {
            tx_hash: format!("{:064X}", submitted.len()),
            engine_result: "tesSUCCESS".to_owned(),
            accepted: true,
        })
    }
}

/// A wallet that answers polls from a script.
///
/// Each poll pops the next scripted answer; once the script runs out every
/// poll reports [`WalletStatus::Pending`].
#[derive(Clone, Default)]
pub struct InMemoryWallet {
    script: Arc<RwLock<VecDeque<Result<WalletStatus, String>>>>,
    requests: Arc<RwLock<Vec<Transaction>>>,
    polls: Arc<AtomicUsize>,
}

impl InMemoryWallet {
    pub fn new(script: impl IntoIterator<Item = Result<WalletStatus, String>>) -> Self {
        Self {
            script: Arc::new(RwLock::new(script.into_iter().collect())),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<Transaction> {
        self.requests.read().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for InMemoryWallet {
    type AdapterError = InMemoryError;

    async fn request_signature(
        &self,
        transaction: &Transaction,
    ) -> Result<SignRequestId, Self::AdapterError> {
        let mut requests = self.requests.write().unwrap();
        requests.push(transaction.clone());
        Ok(SignRequestId(format!("request-{}", requests.len())))
    }

    async fn poll(&self, _request: &SignRequestId) -> Result<WalletStatus, Self::AdapterError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.script.write().unwrap().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(error)) => Err(adapter_error(error)),
            None => Ok(WalletStatus::Pending),
        }
    }
}
