// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use channel_claim::{amount::Drops, ChannelId, Claim, ClaimSignature, ClaimSigner, KeyType};
use channel_core::{
    adapters::LedgerChannel,
    channel::{Account, ChannelStatus, PaymentChannel, RoomId},
    context::memory::{InMemoryChannelStore, InMemoryLedger},
    deposit::DepositManager,
    registry::ChannelRegistry,
    RetrySchedule,
};

pub type Registry = ChannelRegistry<InMemoryChannelStore, InMemoryLedger>;
pub type Deposits = DepositManager<InMemoryChannelStore, InMemoryLedger>;

pub const SENDER: &str = "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn";
pub const RECEIVER: &str = "rsA2LpzuawewSBQXkiju3YQTMzW13pAAdW";

pub fn channel_id(byte: u8) -> ChannelId {
    ChannelId::new([byte; 32])
}

pub struct ChannelFixture {
    pub registry: Arc<Registry>,
    pub store: InMemoryChannelStore,
    pub ledger: InMemoryLedger,
    pub signer: Arc<ClaimSigner>,
    pub room_id: RoomId,
    pub sender: Account,
    pub receiver: Account,
}

impl ChannelFixture {
    pub fn new(key_type: KeyType) -> Self {
        let store = InMemoryChannelStore::default();
        let ledger = InMemoryLedger::default();
        let registry = ChannelRegistry::new(store.clone(), ledger.clone())
            .with_retry(RetrySchedule::new([Duration::ZERO; 3]));
        Self {
            registry: Arc::new(registry),
            store,
            ledger,
            signer: Arc::new(ClaimSigner::random(key_type)),
            room_id: RoomId::from("room-1"),
            sender: SENDER.parse().unwrap(),
            receiver: RECEIVER.parse().unwrap(),
        }
    }

    pub fn ledger_channel(&self, id: u8, amount: u64) -> LedgerChannel {
        LedgerChannel {
            channel_id: channel_id(id),
            account: self.sender.clone(),
            destination: self.receiver.clone(),
            amount: Drops::new(amount),
            balance: Drops::ZERO,
            public_key: Some(self.signer.public_key().clone()),
            settle_delay: 3_600,
            expiration: None,
            cancel_after: None,
        }
    }

    pub fn payment_channel(&self, id: u8, amount: u64) -> PaymentChannel {
        PaymentChannel {
            channel_id: channel_id(id),
            room_id: self.room_id.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            amount: Drops::new(amount),
            last_amount: None,
            last_signature: None,
            public_key: self.signer.public_key().clone(),
            status: ChannelStatus::Open,
            settle_delay: 3_600,
            created_at: 0,
            updated_at: 0,
            closed_at: None,
        }
    }

    /// Puts a channel on the ledger and registers it for the fixture's room.
    pub async fn open_channel(&self, id: u8, amount: u64) -> PaymentChannel {
        self.ledger.open_channel(self.ledger_channel(id, amount));
        self.registry
            .register(self.payment_channel(id, amount))
            .await
            .unwrap()
    }

    pub fn sign(&self, channel_id: &ChannelId, amount: u64) -> ClaimSignature {
        self.signer
            .sign(&Claim::new(*channel_id, Drops::new(amount)))
            .unwrap()
    }

    pub async fn claim(&self, channel_id: &ChannelId, amount: u64) -> PaymentChannel {
        self.registry
            .record_claim(channel_id, Drops::new(amount), self.sign(channel_id, amount))
            .await
            .unwrap()
    }
}
