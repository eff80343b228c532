// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use channel_claim::{amount::Drops, ChannelId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::channel::{Account, ChannelStatus};

/// A payment channel as the ledger currently reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerChannel {
    pub channel_id: ChannelId,
    /// Channel source (the paying sender)
    pub account: Account,
    /// Channel destination (the receiver)
    pub destination: Account,
    /// Total deposited
    pub amount: Drops,
    /// Total already paid out by redeemed claims
    pub balance: Drops,
    pub public_key: Option<PublicKey>,
    pub settle_delay: u32,
    /// Set once the sender has requested closure
    pub expiration: Option<u32>,
    pub cancel_after: Option<u32>,
}

impl LedgerChannel {
    /// Deposit not yet paid out on ledger.
    pub fn remaining(&self) -> Drops {
        self.amount.saturating_sub(self.balance)
    }

    pub fn status(&self) -> ChannelStatus {
        if self.expiration.is_some() {
            ChannelStatus::Closing
        } else {
            ChannelStatus::Open
        }
    }
}

/// Provisional result of submitting a signed transaction blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub tx_hash: String,
    /// Ledger engine result code, e.g. `tesSUCCESS`
    pub engine_result: String,
    /// Whether the transaction was applied or queued
    pub accepted: bool,
}

/// Reads channel state from, and submits transactions to, the ledger.
///
/// Every call is network I/O that may take seconds and may fail. The engine
/// retries reads where the operation allows it and never resubmits a
/// transaction on its own.
///
/// # Example
///
/// For example code see [crate::context::memory::InMemoryLedger]
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from
    /// the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    /// Lists the channels from `sender` to `receiver`, in ledger order.
    async fn account_channels(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<LedgerChannel>, Self::AdapterError>;

    /// Looks up one channel; `None` once it no longer exists on ledger.
    async fn channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<LedgerChannel>, Self::AdapterError>;

    /// Submits a signed transaction blob (hex).
    async fn submit(&self, tx_blob: &str) -> Result<SubmitResult, Self::AdapterError>;
}
