// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Ledger transactions
//!
//! Unsigned payment channel transactions built by the engine and handed to an
//! external wallet for signing. Field names follow the ledger's JSON format so
//! a wallet can consume the serialized value as is.

use channel_claim::{amount::Drops, ChannelId, ClaimSignature, PublicKey};
use serde::{Deserialize, Serialize};

use crate::channel::Account;

/// `tfClose`: close the channel after processing the claim.
pub const TF_CLOSE: u32 = 0x0002_0000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "TransactionType")]
pub enum Transaction {
    PaymentChannelCreate(ChannelCreate),
    PaymentChannelFund(ChannelFund),
    PaymentChannelClaim(ChannelClaim),
}

/// Opens a channel from `account` to `destination` with an initial deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelCreate {
    pub account: Account,
    pub destination: Account,
    pub amount: Drops,
    pub settle_delay: u32,
    pub public_key: PublicKey,
}

/// Adds `amount` to an existing channel's deposit. Sender authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelFund {
    pub account: Account,
    pub channel: ChannelId,
    pub amount: Drops,
}

/// Redeems a signed claim. `balance` and `amount` both carry the claimed
/// cumulative total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelClaim {
    pub account: Account,
    pub channel: ChannelId,
    pub balance: Drops,
    pub amount: Drops,
    pub signature: ClaimSignature,
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
}

impl ChannelClaim {
    pub fn closes_channel(&self) -> bool {
        self.flags.is_some_and(|flags| flags & TF_CLOSE != 0)
    }
}

impl Transaction {
    pub fn channel_create(
        account: Account,
        destination: Account,
        amount: Drops,
        settle_delay: u32,
        public_key: PublicKey,
    ) -> Self {
        Transaction::PaymentChannelCreate(ChannelCreate {
            account,
            destination,
            amount,
            settle_delay,
            public_key,
        })
    }

    pub fn channel_fund(account: Account, channel: ChannelId, amount: Drops) -> Self {
        Transaction::PaymentChannelFund(ChannelFund {
            account,
            channel,
            amount,
        })
    }

    /// Account expected to sign the transaction
    pub fn account(&self) -> &Account {
        match self {
            Transaction::PaymentChannelCreate(tx) => &tx.account,
            Transaction::PaymentChannelFund(tx) => &tx.account,
            Transaction::PaymentChannelClaim(tx) => &tx.account,
        }
    }
}
