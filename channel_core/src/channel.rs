// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Payment channel record
//!
//! The cached view of one ledger payment channel, bound to the room it pays
//! for. `amount` mirrors the on-ledger deposit while `last_amount` and
//! `last_signature` track off-ledger progress the ledger knows nothing about.
//!
//! Channels move `Open → Closing → Closed` and never back.

use std::{fmt, str::FromStr};

use channel_claim::{amount::Drops, ChannelId, Claim, ClaimSignature, PublicKey, SignedClaim};
use serde::{Deserialize, Serialize};

/// Identifier of the room a channel pays for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

const BASE58_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid ledger account address {value:?}")]
pub struct AccountError {
    pub value: String,
}

/// Classic ledger account address (`r...`).
///
/// Only the shape is validated here (prefix, length, alphabet); the ledger
/// rejects addresses with a bad checksum when a transaction is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Account {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.starts_with('r')
            && (25..=35).contains(&s.len())
            && s.chars().all(|c| BASE58_ALPHABET.contains(c));
        if well_formed {
            Ok(Self(s.to_owned()))
        } else {
            Err(AccountError {
                value: s.to_owned(),
            })
        }
    }
}

impl TryFrom<String> for Account {
    type Error = AccountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Open,
    Closing,
    Closed,
}

impl ChannelStatus {
    fn rank(self) -> u8 {
        match self {
            ChannelStatus::Open => 0,
            ChannelStatus::Closing => 1,
            ChannelStatus::Closed => 2,
        }
    }

    /// Whether `next` is reachable from `self`. Staying put counts.
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Open => f.write_str("OPEN"),
            ChannelStatus::Closing => f.write_str("CLOSING"),
            ChannelStatus::Closed => f.write_str("CLOSED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub channel_id: ChannelId,
    pub room_id: RoomId,
    pub sender: Account,
    pub receiver: Account,
    /// Total on-ledger deposit
    pub amount: Drops,
    /// Highest claim signed so far
    pub last_amount: Option<Drops>,
    /// Signature over `(channel_id, last_amount)`
    pub last_signature: Option<ClaimSignature>,
    pub public_key: PublicKey,
    pub status: ChannelStatus,
    /// Seconds the sender must wait after requesting closure
    pub settle_delay: u32,
    pub created_at: u64,
    pub updated_at: u64,
    pub closed_at: Option<u64>,
}

impl PaymentChannel {
    /// Deposit not yet covered by a signed claim.
    pub fn remaining(&self) -> Drops {
        self.amount
            .saturating_sub(self.last_amount.unwrap_or(Drops::ZERO))
    }

    pub fn is_open(&self) -> bool {
        self.status == ChannelStatus::Open
    }

    /// The claim a receiver would redeem right now, if any.
    pub fn latest_claim(&self) -> Option<SignedClaim> {
        match (self.last_amount, &self.last_signature) {
            (Some(amount), Some(signature)) => Some(SignedClaim {
                claim: Claim::new(self.channel_id, amount),
                signature: signature.clone(),
            }),
            _ => None,
        }
    }
}
