// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Module containing the channel engine error type
//!

use channel_claim::{amount::AmountError, amount::Drops, ChannelId, KeyError};
use std::result::Result as StdResult;
use thiserror::Error as ThisError;

use crate::channel::{ChannelStatus, RoomId};

#[derive(ThisError, Debug)]
pub enum Error {
    /// Amount cannot be represented in drops. Rejected at the boundary.
    #[error(transparent)]
    Precision(#[from] AmountError),

    /// Proposed claim does not strictly exceed the last signed amount, or
    /// exceeds the deposit.
    #[error(
        "Stale claim on channel {channel_id}: proposed {proposed} drops, \
         last signed {last_amount:?}, deposit {deposit}"
    )]
    StaleClaim {
        channel_id: ChannelId,
        proposed: Drops,
        last_amount: Option<Drops>,
        deposit: Drops,
    },

    #[error("Claim signature for channel {channel_id} at {amount} drops failed verification")]
    InvalidSignature { channel_id: ChannelId, amount: Drops },

    #[error("Channel {channel_id} is {status}, only open channels accept writes")]
    ChannelNotOpen {
        channel_id: ChannelId,
        status: ChannelStatus,
    },

    #[error("Channel {channel_id} not found")]
    ChannelNotFound { channel_id: ChannelId },

    #[error("Room {room_id} already has open channel {existing}")]
    ChannelAlreadyOpen {
        room_id: RoomId,
        existing: ChannelId,
    },

    #[error("Channel {channel_id} cannot move from {from} to {to}")]
    InvalidTransition {
        channel_id: ChannelId,
        from: ChannelStatus,
        to: ChannelStatus,
    },

    /// Next owed amount would exceed the deposit. Recoverable by topping up.
    #[error(
        "Insufficient balance on channel {channel_id}: owed {owed} drops, deposit {deposit} drops"
    )]
    InsufficientBalance {
        channel_id: ChannelId,
        owed: Drops,
        deposit: Drops,
    },

    /// A claim could not be recorded; the metering session is over.
    #[error("Payment failed on channel {channel_id}: {source}")]
    PaymentFailure {
        channel_id: ChannelId,
        source: Box<Error>,
    },

    #[error(
        "Funding of channel {channel_id} not observed on ledger \
         (last observed {last_observed} drops), check {reference}"
    )]
    DepositNotObserved {
        channel_id: ChannelId,
        last_observed: Drops,
        reference: String,
    },

    #[error("No pending funding request for channel {channel_id}")]
    NoPendingFunding { channel_id: ChannelId },

    #[error("Funding amount must be greater than zero")]
    ZeroFunding,

    #[error("Channel {channel_id} has no signed claim to settle")]
    NothingToClaim { channel_id: ChannelId },

    #[error("Error from ledger gateway: {source_error}")]
    LedgerGateway { source_error: anyhow::Error },

    #[error("Error from channel store: {source_error}")]
    Store { source_error: anyhow::Error },

    #[error("Error from wallet signer: {source_error}")]
    Wallet { source_error: anyhow::Error },

    #[error(transparent)]
    Signing(#[from] KeyError),

    #[error("Payment meter task for channel {channel_id} aborted: {reason}")]
    MeterAborted { channel_id: ChannelId, reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = StdResult<T, Error>;
