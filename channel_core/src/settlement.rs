// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Settlement
//!
//! Builds the `PaymentChannelClaim` transactions a receiver submits through
//! their own wallet to redeem the latest signed claim. Nothing here touches
//! the registry; once a claim is confirmed on ledger, refresh the channel
//! with [`crate::registry::ChannelRegistry::find_or_reconcile`].

use log::debug;

use crate::{
    channel::PaymentChannel,
    transaction::{ChannelClaim, Transaction, TF_CLOSE},
    Error, Result,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementCoordinator;

impl SettlementCoordinator {
    /// Claim transaction redeeming `channel.last_amount`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingToClaim`] if the channel has no signed claim.
    pub fn build_claim_transaction(&self, channel: &PaymentChannel) -> Result<Transaction> {
        self.build(channel, None)
    }

    /// Same as [`Self::build_claim_transaction`] with `tfClose` set, which
    /// closes the channel after redeeming.
    pub fn build_close_transaction(&self, channel: &PaymentChannel) -> Result<Transaction> {
        self.build(channel, Some(TF_CLOSE))
    }

    /// One close transaction per channel that has a signed claim. Channels
    /// without one are left out.
    pub fn build_batch_close_transactions<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a PaymentChannel>,
    ) -> Vec<Transaction> {
        channels
            .into_iter()
            .filter_map(|channel| match self.build_close_transaction(channel) {
                Ok(tx) => Some(tx),
                Err(err) => {
                    debug!("Skipping channel {}: {err}", channel.channel_id);
                    None
                }
            })
            .collect()
    }

    fn build(&self, channel: &PaymentChannel, flags: Option<u32>) -> Result<Transaction> {
        let claim = channel.latest_claim().ok_or(Error::NothingToClaim {
            channel_id: channel.channel_id,
        })?;

        Ok(Transaction::PaymentChannelClaim(ChannelClaim {
            account: channel.receiver.clone(),
            channel: channel.channel_id,
            balance: claim.claim.amount,
            amount: claim.claim.amount,
            signature: claim.signature,
            public_key: channel.public_key.clone(),
            flags,
        }))
    }
}
