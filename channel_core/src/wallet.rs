// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Waiting on an external wallet to sign a transaction.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{WalletSigner, WalletStatus},
    transaction::Transaction,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Wait before the first poll
    pub grace: Duration,
    pub poll_interval: Duration,
    /// Overall budget, grace included
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WalletOutcome {
    Signed { tx_hash: String },
    Cancelled,
    Expired,
    TimedOut,
}

/// Asks `wallet` to sign `transaction` and polls until the user acts.
///
/// Poll errors are logged and polling continues; only a failure to create
/// the request is returned as [`Error::Wallet`]. Cancelling `cancel` drops
/// the wait with [`Error::Cancelled`].
pub async fn await_wallet_signature<W>(
    wallet: &W,
    transaction: &Transaction,
    options: &WaitOptions,
    cancel: &CancellationToken,
) -> Result<WalletOutcome>
where
    W: WalletSigner + ?Sized,
{
    let request = wallet
        .request_signature(transaction)
        .await
        .map_err(|err| Error::Wallet {
            source_error: anyhow::Error::new(err),
        })?;
    debug!("Wallet sign request {} created", request.0);

    let poll = async {
        sleep(options.grace).await;
        loop {
            match wallet.poll(&request).await {
                Ok(WalletStatus::Pending) => {}
                Ok(WalletStatus::Signed { tx_hash }) => return WalletOutcome::Signed { tx_hash },
                Ok(WalletStatus::Cancelled) => return WalletOutcome::Cancelled,
                Ok(WalletStatus::Expired) => return WalletOutcome::Expired,
                Err(err) => warn!("Polling wallet request {} failed: {err}", request.0),
            }
            sleep(options.poll_interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = timeout(options.timeout, poll) => Ok(outcome.unwrap_or(WalletOutcome::TimedOut)),
    }
}
