// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Deposits
//!
//! [`DepositManager`] builds funding transactions for the sender's wallet and
//! folds confirmed funding back into the registry. Funding is a two step
//! affair: [`DepositManager::request_funding`] hands out an unsigned
//! `PaymentChannelFund`, and once the wallet reports it submitted,
//! [`DepositManager::confirm_funding`] polls the ledger until the larger
//! deposit shows up.

use std::{collections::HashMap, sync::Arc};

use channel_claim::{
    amount::{AmountError, Drops},
    ChannelId, PublicKey,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    adapters::{ChannelStore, LedgerGateway, SubmitResult},
    channel::{Account, PaymentChannel},
    registry::ChannelRegistry,
    transaction::Transaction,
    Error, Result, RetrySchedule,
};

/// Largest gap between requested and observed increase that goes unreported.
pub const DEPOSIT_TOLERANCE: Drops = Drops::new(10);

pub const DEFAULT_EXPLORER_URL: &str = "https://testnet.xrpl.org";

/// Funding increase waiting for the sender's signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRequest {
    pub channel_id: ChannelId,
    pub additional: Drops,
    /// Deposit when the request was built
    pub previous_total: Drops,
    pub expected_total: Drops,
    pub transaction: Transaction,
}

#[derive(Debug, Clone)]
struct PendingFunding {
    request: FundingRequest,
    tx_hash: Option<String>,
}

pub struct DepositManager<S, L> {
    registry: Arc<ChannelRegistry<S, L>>,
    retry: RetrySchedule,
    explorer_url: String,
    pending: Mutex<HashMap<ChannelId, PendingFunding>>,
}

impl<S, L> DepositManager<S, L>
where
    S: ChannelStore,
    L: LedgerGateway,
{
    pub fn new(registry: Arc<ChannelRegistry<S, L>>) -> Self {
        Self {
            registry,
            retry: RetrySchedule::deposit(),
            explorer_url: DEFAULT_EXPLORER_URL.to_owned(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Base URL used for the manual recovery link in
    /// [`Error::DepositNotObserved`].
    pub fn with_explorer_url(mut self, explorer_url: impl Into<String>) -> Self {
        self.explorer_url = explorer_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Builds a `PaymentChannelCreate` for a brand new channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroFunding`] for an empty deposit.
    pub fn build_create(
        &self,
        sender: Account,
        receiver: Account,
        amount: Drops,
        settle_delay: u32,
        public_key: PublicKey,
    ) -> Result<Transaction> {
        if amount.is_zero() {
            return Err(Error::ZeroFunding);
        }
        Ok(Transaction::channel_create(
            sender,
            receiver,
            amount,
            settle_delay,
            public_key,
        ))
    }

    /// Builds a funding increase of `additional` drops for the sender to
    /// sign. The registry is left untouched until the funding is confirmed.
    ///
    /// A new request for the same channel replaces the previous one.
    pub async fn request_funding(
        &self,
        channel_id: &ChannelId,
        additional: Drops,
    ) -> Result<FundingRequest> {
        if additional.is_zero() {
            return Err(Error::ZeroFunding);
        }
        let channel = self.registry.get(channel_id).await?;
        if !channel.is_open() {
            self.pending.lock().await.remove(channel_id);
            return Err(Error::ChannelNotOpen {
                channel_id: *channel_id,
                status: channel.status,
            });
        }

        let expected_total = channel.amount.checked_add(additional).ok_or_else(|| {
            Error::Precision(AmountError::Overflow {
                value: format!("{} + {additional}", channel.amount),
            })
        })?;
        let request = FundingRequest {
            channel_id: *channel_id,
            additional,
            previous_total: channel.amount,
            expected_total,
            transaction: Transaction::channel_fund(channel.sender, *channel_id, additional),
        };

        self.pending.lock().await.insert(
            *channel_id,
            PendingFunding {
                request: request.clone(),
                tx_hash: None,
            },
        );
        info!("Funding of {additional} drops requested for channel {channel_id}");
        Ok(request)
    }

    /// Funding request still waiting for confirmation on `channel_id`.
    pub async fn pending_funding(&self, channel_id: &ChannelId) -> Option<FundingRequest> {
        self.pending
            .lock()
            .await
            .get(channel_id)
            .map(|funding| funding.request.clone())
    }

    /// Remembers the hash of the submitted funding transaction, used in the
    /// recovery link if the deposit is never observed.
    pub async fn attach_transaction(&self, channel_id: &ChannelId, tx_hash: String) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let funding = pending.get_mut(channel_id).ok_or(Error::NoPendingFunding {
            channel_id: *channel_id,
        })?;
        funding.tx_hash = Some(tx_hash);
        Ok(())
    }

    /// Submits a signed funding blob through the ledger gateway.
    ///
    /// Submission is never retried; a failure is returned as is.
    pub async fn submit_funding(&self, channel_id: &ChannelId, tx_blob: &str) -> Result<SubmitResult> {
        if !self.pending.lock().await.contains_key(channel_id) {
            return Err(Error::NoPendingFunding {
                channel_id: *channel_id,
            });
        }

        let result = self
            .registry
            .gateway()
            .submit(tx_blob)
            .await
            .map_err(|err| Error::LedgerGateway {
                source_error: anyhow::Error::new(err),
            })?;
        info!(
            "Funding for channel {channel_id} submitted as {} ({})",
            result.tx_hash, result.engine_result
        );
        self.attach_transaction(channel_id, result.tx_hash.clone())
            .await?;
        Ok(result)
    }

    /// Waits for the ledger to show a larger deposit and applies it.
    ///
    /// Reads follow the manager's retry schedule. The ledger total is applied
    /// as is; a gap of more than [`DEPOSIT_TOLERANCE`] against the requested
    /// increase is logged but accepted. Without a pending request, any
    /// increase over the cached deposit is accepted.
    ///
    /// # Errors
    ///
    /// - [`Error::DepositNotObserved`] once the schedule is used up; the
    ///   request stays pending so confirmation can be retried
    /// - [`Error::ChannelNotOpen`] if the channel is closing or closed, which
    ///   also discards the pending request
    pub async fn confirm_funding(&self, channel_id: &ChannelId) -> Result<PaymentChannel> {
        let channel = self.registry.get(channel_id).await?;
        if !channel.is_open() {
            self.pending.lock().await.remove(channel_id);
            return Err(Error::ChannelNotOpen {
                channel_id: *channel_id,
                status: channel.status,
            });
        }
        let pending = self.pending.lock().await.get(channel_id).cloned();
        let previous_total = pending
            .as_ref()
            .map_or(channel.amount, |funding| funding.request.previous_total);

        let mut last_observed = previous_total;
        for (attempt, delay) in self.retry.delays().iter().enumerate() {
            tokio::time::sleep(*delay).await;

            let ledger = match self.registry.gateway().channel(channel_id).await {
                Ok(Some(ledger)) => ledger,
                Ok(None) => {
                    debug!("Channel {channel_id} not found on ledger (attempt {})", attempt + 1);
                    continue;
                }
                Err(err) => {
                    warn!("Reading channel {channel_id} failed (attempt {}): {err}", attempt + 1);
                    continue;
                }
            };
            last_observed = ledger.amount;

            if ledger.amount <= previous_total {
                debug!(
                    "Channel {channel_id} deposit still {} drops (attempt {})",
                    ledger.amount,
                    attempt + 1
                );
                continue;
            }

            if let Some(funding) = &pending {
                let increase = ledger.amount.get() - previous_total.get();
                let deviation = increase.abs_diff(funding.request.additional.get());
                if deviation > DEPOSIT_TOLERANCE.get() {
                    warn!(
                        "Channel {channel_id} deposit grew by {increase} drops, {} were requested",
                        funding.request.additional
                    );
                }
            }

            let updated = self.registry.apply_deposit(channel_id, ledger.amount).await?;
            self.pending.lock().await.remove(channel_id);
            return Ok(updated);
        }

        Err(Error::DepositNotObserved {
            channel_id: *channel_id,
            last_observed,
            reference: self.reference(&channel, pending.as_ref()),
        })
    }

    fn reference(&self, channel: &PaymentChannel, pending: Option<&PendingFunding>) -> String {
        match pending.and_then(|funding| funding.tx_hash.as_deref()) {
            Some(hash) => format!("{}/transactions/{hash}", self.explorer_url),
            None => format!("{}/accounts/{}", self.explorer_url, channel.sender),
        }
    }
}
