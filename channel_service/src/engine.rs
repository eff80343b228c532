// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wires the channel engine components together and keeps track of the
//! meters running in this process.

use std::{collections::HashMap, sync::Arc};

use channel_claim::{amount::Drops, ChannelId, ClaimSignature, ClaimSigner, ClaimVerifier, PublicKey};
use channel_core::{
    adapters::{ChannelStore, LedgerGateway, SubmitResult},
    channel::{Account, PaymentChannel, RoomId},
    deposit::{DepositManager, FundingRequest},
    meter::{MeterConfig, MeterHandle, MeterOutcome, MeterProgress, MeterStop, PaymentMeter, Resume},
    registry::ChannelRegistry,
    settlement::SettlementCoordinator,
    transaction::Transaction,
    Error,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{error::ServiceError, metrics};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Why a meter is no longer running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "message")]
pub enum StopReason {
    Stopped,
    InsufficientBalance(String),
    PaymentFailure(String),
}

impl From<&MeterStop> for StopReason {
    fn from(stop: &MeterStop) -> Self {
        match stop {
            MeterStop::Stopped => StopReason::Stopped,
            MeterStop::Failed(err @ Error::InsufficientBalance { .. }) => {
                StopReason::InsufficientBalance(err.to_string())
            }
            MeterStop::Failed(err) => StopReason::PaymentFailure(err.to_string()),
        }
    }
}

/// Final state of a meter run, enough to resume it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub channel_id: ChannelId,
    pub elapsed_secs: u64,
    pub last_signed_amount: Option<Drops>,
    pub stop: StopReason,
}

impl From<&MeterOutcome> for MeterSummary {
    fn from(outcome: &MeterOutcome) -> Self {
        Self {
            channel_id: outcome.channel_id,
            elapsed_secs: outcome.elapsed_secs,
            last_signed_amount: outcome.last_signed_amount,
            stop: StopReason::from(&outcome.stop),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterStatus {
    pub channel_id: ChannelId,
    pub running: bool,
    #[serde(flatten)]
    pub progress: MeterProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterStarted {
    pub channel: PaymentChannel,
    /// Remaining deposit covers less than one minute at the requested rate
    pub low_balance: bool,
}

pub struct Engine<S, L> {
    registry: Arc<ChannelRegistry<S, L>>,
    signer: Arc<ClaimSigner>,
    deposits: DepositManager<S, L>,
    meters: Mutex<HashMap<ChannelId, MeterHandle>>,
}

impl<S, L> Engine<S, L>
where
    S: ChannelStore + 'static,
    L: LedgerGateway + 'static,
{
    pub fn new(
        registry: Arc<ChannelRegistry<S, L>>,
        signer: Arc<ClaimSigner>,
        deposits: DepositManager<S, L>,
    ) -> Self {
        Self {
            registry,
            signer,
            deposits,
            meters: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry<S, L>> {
        &self.registry
    }

    pub fn public_key(&self) -> &PublicKey {
        self.signer.public_key()
    }

    pub async fn find_channel(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
    ) -> ServiceResult<Option<PaymentChannel>> {
        Ok(self
            .registry
            .find_or_reconcile(room_id, sender, receiver)
            .await?)
    }

    pub async fn channel(&self, channel_id: &ChannelId) -> ServiceResult<PaymentChannel> {
        Ok(self.registry.get(channel_id).await?)
    }

    /// Records a channel whose creation the ledger has confirmed.
    pub async fn register_channel(&self, channel: PaymentChannel) -> ServiceResult<PaymentChannel> {
        Ok(self.registry.register(channel).await?)
    }

    /// Builds a channel create transaction whose claims this engine will sign.
    pub fn build_create(
        &self,
        sender: Account,
        receiver: Account,
        amount: Drops,
        settle_delay: u32,
    ) -> ServiceResult<Transaction> {
        Ok(self.deposits.build_create(
            sender,
            receiver,
            amount,
            settle_delay,
            self.signer.public_key().clone(),
        )?)
    }

    pub async fn start_meter(
        &self,
        channel_id: ChannelId,
        rate_per_minute: Drops,
        resume: Resume,
    ) -> ServiceResult<MeterStarted> {
        let mut meters = self.meters.lock().await;
        if let Some(handle) = meters.get(&channel_id) {
            if !handle.is_finished() {
                return Err(ServiceError::MeterRunning { channel_id });
            }
        }
        if let Some(finished) = meters.remove(&channel_id) {
            reap(finished).await;
        }

        let config = MeterConfig::new(channel_id, rate_per_minute).with_resume(resume);
        let meter = PaymentMeter::new(self.registry.clone(), self.signer.clone(), config).await?;
        let channel = self.registry.get(&channel_id).await?;

        let handle = meter.start(|channel_id: &ChannelId| {
            metrics::INSUFFICIENT_BALANCE.inc();
            warn!("Channel {channel_id} ran out of deposit, halting the session");
        });
        meters.insert(channel_id, handle);
        metrics::METERS_STARTED.inc();

        Ok(MeterStarted {
            low_balance: channel.remaining() < rate_per_minute,
            channel,
        })
    }

    /// Stops the meter on `channel_id` and waits for its final state.
    ///
    /// A meter that already stopped on its own is reported the same way.
    pub async fn stop_meter(&self, channel_id: &ChannelId) -> ServiceResult<MeterSummary> {
        let handle = self
            .meters
            .lock()
            .await
            .remove(channel_id)
            .ok_or(ServiceError::MeterNotRunning {
                channel_id: *channel_id,
            })?;
        handle.stop();
        let outcome = handle.join().await?;
        record_outcome(&outcome);
        Ok(MeterSummary::from(&outcome))
    }

    pub async fn meter_status(&self, channel_id: &ChannelId) -> ServiceResult<MeterStatus> {
        let meters = self.meters.lock().await;
        let handle = meters.get(channel_id).ok_or(ServiceError::MeterNotRunning {
            channel_id: *channel_id,
        })?;
        Ok(MeterStatus {
            channel_id: *channel_id,
            running: !handle.is_finished(),
            progress: handle.progress(),
        })
    }

    /// Stops every meter, e.g. on shutdown.
    pub async fn stop_all(&self) -> Vec<MeterSummary> {
        let handles: Vec<_> = self.meters.lock().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.stop();
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join().await {
                Ok(outcome) => {
                    record_outcome(&outcome);
                    summaries.push(MeterSummary::from(&outcome));
                }
                Err(err) => warn!("{err}"),
            }
        }
        info!("Stopped {} meter(s)", summaries.len());
        summaries
    }

    /// Checks a claim against the public key recorded on the channel.
    pub async fn verify_claim(
        &self,
        channel_id: &ChannelId,
        amount: Drops,
        signature: &ClaimSignature,
    ) -> ServiceResult<bool> {
        let channel = self.registry.get(channel_id).await?;
        metrics::CLAIMS_VERIFIED.inc();
        Ok(ClaimVerifier::verify(
            channel_id,
            amount,
            signature,
            &channel.public_key,
        ))
    }

    pub async fn claim_transaction(&self, channel_id: &ChannelId) -> ServiceResult<Transaction> {
        let channel = self.registry.get(channel_id).await?;
        let tx = SettlementCoordinator.build_claim_transaction(&channel)?;
        metrics::SETTLEMENT_TRANSACTIONS.inc();
        Ok(tx)
    }

    pub async fn close_transaction(&self, channel_id: &ChannelId) -> ServiceResult<Transaction> {
        let channel = self.registry.get(channel_id).await?;
        let tx = SettlementCoordinator.build_close_transaction(&channel)?;
        metrics::SETTLEMENT_TRANSACTIONS.inc();
        Ok(tx)
    }

    pub async fn request_funding(
        &self,
        channel_id: &ChannelId,
        additional: Drops,
    ) -> ServiceResult<FundingRequest> {
        Ok(self.deposits.request_funding(channel_id, additional).await?)
    }

    pub async fn submit_funding(
        &self,
        channel_id: &ChannelId,
        tx_blob: &str,
    ) -> ServiceResult<SubmitResult> {
        Ok(self.deposits.submit_funding(channel_id, tx_blob).await?)
    }

    pub async fn confirm_funding(&self, channel_id: &ChannelId) -> ServiceResult<PaymentChannel> {
        match self.deposits.confirm_funding(channel_id).await {
            Ok(channel) => {
                metrics::FUNDING_CONFIRMED.inc();
                Ok(channel)
            }
            Err(err @ Error::DepositNotObserved { .. }) => {
                metrics::FUNDING_NOT_OBSERVED.inc();
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn record_outcome(outcome: &MeterOutcome) {
    if let MeterStop::Failed(err) = &outcome.stop {
        if !outcome.is_insufficient_balance() {
            metrics::METER_FAILURES.inc();
            warn!("Meter on channel {} had failed: {err}", outcome.channel_id);
        }
    }
}

async fn reap(handle: MeterHandle) {
    match handle.join().await {
        Ok(outcome) => record_outcome(&outcome),
        Err(err) => warn!("{err}"),
    }
}
