// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! [`LedgerGateway`] over a rippled node's JSON-RPC API.
//!
//! Channel reads always target the latest validated ledger so a deposit is
//! only observed once it can no longer be rolled back.

use std::time::Duration;

use async_trait::async_trait;
use channel_claim::{amount::Drops, ChannelId, PublicKey};
use channel_core::{
    adapters::{LedgerChannel, LedgerGateway, SubmitResult},
    channel::Account,
};
use jsonrpsee::{
    core::{client::ClientT, ClientError},
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

/// Page size requested from `account_channels`
const ACCOUNT_CHANNELS_LIMIT: u32 = 200;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum RippledError {
    #[error("Not connected to rippled, call connect() first")]
    NotConnected,

    #[error("Could not reach rippled: {0}")]
    Client(#[from] ClientError),

    #[error("rippled {method} failed with {error}: {message}")]
    Rpc {
        method: &'static str,
        error: String,
        message: String,
    },

    #[error("Malformed rippled {method} response: {reason}")]
    Malformed {
        method: &'static str,
        reason: String,
    },
}

pub struct RippledGateway {
    url: String,
    request_timeout: Duration,
    client: RwLock<Option<HttpClient>>,
}

impl RippledGateway {
    /// Creates a gateway for `url`. No connection is made until
    /// [`RippledGateway::connect`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client: RwLock::new(None),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Builds the HTTP client and checks the node answers `server_info`.
    pub async fn connect(&self) -> Result<(), RippledError> {
        let client: HttpClient = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(&self.url)?;

        let info: Value = call(&client, "server_info", json!({})).await?;
        let state = info
            .pointer("/info/server_state")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!("Connected to rippled at {} ({state})", self.url);

        *self.client.write().await = Some(client);
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.client.write().await.take().is_some() {
            info!("Disconnected from rippled at {}", self.url);
        }
    }

    async fn client(&self) -> Result<HttpClient, RippledError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(RippledError::NotConnected)
    }
}

async fn call<T: DeserializeOwned>(
    client: &HttpClient,
    method: &'static str,
    params: Value,
) -> Result<T, RippledError> {
    let response: Value = client.request(method, rpc_params![params]).await?;
    parse_result(method, response)
}

/// rippled reports failures inside `result` with `status: "error"`.
fn parse_result<T: DeserializeOwned>(method: &'static str, result: Value) -> Result<T, RippledError> {
    if result.get("status").and_then(Value::as_str) == Some("error") {
        let field = |name: &str| {
            result
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        return Err(RippledError::Rpc {
            method,
            error: field("error"),
            message: field("error_message"),
        });
    }
    serde_json::from_value(result).map_err(|err| RippledError::Malformed {
        method,
        reason: err.to_string(),
    })
}

fn parse_public_key(
    method: &'static str,
    public_key: Option<String>,
) -> Result<Option<PublicKey>, RippledError> {
    public_key
        .map(|hex| hex.parse())
        .transpose()
        .map_err(|err: channel_claim::KeyError| RippledError::Malformed {
            method,
            reason: err.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct AccountChannelsPage {
    channels: Vec<AccountChannel>,
    #[serde(default)]
    marker: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AccountChannel {
    channel_id: ChannelId,
    account: Account,
    destination_account: Account,
    amount: Drops,
    balance: Drops,
    #[serde(default)]
    public_key_hex: Option<String>,
    settle_delay: u32,
    #[serde(default)]
    expiration: Option<u32>,
    #[serde(default)]
    cancel_after: Option<u32>,
}

impl AccountChannel {
    fn into_ledger_channel(self) -> Result<LedgerChannel, RippledError> {
        Ok(LedgerChannel {
            public_key: parse_public_key("account_channels", self.public_key_hex)?,
            channel_id: self.channel_id,
            account: self.account,
            destination: self.destination_account,
            amount: self.amount,
            balance: self.balance,
            settle_delay: self.settle_delay,
            expiration: self.expiration,
            cancel_after: self.cancel_after,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LedgerEntry {
    index: ChannelId,
    node: PayChannelNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PayChannelNode {
    account: Account,
    destination: Account,
    amount: Drops,
    balance: Drops,
    #[serde(default)]
    public_key: Option<String>,
    settle_delay: u32,
    #[serde(default)]
    expiration: Option<u32>,
    #[serde(default)]
    cancel_after: Option<u32>,
}

fn parse_ledger_entry(result: Value) -> Result<Option<LedgerChannel>, RippledError> {
    let entry: LedgerEntry = match parse_result("ledger_entry", result) {
        Ok(entry) => entry,
        Err(RippledError::Rpc { error, .. }) if error == "entryNotFound" => return Ok(None),
        Err(err) => return Err(err),
    };
    let node = entry.node;
    Ok(Some(LedgerChannel {
        public_key: parse_public_key("ledger_entry", node.public_key)?,
        channel_id: entry.index,
        account: node.account,
        destination: node.destination,
        amount: node.amount,
        balance: node.balance,
        settle_delay: node.settle_delay,
        expiration: node.expiration,
        cancel_after: node.cancel_after,
    }))
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    engine_result: String,
    tx_json: SubmittedTx,
    #[serde(default)]
    accepted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SubmittedTx {
    hash: String,
}

fn parse_submit(result: Value) -> Result<SubmitResult, RippledError> {
    let response: SubmitResponse = parse_result("submit", result)?;
    let accepted = response.accepted.unwrap_or(matches!(
        response.engine_result.as_str(),
        "tesSUCCESS" | "terQUEUED"
    ));
    Ok(SubmitResult {
        tx_hash: response.tx_json.hash,
        engine_result: response.engine_result,
        accepted,
    })
}

#[async_trait]
impl LedgerGateway for RippledGateway {
    type AdapterError = RippledError;

    async fn account_channels(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<LedgerChannel>, Self::AdapterError> {
        let client = self.client().await?;
        let mut channels = Vec::new();
        let mut marker: Option<Value> = None;

        loop {
            let mut params = json!({
                "account": sender.as_str(),
                "destination_account": receiver.as_str(),
                "ledger_index": "validated",
                "limit": ACCOUNT_CHANNELS_LIMIT,
            });
            if let Some(marker) = marker.take() {
                params["marker"] = marker;
            }

            let page: AccountChannelsPage = call(&client, "account_channels", params).await?;
            for channel in page.channels {
                channels.push(channel.into_ledger_channel()?);
            }
            match page.marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!(
            "rippled reports {} channel(s) from {sender} to {receiver}",
            channels.len()
        );
        Ok(channels)
    }

    async fn channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<LedgerChannel>, Self::AdapterError> {
        let client = self.client().await?;
        let params = json!({
            "payment_channel": channel_id.to_string(),
            "ledger_index": "validated",
        });
        let response: Value = client
            .request("ledger_entry", rpc_params![params])
            .await?;
        parse_ledger_entry(response)
    }

    async fn submit(&self, tx_blob: &str) -> Result<SubmitResult, Self::AdapterError> {
        let client = self.client().await?;
        let response: Value = client
            .request("submit", rpc_params![json!({ "tx_blob": tx_blob })])
            .await?;
        let result = parse_submit(response)?;
        info!(
            "Submitted transaction {}: {}",
            result.tx_hash, result.engine_result
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use channel_claim::{ClaimSigner, KeyType};
    use rstest::*;

    use super::*;

    const SENDER: &str = "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn";
    const RECEIVER: &str = "rsA2LpzuawewSBQXkiju3YQTMzW13pAAdW";

    #[fixture]
    fn public_key() -> PublicKey {
        ClaimSigner::random(KeyType::Secp256k1).public_key().clone()
    }

    #[rstest]
    fn account_channels_page(public_key: PublicKey) {
        let result = json!({
            "account": SENDER,
            "channels": [{
                "account": SENDER,
                "amount": "1000000",
                "balance": "250000",
                "channel_id": "5DB01B7FFED6B67E6B0414DED11E051D2EE2B7619CE0EAA6286D67A3A4D5BDB3",
                "destination_account": RECEIVER,
                "public_key": "aB44YfzW24VDEJQ2UuLPV2PvqcPCSoLnL7y5M1EzhdW4LnK5xMS3",
                "public_key_hex": public_key.to_string(),
                "settle_delay": 86400,
                "expiration": 1_000_000
            }],
            "ledger_index": 71766314,
            "status": "success",
            "validated": true
        });

        let page: AccountChannelsPage = parse_result("account_channels", result).unwrap();
        assert!(page.marker.is_none());

        let channels: Vec<_> = page
            .channels
            .into_iter()
            .map(|channel| channel.into_ledger_channel().unwrap())
            .collect();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].account.as_str(), SENDER);
        assert_eq!(channels[0].destination.as_str(), RECEIVER);
        assert_eq!(channels[0].remaining(), Drops::new(750_000));
        assert_eq!(channels[0].public_key, Some(public_key));
        assert_eq!(channels[0].expiration, Some(1_000_000));
        assert_eq!(channels[0].cancel_after, None);
    }

    #[rstest]
    fn ledger_entry_pay_channel(public_key: PublicKey) {
        let result = json!({
            "index": "5DB01B7FFED6B67E6B0414DED11E051D2EE2B7619CE0EAA6286D67A3A4D5BDB3",
            "ledger_index": 71766314,
            "node": {
                "Account": SENDER,
                "Amount": "2000000",
                "Balance": "0",
                "Destination": RECEIVER,
                "Flags": 0,
                "LedgerEntryType": "PayChannel",
                "PublicKey": public_key.to_string(),
                "SettleDelay": 60
            },
            "status": "success",
            "validated": true
        });

        let channel = parse_ledger_entry(result).unwrap().unwrap();

        assert_eq!(channel.amount, Drops::new(2_000_000));
        assert_eq!(channel.balance, Drops::ZERO);
        assert_eq!(channel.settle_delay, 60);
        assert_eq!(channel.public_key, Some(public_key));
    }

    #[test]
    fn missing_ledger_entry_is_none() {
        let result = json!({
            "error": "entryNotFound",
            "error_message": "Entry not found.",
            "status": "error",
            "validated": true
        });

        assert!(parse_ledger_entry(result).unwrap().is_none());
    }

    #[test]
    fn other_rpc_errors_are_reported() {
        let result = json!({
            "error": "lgrNotFound",
            "error_message": "ledgerNotFound",
            "status": "error"
        });

        let err = parse_ledger_entry(result).unwrap_err();
        assert!(matches!(err, RippledError::Rpc { ref error, .. } if error == "lgrNotFound"));
    }

    #[rstest]
    #[case::applied(json!({"engine_result": "tesSUCCESS", "tx_json": {"hash": "AB"}}), true)]
    #[case::queued(json!({"engine_result": "terQUEUED", "tx_json": {"hash": "AB"}}), true)]
    #[case::rejected(json!({"engine_result": "tecNO_PERMISSION", "tx_json": {"hash": "AB"}}), false)]
    #[case::explicit(
        json!({"engine_result": "tefPAST_SEQ", "tx_json": {"hash": "AB"}, "accepted": true}),
        true
    )]
    fn submit_result(#[case] result: Value, #[case] accepted: bool) {
        let submitted = parse_submit(result).unwrap();

        assert_eq!(submitted.tx_hash, "AB");
        assert_eq!(submitted.accepted, accepted);
    }

    #[tokio::test]
    async fn calls_before_connect_fail() {
        let gateway = RippledGateway::new("http://127.0.0.1:5005");

        let result = gateway.channel(&ChannelId::new([1; 32])).await;

        assert!(matches!(result, Err(RippledError::NotConnected)));
        assert!(!gateway.is_connected().await);
    }
}
