// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{error_handling::HandleError, routing::post_service, BoxError, Router};
use channel_claim::{
    amount::{to_drops, Drops},
    ChannelId, ClaimSignature, KeyType, PublicKey,
};
use channel_core::{
    adapters::{ChannelStore, LedgerGateway, SubmitResult},
    channel::{Account, PaymentChannel, RoomId},
    deposit::FundingRequest,
    meter::Resume,
    transaction::Transaction,
};
use hyper::StatusCode;
use jsonrpsee::{
    proc_macros::rpc,
    server::{stop_channel, ServerBuilder, ServerConfig, ServerHandle, TowerService},
};
use log::{error, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tower::layer::util::Identity;

pub use crate::jsonrpsee_helpers::JsonRpcResponse;
use crate::{
    engine::{Engine, MeterStatus, MeterSummary},
    error::ServiceError,
    jsonrpsee_helpers::{self, JsonRpcError, JsonRpcResult, JsonRpcWarning},
    metrics,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub key_type: KeyType,
    pub public_key: PublicKey,
}

/// Generates the `RpcServer` trait that is used to define the JSON-RPC API.
///
/// Note that because of the way the `rpc` macro works, we cannot document the RpcServer trait here.
/// As a result, we document the JSON-RPC API in the `channel_service/README.md` file.
/// Do not forget to update the documentation there if you make any changes to the JSON-RPC API.
#[rpc(server)]
pub trait Rpc {
    /// Returns the public key claims are signed with.
    #[method(name = "signer_info")]
    async fn signer_info(&self) -> JsonRpcResult<SignerInfo>;

    /// Finds the open channel paying for a room, reconciling against the ledger.
    #[method(name = "channel_find")]
    async fn channel_find(
        &self,
        room_id: RoomId,
        sender: Account,
        receiver: Account,
    ) -> JsonRpcResult<Option<PaymentChannel>>;

    #[method(name = "channel_get")]
    async fn channel_get(&self, channel_id: ChannelId) -> JsonRpcResult<PaymentChannel>;

    /// Builds the transaction opening a new channel with `amount` XRP.
    #[method(name = "channel_build_create")]
    async fn channel_build_create(
        &self,
        sender: Account,
        receiver: Account,
        amount: String,
        settle_delay: u32,
    ) -> JsonRpcResult<Transaction>;

    /// Starts metering a channel at `rate` XRP per minute.
    #[method(name = "meter_start")]
    async fn meter_start(
        &self,
        channel_id: ChannelId,
        rate: String,
        resume: Option<Resume>,
    ) -> JsonRpcResult<PaymentChannel>;

    #[method(name = "meter_stop")]
    async fn meter_stop(&self, channel_id: ChannelId) -> JsonRpcResult<MeterSummary>;

    #[method(name = "meter_status")]
    async fn meter_status(&self, channel_id: ChannelId) -> JsonRpcResult<MeterStatus>;

    /// Verifies a claim against the channel's recorded public key.
    #[method(name = "claim_verify")]
    async fn claim_verify(
        &self,
        channel_id: ChannelId,
        amount: Drops,
        signature: ClaimSignature,
    ) -> JsonRpcResult<bool>;

    #[method(name = "settlement_claim")]
    async fn settlement_claim(&self, channel_id: ChannelId) -> JsonRpcResult<Transaction>;

    #[method(name = "settlement_close")]
    async fn settlement_close(&self, channel_id: ChannelId) -> JsonRpcResult<Transaction>;

    /// Builds a funding increase of `amount` XRP for the sender to sign.
    #[method(name = "funding_request")]
    async fn funding_request(
        &self,
        channel_id: ChannelId,
        amount: String,
    ) -> JsonRpcResult<FundingRequest>;

    #[method(name = "funding_submit")]
    async fn funding_submit(
        &self,
        channel_id: ChannelId,
        tx_blob: String,
    ) -> JsonRpcResult<SubmitResult>;

    /// Waits for the pending funding of a channel to show up on ledger.
    #[method(name = "funding_confirm")]
    async fn funding_confirm(&self, channel_id: ChannelId) -> JsonRpcResult<PaymentChannel>;
}

struct RpcImpl<S, L> {
    engine: Arc<Engine<S, L>>,
}

fn rpc_error(err: impl Into<ServiceError>) -> JsonRpcError {
    metrics::RPC_ERRORS.inc();
    jsonrpsee_helpers::error_object(err.into())
}

/// Helper method that parses a decimal XRP amount into drops.
fn parse_xrp(value: &str) -> Result<Drops, JsonRpcError> {
    let xrp = Decimal::from_str(value).map_err(|err| {
        rpc_error(ServiceError::InvalidParams(format!(
            "{value:?} is not a decimal XRP amount: {err}"
        )))
    })?;
    to_drops(xrp).map_err(|err| rpc_error(channel_core::Error::from(err)))
}

#[async_trait]
impl<S, L> RpcServer for RpcImpl<S, L>
where
    S: ChannelStore + 'static,
    L: LedgerGateway + 'static,
{
    async fn signer_info(&self) -> JsonRpcResult<SignerInfo> {
        let public_key = self.engine.public_key().clone();
        Ok(JsonRpcResponse::ok(SignerInfo {
            key_type: public_key.key_type(),
            public_key,
        }))
    }

    async fn channel_find(
        &self,
        room_id: RoomId,
        sender: Account,
        receiver: Account,
    ) -> JsonRpcResult<Option<PaymentChannel>> {
        self.engine
            .find_channel(&room_id, &sender, &receiver)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn channel_get(&self, channel_id: ChannelId) -> JsonRpcResult<PaymentChannel> {
        self.engine
            .channel(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn channel_build_create(
        &self,
        sender: Account,
        receiver: Account,
        amount: String,
        settle_delay: u32,
    ) -> JsonRpcResult<Transaction> {
        let amount = parse_xrp(&amount)?;
        self.engine
            .build_create(sender, receiver, amount, settle_delay)
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn meter_start(
        &self,
        channel_id: ChannelId,
        rate: String,
        resume: Option<Resume>,
    ) -> JsonRpcResult<PaymentChannel> {
        let rate = parse_xrp(&rate)?;
        let started = self
            .engine
            .start_meter(channel_id, rate, resume.unwrap_or_default())
            .await
            .map_err(rpc_error)?;

        let mut warnings = Vec::new();
        if started.low_balance {
            warnings.push(JsonRpcWarning::low_balance(&started.channel, rate));
        }
        Ok(JsonRpcResponse::warn(started.channel, warnings))
    }

    async fn meter_stop(&self, channel_id: ChannelId) -> JsonRpcResult<MeterSummary> {
        self.engine
            .stop_meter(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn meter_status(&self, channel_id: ChannelId) -> JsonRpcResult<MeterStatus> {
        self.engine
            .meter_status(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn claim_verify(
        &self,
        channel_id: ChannelId,
        amount: Drops,
        signature: ClaimSignature,
    ) -> JsonRpcResult<bool> {
        self.engine
            .verify_claim(&channel_id, amount, &signature)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn settlement_claim(&self, channel_id: ChannelId) -> JsonRpcResult<Transaction> {
        self.engine
            .claim_transaction(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn settlement_close(&self, channel_id: ChannelId) -> JsonRpcResult<Transaction> {
        self.engine
            .close_transaction(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn funding_request(
        &self,
        channel_id: ChannelId,
        amount: String,
    ) -> JsonRpcResult<FundingRequest> {
        let amount = parse_xrp(&amount)?;
        self.engine
            .request_funding(&channel_id, amount)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn funding_submit(
        &self,
        channel_id: ChannelId,
        tx_blob: String,
    ) -> JsonRpcResult<SubmitResult> {
        self.engine
            .submit_funding(&channel_id, &tx_blob)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }

    async fn funding_confirm(&self, channel_id: ChannelId) -> JsonRpcResult<PaymentChannel> {
        self.engine
            .confirm_funding(&channel_id)
            .await
            .map(JsonRpcResponse::ok)
            .map_err(rpc_error)
    }
}

pub async fn run_server<S, L>(
    port: u16,
    engine: Arc<Engine<S, L>>,
    max_request_body_size: u32,
    max_response_body_size: u32,
    max_concurrent_connections: u32,
) -> Result<(JoinHandle<()>, SocketAddr)>
where
    S: ChannelStore + 'static,
    L: LedgerGateway + 'static,
{
    // Setting up the JSON RPC server
    let rpc_impl = RpcImpl { engine };
    let (json_rpc_service, _) = create_json_rpc_service(
        rpc_impl,
        max_request_body_size,
        max_response_body_size,
        max_concurrent_connections,
    )?;

    async fn handle_anyhow_error(err: BoxError) -> (StatusCode, String) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {err}"),
        )
    }
    let router = Router::new().route_service(
        "/",
        HandleError::new(post_service(json_rpc_service), handle_anyhow_error),
    );

    // Create a `TcpListener` using tokio.
    let listener = TcpListener::bind(&format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("Failed to bind to channel service port {port}"))?;

    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_handler())
            .await
        {
            error!("Channel service error: {e}");
        }
    });

    Ok((handle, addr))
}

/// Graceful shutdown handler
async fn shutdown_handler() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Signal received, starting graceful shutdown");
}

fn create_json_rpc_service<S, L>(
    rpc_impl: RpcImpl<S, L>,
    max_request_body_size: u32,
    max_response_body_size: u32,
    max_concurrent_connections: u32,
) -> Result<(TowerService<Identity, Identity>, ServerHandle)>
where
    S: ChannelStore + 'static,
    L: LedgerGateway + 'static,
{
    let config = ServerConfig::builder()
        .max_request_body_size(max_request_body_size)
        .max_response_body_size(max_response_body_size)
        .max_connections(max_concurrent_connections)
        .http_only()
        .build();

    let service_builder = ServerBuilder::new().set_config(config).to_service_builder();
    let (stop_handle, server_handle) = stop_channel();
    let handle = service_builder.build(rpc_impl.into_rpc(), stop_handle);
    Ok((handle, server_handle))
}
