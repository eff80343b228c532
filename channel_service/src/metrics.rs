// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use log::{error, info};
use prometheus::{register_int_counter, IntCounter, TextEncoder};
use tokio::net::TcpListener;

// Register the metrics into the global metrics registry.
lazy_static! {
    pub static ref METERS_STARTED: IntCounter = register_int_counter!(
        "channel_meters_started_count",
        "Number of payment meters started."
    )
    .unwrap();
    pub static ref INSUFFICIENT_BALANCE: IntCounter = register_int_counter!(
        "channel_insufficient_balance_count",
        "Number of meters stopped because the channel deposit ran out."
    )
    .unwrap();
    pub static ref METER_FAILURES: IntCounter = register_int_counter!(
        "channel_meter_failure_count",
        "Number of meters stopped by a payment failure."
    )
    .unwrap();
    pub static ref CLAIMS_VERIFIED: IntCounter = register_int_counter!(
        "channel_claims_verified_count",
        "Number of claim verification requests answered."
    )
    .unwrap();
    pub static ref FUNDING_CONFIRMED: IntCounter = register_int_counter!(
        "channel_funding_confirmed_count",
        "Number of deposit increases observed on ledger."
    )
    .unwrap();
    pub static ref FUNDING_NOT_OBSERVED: IntCounter = register_int_counter!(
        "channel_funding_not_observed_count",
        "Number of funding confirmations that exhausted their retry budget."
    )
    .unwrap();
    pub static ref SETTLEMENT_TRANSACTIONS: IntCounter = register_int_counter!(
        "channel_settlement_transactions_count",
        "Number of claim or close transactions built."
    )
    .unwrap();
    pub static ref RPC_ERRORS: IntCounter = register_int_counter!(
        "channel_rpc_error_count",
        "Number of JSON-RPC requests answered with an error."
    )
    .unwrap();
}

async fn handler_metrics() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    match TextEncoder::new().encode_to_string(&metric_families) {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            error!("Error encoding metrics: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error encoding metrics: {err}"),
            )
        }
    }
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 Not Found")
}

/// Serves the process-wide prometheus registry at `/metrics`.
pub async fn run_server(port: u16) {
    let app = Router::new()
        .route("/metrics", get(handler_metrics))
        .fallback(handler_404);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind metrics server to {addr}: {err}");
            return;
        }
    };
    info!("Metrics server listening on {addr}");

    if let Err(err) = axum::serve(listener, app).await {
        error!("Metrics server error: {err}");
    }
}
