// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use channel_claim::{ClaimSigner, KeyType};
use channel_core::{
    context::memory::InMemoryChannelStore, deposit::DepositManager, registry::ChannelRegistry,
    RetrySchedule,
};
use channel_service::{engine::Engine, metrics, rippled::RippledGateway, server};
use clap::Parser;
use log::{debug, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for JSON-RPC requests.
    /// Defaults to 8080.
    #[arg(long, default_value_t = 8080, env = "CHANNEL_PORT")]
    port: u16,

    /// Secret key signing the off-ledger claims, as a hex string.
    #[arg(long, env = "CHANNEL_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: String,

    /// Algorithm of the signing secret, `secp256k1` or `ed25519`.
    #[arg(long, default_value_t = KeyType::Secp256k1, env = "CHANNEL_KEY_TYPE")]
    key_type: KeyType,

    /// JSON-RPC endpoint of the rippled node.
    #[arg(
        long,
        default_value = "https://s.altnet.rippletest.net:51234",
        env = "CHANNEL_RIPPLED_URL"
    )]
    rippled_url: String,

    /// Ledger explorer linked in unconfirmed deposit errors.
    #[arg(
        long,
        default_value = channel_core::deposit::DEFAULT_EXPLORER_URL,
        env = "CHANNEL_EXPLORER_URL"
    )]
    explorer_url: String,

    /// Metrics server port.
    /// Defaults to 5000.
    #[arg(long, default_value_t = 5000, env = "CHANNEL_METRICS_PORT")]
    metrics_port: u16,

    /// Maximum request body size in bytes.
    /// Defaults to 1MB.
    #[arg(long, default_value_t = 1024 * 1024, env = "CHANNEL_MAX_REQUEST_BODY_SIZE")]
    max_request_body_size: u32,

    /// Maximum response body size in bytes.
    /// Defaults to 100kB.
    #[arg(long, default_value_t = 100 * 1024, env = "CHANNEL_MAX_RESPONSE_BODY_SIZE")]
    max_response_body_size: u32,

    /// Maximum number of concurrent connections.
    /// Defaults to 32.
    #[arg(long, default_value_t = 32, env = "CHANNEL_MAX_CONNECTIONS")]
    max_connections: u32,

    /// Seconds waited before each ledger read when confirming a deposit.
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [8u64, 3, 3],
        env = "CHANNEL_DEPOSIT_RETRY_SECS"
    )]
    deposit_retry_secs: Vec<u64>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("key_type", &self.key_type)
            .field("rippled_url", &self.rippled_url)
            .field("explorer_url", &self.explorer_url)
            .field("metrics_port", &self.metrics_port)
            .field("max_request_body_size", &self.max_request_body_size)
            .field("max_response_body_size", &self.max_response_body_size)
            .field("max_connections", &self.max_connections)
            .field("deposit_retry_secs", &self.deposit_retry_secs)
            .finish_non_exhaustive()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger.
    // Set the log level by setting the RUST_LOG environment variable.
    // We prefer using tracing_subscriber as the logging backend because jsonrpsee
    // uses it, and it shows jsonrpsee log spans in the logs (to see client IP, etc).
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    debug!("Settings: {:?}", args);

    // Start the metrics server.
    // We just let it gracelessly get killed at the end of main()
    tokio::spawn(metrics::run_server(args.metrics_port));

    let signer = ClaimSigner::from_secret_hex(args.key_type, &args.signing_secret)
        .context("Invalid signing secret")?;
    info!("Claim signing key: {}", signer.public_key());

    let gateway = RippledGateway::new(&args.rippled_url);
    gateway
        .connect()
        .await
        .with_context(|| format!("Could not connect to rippled at {}", args.rippled_url))?;

    let registry = Arc::new(ChannelRegistry::new(
        InMemoryChannelStore::default(),
        gateway,
    ));
    let deposits = DepositManager::new(registry.clone())
        .with_retry(RetrySchedule::new(
            args.deposit_retry_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect::<Vec<_>>(),
        ))
        .with_explorer_url(&args.explorer_url);
    let engine = Arc::new(Engine::new(registry, Arc::new(signer), deposits));

    // Start the JSON-RPC server.
    // This await is non-blocking
    let (handle, _) = server::run_server(
        args.port,
        engine.clone(),
        args.max_request_body_size,
        args.max_response_body_size,
        args.max_connections,
    )
    .await?;
    info!("Server started. Listening on port {}.", args.port);

    let _ = handle.await;

    // If we're here, we've received a signal to exit.
    info!("Shutting down...");
    for summary in engine.stop_all().await {
        info!(
            "Meter on channel {} stopped at {}s, last claim {:?}",
            summary.channel_id, summary.elapsed_secs, summary.last_signed_amount
        );
    }
    engine.registry().gateway().disconnect().await;
    Ok(())
}
