// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Handle of a pending signature request in the external wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignRequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WalletStatus {
    Pending,
    /// Signed and submitted by the wallet
    Signed { tx_hash: String },
    Cancelled,
    Expired,
}

/// External wallet that asks a user to sign and submit a transaction.
///
/// Results are pulled by polling; see [crate::wallet::await_wallet_signature]
/// for the cancellable wait built on top of it.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from
    /// the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    async fn request_signature(
        &self,
        transaction: &Transaction,
    ) -> Result<SignRequestId, Self::AdapterError>;

    async fn poll(&self, request: &SignRequestId) -> Result<WalletStatus, Self::AdapterError>;
}
