// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use channel_claim::ChannelId;
use channel_core::Error as CoreError;
use thiserror::Error;

use crate::error_codes::JsonRpcErrorCode;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("A meter is already running on channel {channel_id}")]
    MeterRunning { channel_id: ChannelId },

    #[error("No meter is running on channel {channel_id}")]
    MeterNotRunning { channel_id: ChannelId },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

impl From<&ServiceError> for JsonRpcErrorCode {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Core(err) => core_error_code(err),
            ServiceError::MeterRunning { .. } | ServiceError::MeterNotRunning { .. } => {
                JsonRpcErrorCode::MeterState
            }
            ServiceError::InvalidParams(_) => JsonRpcErrorCode::InvalidParams,
        }
    }
}

fn core_error_code(err: &CoreError) -> JsonRpcErrorCode {
    match err {
        CoreError::Precision(_) | CoreError::ZeroFunding | CoreError::Signing(_) => {
            JsonRpcErrorCode::InvalidParams
        }
        CoreError::ChannelNotFound { .. } | CoreError::NoPendingFunding { .. } => {
            JsonRpcErrorCode::ChannelNotFound
        }
        CoreError::ChannelNotOpen { .. }
        | CoreError::ChannelAlreadyOpen { .. }
        | CoreError::InvalidTransition { .. } => JsonRpcErrorCode::ChannelNotOpen,
        CoreError::StaleClaim { .. } => JsonRpcErrorCode::StaleClaim,
        CoreError::InvalidSignature { .. } => JsonRpcErrorCode::InvalidSignature,
        CoreError::InsufficientBalance { .. } => JsonRpcErrorCode::InsufficientBalance,
        CoreError::DepositNotObserved { .. } => JsonRpcErrorCode::DepositNotObserved,
        CoreError::NothingToClaim { .. } => JsonRpcErrorCode::NothingToClaim,
        CoreError::LedgerGateway { .. } => JsonRpcErrorCode::Ledger,
        CoreError::PaymentFailure { source, .. } => core_error_code(source),
        CoreError::Store { .. }
        | CoreError::Wallet { .. }
        | CoreError::MeterAborted { .. }
        | CoreError::Cancelled => JsonRpcErrorCode::Engine,
    }
}
