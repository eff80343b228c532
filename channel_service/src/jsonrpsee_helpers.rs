// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Response envelope of the channel service.
//!
//! Every successful call answers `{ "data": ..., "warnings": [...] }`. A
//! warning never fails the call: `meter_start` still starts the meter when the
//! deposit is about to run out, and flags it with
//! [`JsonRpcWarningCode::LowBalance`].

use channel_claim::amount::Drops;
use channel_core::channel::PaymentChannel;
use serde::{Deserialize, Serialize};
use serde_json::{json, value::Value};

use crate::{
    error::ServiceError,
    error_codes::{JsonRpcErrorCode, JsonRpcWarningCode},
};

/// Non fatal condition attached to a successful response
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JsonRpcWarning {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JsonRpcResponse<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<JsonRpcWarning>>,
}

pub type JsonRpcError = jsonrpsee::types::ErrorObjectOwned;
pub type JsonRpcResult<T> = Result<JsonRpcResponse<T>, JsonRpcError>;

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn ok(data: T) -> Self {
        JsonRpcResponse {
            data,
            warnings: None,
        }
    }

    /// Attaches `warnings` to `data`. An empty list leaves the `warnings`
    /// field out of the response.
    pub fn warn(data: T, warnings: Vec<JsonRpcWarning>) -> Self {
        JsonRpcResponse {
            data,
            warnings: (!warnings.is_empty()).then_some(warnings),
        }
    }
}

impl JsonRpcWarning {
    pub fn new<S: Serialize>(code: JsonRpcWarningCode, message: String, data: Option<S>) -> Self {
        JsonRpcWarning {
            code: code as i32,
            message,
            data: data.and_then(|d| serde_json::to_value(&d).ok()),
        }
    }

    /// The remaining deposit of `channel` pays for less than a minute at
    /// `rate_per_minute`. Carries both figures in drops.
    pub fn low_balance(channel: &PaymentChannel, rate_per_minute: Drops) -> Self {
        let remaining = channel.remaining();
        JsonRpcWarning::new(
            JsonRpcWarningCode::LowBalance,
            format!(
                "Channel {} has {remaining} drops left, less than one minute at {rate_per_minute} drops per minute.",
                channel.channel_id,
            ),
            Some(json!({
                "remaining": remaining,
                "rate_per_minute": rate_per_minute,
            })),
        )
    }
}

/// Maps a service error onto a JSON-RPC error object.
pub fn error_object(err: ServiceError) -> JsonRpcError {
    let code: JsonRpcErrorCode = (&err).into();
    jsonrpsee::types::ErrorObject::owned(code as i32, err.to_string(), None::<()>)
}
