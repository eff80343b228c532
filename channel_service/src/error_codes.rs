// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

/// JSON-RPC error codes specific to the channel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcErrorCode {
    /// -32001 -- Amount or identifier in the request could not be parsed.
    InvalidParams = -32001,
    /// -32002 -- Channel unknown to the registry.
    ChannelNotFound = -32002,
    /// -32003 -- Channel is closing or closed.
    ChannelNotOpen = -32003,
    /// -32004 -- Claim does not exceed the last signed amount, or exceeds the deposit.
    StaleClaim = -32004,
    /// -32005 -- Claim signature failed verification.
    InvalidSignature = -32005,
    /// -32006 -- Channel deposit is used up.
    InsufficientBalance = -32006,
    /// -32007 -- Funding not observed on ledger within the retry budget.
    DepositNotObserved = -32007,
    /// -32008 -- Channel has no signed claim to settle.
    NothingToClaim = -32008,
    /// -32009 -- Error talking to the ledger node.
    Ledger = -32009,
    /// -32010 -- Meter already running, or not running.
    MeterState = -32010,
    /// -32011 -- Any other engine failure.
    Engine = -32011,
}

/// JSON-RPC warning codes
/// These are not part of the JSON-RPC spec, but are used to provide additional information to the
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcWarningCode {
    /// -32101 -- Remaining deposit covers less than a minute at the requested rate.
    LowBalance = -32101,
}
