// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod engine;
pub mod error;
pub mod error_codes;
pub mod jsonrpsee_helpers;
pub mod metrics;
pub mod rippled;
pub mod server;
