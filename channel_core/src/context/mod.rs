// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Context implementations.
//!
//! Contexts implement the [crate::adapters] traits. Currently there is only
//! the in-memory context, which keeps channels, ledger state and wallet
//! requests in hash maps and is meant for tests and local development.
pub mod memory;
