// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Collaborator adapters for the channel engine.
//!
//! The engine does not talk to the ledger, persist records or drive wallets
//! itself. Each of those is an adapter trait implemented by the user of the
//! library, so the engine can sit on top of any RPC client, database or
//! wallet integration. See [crate::context::memory] for in-memory versions.

mod ledger;
mod store;
mod wallet;

pub use ledger::{LedgerChannel, LedgerGateway, SubmitResult};
pub use store::ChannelStore;
pub use wallet::{SignRequestId, WalletSigner, WalletStatus};
