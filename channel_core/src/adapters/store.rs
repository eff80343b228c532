// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use channel_claim::ChannelId;

use crate::channel::{Account, PaymentChannel, RoomId};

/// Persists [`PaymentChannel`] records keyed by channel id.
///
/// The store is a cache subordinate to the ledger; all invariant checks
/// happen in [crate::registry::ChannelRegistry] before anything is written,
/// so implementations only need plain get/insert/update semantics.
///
/// # Example
///
/// For example code see [crate::context::memory::InMemoryChannelStore]
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Defines the user-specified error type.
    ///
    /// This error type should implement the `Error` and `Debug` traits from
    /// the standard library.
    /// Errors of this type are returned to the user when an operation fails.
    type AdapterError: std::error::Error + std::fmt::Debug + Send + Sync + 'static;

    async fn get(&self, channel_id: &ChannelId)
        -> Result<Option<PaymentChannel>, Self::AdapterError>;

    /// Inserts a record for a channel id the store has not seen before.
    async fn insert(&self, channel: PaymentChannel) -> Result<(), Self::AdapterError>;

    /// Replaces the record with the same channel id.
    async fn update(&self, channel: PaymentChannel) -> Result<(), Self::AdapterError>;

    /// Returns the open channel bound to `room_id` for this pair, if any.
    async fn find_open(
        &self,
        room_id: &RoomId,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Option<PaymentChannel>, Self::AdapterError>;

    /// Returns every record between the pair, any room and status.
    async fn list_for_pair(
        &self,
        sender: &Account,
        receiver: &Account,
    ) -> Result<Vec<PaymentChannel>, Self::AdapterError>;
}
