// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0
#![doc = include_str!("../README.md")]
//! ## Getting started
//!
//! Build a [`registry::ChannelRegistry`] over your [`adapters`], then start a
//! [`meter::PaymentMeter`] for each streaming session. Deposits go through
//! [`deposit::DepositManager`] and the receiver redeems with transactions from
//! [`settlement::SettlementCoordinator`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod adapters;
pub mod channel;
#[cfg(feature = "in_memory")]
pub mod context;
pub mod deposit;
mod error;
pub mod meter;
pub mod registry;
pub mod settlement;
pub mod transaction;
pub mod wallet;

pub use error::{Error, Result};

/// Seconds since the unix epoch; zero if the clock is before it.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Delays applied before each attempt of a retried ledger read.
///
/// The first delay is waited before the first attempt, so a schedule of
/// `[8s, 3s, 3s]` makes three reads at roughly 8, 11 and 14 seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// Channel discovery: read right away, then retry twice quickly.
    pub fn reconcile() -> Self {
        Self::new([
            Duration::ZERO,
            Duration::from_millis(250),
            Duration::from_secs(1),
        ])
    }

    /// Deposit confirmation: give the funding transaction time to validate.
    pub fn deposit() -> Self {
        Self::new([
            Duration::from_secs(8),
            Duration::from_secs(3),
            Duration::from_secs(3),
        ])
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::reconcile()
    }
}
