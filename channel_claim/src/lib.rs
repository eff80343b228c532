// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Payment channel claims
//!
//! Leaf crate of the channel engine: drop amounts, channel identifiers, claim
//! keys, and the signing and verification of off-ledger claims.
//!
//! # Example
//! ```rust
//! use channel_claim::{
//!     amount::Drops, Claim, ClaimSigner, ClaimVerifier, ChannelId, KeyType, SignedClaim,
//! };
//!
//! let signer = ClaimSigner::random(KeyType::Secp256k1);
//! let channel_id = ChannelId::new([0x11; 32]);
//!
//! let signed = SignedClaim::new(Claim::new(channel_id, Drops::new(750_000)), &signer).unwrap();
//! assert!(ClaimVerifier::verify(
//!     &channel_id,
//!     Drops::new(750_000),
//!     &signed.signature,
//!     signer.public_key(),
//! ));
//! ```

pub mod amount;
mod channel_id;
mod claim;
mod keys;

pub use channel_id::{ChannelId, ChannelIdError};
pub use claim::{Claim, ClaimSignature, ClaimVerifier, SignedClaim, CLAIM_PREFIX};
pub use keys::{ClaimSigner, KeyError, KeyType, PublicKey};
