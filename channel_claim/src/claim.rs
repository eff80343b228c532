// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Channel claims
//!
//! A claim asserts the *cumulative* amount owed on a channel. Because the
//! signed payload is the absolute amount and not a delta, a claim supersedes
//! every lower claim for the same channel and the receiver only ever keeps
//! the highest one.
//!
//! The signed payload is the ledger's claim preimage:
//! `"CLM\0" || channel id (32 bytes) || amount in drops (u64, big endian)`.

use std::{fmt, str::FromStr};

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::{
    amount::Drops,
    channel_id::ChannelId,
    keys::{ClaimSigner, KeyError, PublicKey},
};

/// Hash prefix of payment channel claims ("CLM\0").
pub const CLAIM_PREFIX: [u8; 4] = *b"CLM\0";

/// Unsigned claim over `(channel_id, amount)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub channel_id: ChannelId,
    pub amount: Drops,
}

impl Claim {
    pub fn new(channel_id: ChannelId, amount: Drops) -> Self {
        Self { channel_id, amount }
    }

    /// Bytes that get signed.
    pub fn signing_payload(&self) -> [u8; 44] {
        let mut payload = [0u8; 44];
        payload[..4].copy_from_slice(&CLAIM_PREFIX);
        payload[4..36].copy_from_slice(self.channel_id.as_bytes());
        payload[36..].copy_from_slice(&self.amount.get().to_be_bytes());
        payload
    }

    /// SHA-512Half of the payload, the digest secp256k1 keys sign.
    pub fn signing_hash(&self) -> [u8; 32] {
        let digest = Sha512::digest(self.signing_payload());
        let mut half = [0u8; 32];
        half.copy_from_slice(&digest[..32]);
        half
    }
}

/// Raw claim signature bytes: DER for secp256k1, 64 bytes for ed25519.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClaimSignature(Vec<u8>);

impl ClaimSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ClaimSignature {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClaimSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for ClaimSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimSignature({self})")
    }
}

impl FromStr for ClaimSignature {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(Self)
    }
}

impl TryFrom<String> for ClaimSignature {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClaimSignature> for String {
    fn from(value: ClaimSignature) -> Self {
        value.to_string()
    }
}

/// Checks claim signatures against a channel's public key.
///
/// Pure and infallible: malformed signatures or keys simply fail
/// verification, so this is safe to run on untrusted input (for example a
/// receiver auditing a claim before submitting it).
pub struct ClaimVerifier;

impl ClaimVerifier {
    pub fn verify(
        channel_id: &ChannelId,
        amount: Drops,
        signature: &ClaimSignature,
        public_key: &PublicKey,
    ) -> bool {
        let claim = Claim::new(*channel_id, amount);
        match public_key {
            PublicKey::Secp256k1(key) => k256::ecdsa::Signature::from_der(signature.as_bytes())
                .map(|sig| key.verify_prehash(&claim.signing_hash(), &sig).is_ok())
                .unwrap_or(false),
            PublicKey::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature.as_bytes())
                .map(|sig| key.verify_strict(&claim.signing_payload(), &sig).is_ok())
                .unwrap_or(false),
        }
    }
}

/// A claim together with its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedClaim {
    pub claim: Claim,
    pub signature: ClaimSignature,
}

impl SignedClaim {
    /// Signs `claim` with `signer`
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Signing`] if the backend refuses to sign
    pub fn new(claim: Claim, signer: &ClaimSigner) -> Result<Self, KeyError> {
        let signature = signer.sign(&claim)?;
        Ok(Self { claim, signature })
    }

    pub fn verify(&self, public_key: &PublicKey) -> bool {
        ClaimVerifier::verify(
            &self.claim.channel_id,
            self.claim.amount,
            &self.signature,
            public_key,
        )
    }
}
