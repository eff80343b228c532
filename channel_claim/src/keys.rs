// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Claim keys
//!
//! The ledger accepts channel claims signed with either secp256k1 or ed25519
//! keys. Public keys use the ledger's 33-byte encoding: a compressed SEC1
//! point for secp256k1, or `0xED` followed by the 32-byte key for ed25519.

use std::{fmt, str::FromStr};

use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::claim::{Claim, ClaimSignature};

const ED25519_PREFIX: u8 = 0xED;

#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidSecret(String),
    #[error("invalid public key {value:?}")]
    InvalidPublicKey { value: String },
    #[error("unknown key type {0:?}")]
    UnknownKeyType(String),
    #[error(transparent)]
    Signing(#[from] k256::ecdsa::Error),
}

/// Signature algorithm of a claim key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Secp256k1,
    Ed25519,
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(KeyType::Secp256k1),
            "ed25519" => Ok(KeyType::Ed25519),
            other => Err(KeyError::UnknownKeyType(other.to_owned())),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Secp256k1 => f.write_str("secp256k1"),
            KeyType::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Public half of a claim key, as recorded on the channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PublicKey {
    Secp256k1(k256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Secp256k1(_) => KeyType::Secp256k1,
            PublicKey::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Ledger encoding of the key (33 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Secp256k1(key) => key.to_encoded_point(true).as_bytes().to_vec(),
            PublicKey::Ed25519(key) => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(ED25519_PREFIX);
                bytes.extend_from_slice(key.as_bytes());
                bytes
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let invalid = || KeyError::InvalidPublicKey {
            value: hex::encode_upper(bytes),
        };
        match bytes {
            [ED25519_PREFIX, rest @ ..] => {
                let key: &[u8; 32] = rest.try_into().map_err(|_| invalid())?;
                ed25519_dalek::VerifyingKey::from_bytes(key)
                    .map(PublicKey::Ed25519)
                    .map_err(|_| invalid())
            }
            _ => k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                .map(PublicKey::Secp256k1)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.to_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}:{self})", self.key_type())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey {
            value: s.to_owned(),
        })?;
        Self::from_bytes(&bytes)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}

enum SecretKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// Custodial key that signs claims for the platform.
///
/// Signing is deterministic: the same channel and amount always produce the
/// same signature (RFC 6979 nonces for secp256k1, ed25519 by construction).
pub struct ClaimSigner {
    secret: SecretKey,
    public_key: PublicKey,
}

impl ClaimSigner {
    /// Loads a signer from a 32-byte secret, hex encoded.
    pub fn from_secret_hex(key_type: KeyType, secret: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(secret.trim_start_matches("0x"))
            .map_err(|e| KeyError::InvalidSecret(e.to_string()))?;
        Self::from_secret_bytes(key_type, &bytes)
    }

    pub fn from_secret_bytes(key_type: KeyType, secret: &[u8]) -> Result<Self, KeyError> {
        let secret = match key_type {
            KeyType::Secp256k1 => SecretKey::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(secret)
                    .map_err(|e| KeyError::InvalidSecret(e.to_string()))?,
            ),
            KeyType::Ed25519 => {
                let seed: &[u8; 32] = secret.try_into().map_err(|_| {
                    KeyError::InvalidSecret(format!("expected 32 bytes, got {}", secret.len()))
                })?;
                SecretKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(seed))
            }
        };
        Ok(Self::from_secret(secret))
    }

    pub fn random(key_type: KeyType) -> Self {
        let secret = match key_type {
            KeyType::Secp256k1 => SecretKey::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng)),
            KeyType::Ed25519 => SecretKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng)),
        };
        Self::from_secret(secret)
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public_key = match &secret {
            SecretKey::Secp256k1(key) => PublicKey::Secp256k1(key.verifying_key().clone()),
            SecretKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        };
        Self { secret, public_key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs the claim preimage of `claim`.
    pub fn sign(&self, claim: &Claim) -> Result<ClaimSignature, KeyError> {
        let bytes = match &self.secret {
            SecretKey::Secp256k1(key) => {
                let signature: k256::ecdsa::Signature = key.sign_prehash(&claim.signing_hash())?;
                let signature = signature.normalize_s().unwrap_or(signature);
                signature.to_der().as_bytes().to_vec()
            }
            SecretKey::Ed25519(key) => key.sign(&claim.signing_payload()).to_bytes().to_vec(),
        };
        Ok(ClaimSignature::from(bytes))
    }
}

impl fmt::Debug for ClaimSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
