//! Transaction signature schemes.
//!
//! The set of schemes is closed: an [`Authenticator`] is resolved from the
//! stable string tag carried in a [`Signature`], never by inspecting the key.

#[cfg(test)]
#[path = "tests/auth.rs"]
mod tests;

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use libp2p_identity::{ed25519, secp256k1, Keypair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag of the plain Ed25519 scheme.
pub const ED25519_AUTH: &str = "ed25519";

/// Tag of the secp256k1 personal-sign scheme.
pub const SECP256K1_PERSONAL_AUTH: &str = "secp256k1_ep";

const PERSONAL_SIGN_PREFIX: &str = "\x19Meridian Signed Message:\n";

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Ed25519,
    Secp256k1,
}

impl KeyType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Secp256k1 => "secp256k1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A type-tagged signature.
#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Signature {
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    pub auth_type: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("unknown authenticator {0:?}")]
    UnknownAuthenticator(String),
    #[error("invalid {0} public key")]
    InvalidPublicKey(KeyType),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("transaction is not signed")]
    Unsigned,
    #[error("unsupported keypair type")]
    UnsupportedKeypair,
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// The supported signature schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Authenticator {
    /// Ed25519 over the raw message; the sender is the 32-byte public key.
    Ed25519,
    /// secp256k1 over a prefixed message; the sender is the 33-byte compressed
    /// public key.
    Secp256k1PersonalSign,
}

impl Authenticator {
    pub const ALL: [Self; 2] = [Self::Ed25519, Self::Secp256k1PersonalSign];

    pub fn from_tag(tag: &str) -> Result<Self, AuthError> {
        Self::ALL
            .into_iter()
            .find(|auth| auth.tag() == tag)
            .ok_or_else(|| AuthError::UnknownAuthenticator(tag.to_owned()))
    }

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Ed25519 => ED25519_AUTH,
            Self::Secp256k1PersonalSign => SECP256K1_PERSONAL_AUTH,
        }
    }

    #[must_use]
    pub const fn key_type(self) -> KeyType {
        match self {
            Self::Ed25519 => KeyType::Ed25519,
            Self::Secp256k1PersonalSign => KeyType::Secp256k1,
        }
    }

    /// Verifies `signature` over `msg` by the key in `sender`.
    pub fn verify(self, sender: &[u8], msg: &[u8], signature: &[u8]) -> Result<(), AuthError> {
        let valid = match self {
            Self::Ed25519 => ed25519::PublicKey::try_from_bytes(sender)
                .map_err(|_| AuthError::InvalidPublicKey(KeyType::Ed25519))?
                .verify(msg, signature),
            Self::Secp256k1PersonalSign => secp256k1::PublicKey::try_from_bytes(sender)
                .map_err(|_| AuthError::InvalidPublicKey(KeyType::Secp256k1))?
                .verify(&personal_message(msg), signature),
        };

        if !valid {
            return Err(AuthError::InvalidSignature);
        }

        Ok(())
    }

    /// Derives the account identifier string of `sender`.
    pub fn identifier(self, sender: &[u8]) -> Result<String, AuthError> {
        match self {
            Self::Ed25519 => {
                let _key = ed25519::PublicKey::try_from_bytes(sender)
                    .map_err(|_| AuthError::InvalidPublicKey(KeyType::Ed25519))?;
            }
            Self::Secp256k1PersonalSign => {
                let _key = secp256k1::PublicKey::try_from_bytes(sender)
                    .map_err(|_| AuthError::InvalidPublicKey(KeyType::Secp256k1))?;
            }
        }

        Ok(hex::encode(sender))
    }
}

impl fmt::Display for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tag())
    }
}

fn personal_message(msg: &[u8]) -> Vec<u8> {
    let prefix = format!("{PERSONAL_SIGN_PREFIX}{}", msg.len());

    let mut out = Vec::with_capacity(prefix.len().saturating_add(msg.len()));
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(msg);
    out
}

/// A node or client signing key bound to one [`Authenticator`].
#[derive(Clone)]
pub enum Signer {
    Ed25519(ed25519::Keypair),
    Secp256k1(secp256k1::Keypair),
}

impl Signer {
    #[must_use]
    pub fn generate_ed25519() -> Self {
        Self::Ed25519(ed25519::Keypair::generate())
    }

    #[must_use]
    pub fn generate_secp256k1() -> Self {
        Self::Secp256k1(secp256k1::Keypair::generate())
    }

    pub fn from_keypair(keypair: &Keypair) -> Result<Self, AuthError> {
        if let Ok(keypair) = keypair.clone().try_into_ed25519() {
            return Ok(Self::Ed25519(keypair));
        }

        keypair
            .clone()
            .try_into_secp256k1()
            .map(Self::Secp256k1)
            .map_err(|_| AuthError::UnsupportedKeypair)
    }

    #[must_use]
    pub const fn authenticator(&self) -> Authenticator {
        match self {
            Self::Ed25519(_) => Authenticator::Ed25519,
            Self::Secp256k1(_) => Authenticator::Secp256k1PersonalSign,
        }
    }

    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        self.authenticator().key_type()
    }

    /// The sender bytes transactions signed by this key carry.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(keypair) => keypair.public().to_bytes().to_vec(),
            Self::Secp256k1(keypair) => keypair.public().to_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let data = match self {
            Self::Ed25519(keypair) => keypair.sign(msg),
            Self::Secp256k1(keypair) => keypair.secret().sign(&personal_message(msg)),
        };

        Signature {
            data,
            auth_type: self.authenticator().tag().to_owned(),
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("authenticator", &self.authenticator())
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}
