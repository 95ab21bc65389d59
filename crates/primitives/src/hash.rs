#[cfg(test)]
#[path = "tests/hash.rs"]
mod tests;

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use thiserror::Error;

const BYTES_LEN: usize = 32;

/// A SHA-256 digest.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Hash([u8; BYTES_LEN]);

impl Hash {
    pub const LEN: usize = BYTES_LEN;
    pub const ZERO: Self = Self([0; BYTES_LEN]);

    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self(sha2::Sha256::digest(data).into())
    }

    pub fn hash_borsh<T: BorshSerialize>(data: &T) -> io::Result<Self> {
        let mut hasher = Hasher::default();

        data.serialize(&mut hasher)?;

        Ok(hasher.finalize())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BYTES_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; BYTES_LEN] = bytes.try_into().map_err(|_| Error::InvalidLength)?;

        Ok(Self(bytes))
    }
}

/// Incremental SHA-256 hasher producing a [`Hash`].
#[derive(Clone, Debug, Default)]
pub struct Hasher(sha2::Sha256);

impl Hasher {
    #[must_use]
    pub fn update(mut self, data: impl AsRef<[u8]>) -> Self {
        self.0.update(data);
        self
    }

    #[must_use]
    pub fn finalize(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl From<[u8; BYTES_LEN]> for Hash {
    fn from(bytes: [u8; BYTES_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for [u8; BYTES_LEN] {
    fn from(hash: Hash) -> Self {
        hash.0
    }
}

impl Deref for Hash {
    type Target = [u8; BYTES_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&hex::encode(self.0)).finish()
    }
}

#[derive(Clone, Copy, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid hash length")]
    InvalidLength,

    #[error("invalid hex")]
    DecodeError(#[from] hex::FromHexError),
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; BYTES_LEN];

        match hex::decode_to_slice(s, &mut bytes) {
            Ok(()) => Ok(Self(bytes)),
            Err(hex::FromHexError::InvalidStringLength | hex::FromHexError::OddLength) => {
                Err(Error::InvalidLength)
            }
            Err(err) => Err(Error::DecodeError(err)),
        }
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl serde::de::Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a hex encoded hash")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v.parse() {
                    Ok(hash) => Ok(hash),
                    Err(Error::InvalidLength) => Err(E::invalid_length(v.len(), &self)),
                    Err(err) => Err(E::custom(err)),
                }
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}
