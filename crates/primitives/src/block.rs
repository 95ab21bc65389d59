#[cfg(test)]
#[path = "tests/block.rs"]
mod tests;

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, Authenticator, Signer};
use crate::hash::{Hash, Hasher};
use crate::params::ParamUpdates;
use crate::transaction::Transaction;
use crate::validator::Validator;

pub const BLOCK_VERSION: u16 = 1;

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockHeader {
    pub version: u16,
    pub height: i64,
    pub num_txns: u32,
    pub prev_hash: Hash,
    pub prev_app_hash: Hash,
    pub validator_set_hash: Hash,
    pub timestamp_ms: u64,
    pub merkle_root: Hash,
}

impl BlockHeader {
    /// Block identity: the digest of the header fields in fixed little-endian
    /// layout.
    #[must_use]
    pub fn hash(&self) -> Hash {
        Hasher::default()
            .update(self.version.to_le_bytes())
            .update(self.height.to_le_bytes())
            .update(self.num_txns.to_le_bytes())
            .update(self.prev_hash)
            .update(self.prev_app_hash)
            .update(self.validator_set_hash)
            .update(self.timestamp_ms.to_le_bytes())
            .update(self.merkle_root)
            .finalize()
    }
}

/// A block: header, ordered transactions and the leader's signature over the
/// block hash.
///
/// Transactions are carried on the wire as length-prefixed raw encodings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txns: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl Block {
    pub fn new(
        height: i64,
        prev_hash: Hash,
        prev_app_hash: Hash,
        validator_set_hash: Hash,
        timestamp_ms: u64,
        txns: Vec<Transaction>,
    ) -> io::Result<Self> {
        let tx_hashes = txns
            .iter()
            .map(Transaction::hash)
            .collect::<io::Result<Vec<_>>>()?;

        let num_txns = u32::try_from(txns.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many transactions"))?;

        Ok(Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                num_txns,
                prev_hash,
                prev_app_hash,
                validator_set_hash,
                timestamp_ms,
                merkle_root: merkle_root(&tx_hashes),
            },
            txns,
            signature: Vec::new(),
        })
    }

    #[must_use]
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn sign(&mut self, signer: &Signer) {
        self.signature = signer.sign(self.hash().as_bytes()).data;
    }

    pub fn verify_signature(&self, leader: &[u8], auth: Authenticator) -> Result<(), AuthError> {
        auth.verify(leader, self.hash().as_bytes(), &self.signature)
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        borsh::from_slice(bytes)
    }

    /// Checks that the header commits to the carried transactions.
    pub fn verify_merkle_root(&self) -> io::Result<bool> {
        let tx_hashes = self
            .txns
            .iter()
            .map(Transaction::hash)
            .collect::<io::Result<Vec<_>>>()?;

        Ok(usize::try_from(self.header.num_txns).ok() == Some(self.txns.len())
            && merkle_root(&tx_hashes) == self.header.merkle_root)
    }
}

impl BorshSerialize for Block {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        BorshSerialize::serialize(&self.header, writer)?;

        let raw = self
            .txns
            .iter()
            .map(Transaction::encode)
            .collect::<io::Result<Vec<_>>>()?;
        BorshSerialize::serialize(&raw, writer)?;

        BorshSerialize::serialize(&self.signature, writer)
    }
}

impl BorshDeserialize for Block {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let header = BlockHeader::deserialize_reader(reader)?;
        let raw = Vec::<Vec<u8>>::deserialize_reader(reader)?;
        let txns = raw
            .iter()
            .map(|bytes| Transaction::decode(bytes))
            .collect::<io::Result<Vec<_>>>()?;
        let signature = Vec::<u8>::deserialize_reader(reader)?;

        Ok(Self {
            header,
            txns,
            signature,
        })
    }
}

/// Binary merkle root over transaction hashes; an odd node is paired with
/// itself.
#[must_use]
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let mut level = leaves.to_vec();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);

                Hasher::default().update(left).update(right).finalize()
            })
            .collect();
    }

    level[0]
}

/// Post-execution record of a block, stored alongside it.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CommitInfo {
    pub app_hash: Hash,
    pub param_updates: ParamUpdates,
    pub validator_updates: Vec<Validator>,
}

impl CommitInfo {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        borsh::from_slice(bytes)
    }
}
