#[cfg(test)]
#[path = "tests/transaction.rs"]
mod tests;

use core::fmt;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, Authenticator, Signature, Signer};
use crate::hash::{Hash, Hasher};
use crate::validator::AccountId;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    Execute,
    Transfer,
    ValidatorJoin,
    ValidatorVoteIds,
    ValidatorVoteBodies,
}

impl PayloadType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Transfer => "transfer",
            Self::ValidatorJoin => "validator_join",
            Self::ValidatorVoteIds => "validator_vote_ids",
            Self::ValidatorVoteBodies => "validator_vote_bodies",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A typed transaction payload.
pub trait Payload: BorshSerialize + BorshDeserialize {
    const TYPE: PayloadType;
}

/// Opaque action execution, interpreted by the transaction application.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Execute {
    pub namespace: String,
    pub action: String,
    pub arguments: Vec<Vec<u8>>,
}

impl Payload for Execute {
    const TYPE: PayloadType = PayloadType::Execute;
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transfer {
    pub to: AccountId,
    pub amount: u128,
}

impl Payload for Transfer {
    const TYPE: PayloadType = PayloadType::Transfer;
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorJoin {
    pub power: i64,
}

impl Payload for ValidatorJoin {
    const TYPE: PayloadType = PayloadType::ValidatorJoin;
}

/// Ids of resolutions a validator has observed, broadcast by non-leaders.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorVoteIds {
    pub resolution_ids: Vec<Hash>,
}

impl Payload for ValidatorVoteIds {
    const TYPE: PayloadType = PayloadType::ValidatorVoteIds;
}

/// Full bodies of observed events, included by the leader in its proposals.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorVoteBodies {
    pub events: Vec<VotableEvent>,
}

impl Payload for ValidatorVoteBodies {
    const TYPE: PayloadType = PayloadType::ValidatorVoteBodies;
}

/// An external observation that needs network-wide agreement.
#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct VotableEvent {
    pub event_type: String,
    #[serde(with = "hex")]
    pub body: Vec<u8>,
}

impl VotableEvent {
    #[must_use]
    pub fn id(&self) -> Hash {
        Hasher::default()
            .update(self.event_type.as_bytes())
            .update(&self.body)
            .finalize()
    }

    /// Encoded size inside a vote-body payload.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        8_usize
            .saturating_add(self.event_type.len())
            .saturating_add(self.body.len())
    }
}

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TransactionBody {
    pub description: String,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    pub payload_type: PayloadType,
    pub fee: u128,
    pub nonce: u64,
    pub chain_id: String,
}

/// A signed transaction. Never mutated once signed.
#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Transaction {
    pub signature: Option<Signature>,
    pub body: TransactionBody,
    #[serde(with = "hex")]
    pub sender: Vec<u8>,
}

impl Transaction {
    pub fn new<P: Payload>(payload: &P, chain_id: &str, nonce: u64) -> io::Result<Self> {
        Ok(Self {
            signature: None,
            body: TransactionBody {
                description: String::new(),
                payload: borsh::to_vec(payload)?,
                payload_type: P::TYPE,
                fee: 0,
                nonce,
                chain_id: chain_id.to_owned(),
            },
            sender: Vec::new(),
        })
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        borsh::from_slice(bytes)
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> io::Result<Hash> {
        Hash::hash_borsh(self)
    }

    pub fn serialized_size(&self) -> io::Result<usize> {
        let mut counter = SizeCounter(0);
        BorshSerialize::serialize(self, &mut counter)?;
        Ok(counter.0)
    }

    /// The message a signature commits to.
    pub fn signing_bytes(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(&self.body)
    }

    pub fn sign(&mut self, signer: &Signer) -> io::Result<()> {
        self.sender = signer.public_key();
        self.signature = Some(signer.sign(&self.signing_bytes()?));
        Ok(())
    }

    pub fn authenticator(&self) -> Result<Authenticator, AuthError> {
        let signature = self.signature.as_ref().ok_or(AuthError::Unsigned)?;
        Authenticator::from_tag(&signature.auth_type)
    }

    pub fn verify(&self) -> Result<(), AuthError> {
        let signature = self.signature.as_ref().ok_or(AuthError::Unsigned)?;
        let auth = Authenticator::from_tag(&signature.auth_type)?;
        let msg = self
            .signing_bytes()
            .map_err(|err| AuthError::Encoding(err.to_string()))?;

        auth.verify(&self.sender, &msg, &signature.data)
    }

    pub fn decode_payload<P: Payload>(&self) -> io::Result<P> {
        if self.body.payload_type != P::TYPE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "expected {} payload, found {}",
                    P::TYPE,
                    self.body.payload_type
                ),
            ));
        }

        borsh::from_slice(&self.body.payload)
    }
}

struct SizeCounter(usize);

impl io::Write for SizeCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 = self.0.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
