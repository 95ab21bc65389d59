use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::hash::Hash;
use crate::params::{NetworkParameters, ParamUpdates};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct MigrationContext {
    pub start_height: i64,
    pub end_height: i64,
}

impl MigrationContext {
    /// A migration window exists only when both ends are configured.
    #[must_use]
    pub const fn from_heights(start_height: i64, end_height: i64) -> Option<Self> {
        if start_height == 0 || end_height == 0 {
            return None;
        }

        Some(Self {
            start_height,
            end_height,
        })
    }
}

/// The live chain-wide context, owned by the block processor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainContext {
    pub chain_id: String,
    pub network_parameters: NetworkParameters,
    pub migration: Option<MigrationContext>,
    /// Parameter changes accumulated by the block being executed.
    pub network_updates: ParamUpdates,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub chain_context: ChainContext,
    pub height: i64,
    pub timestamp_ms: u64,
    pub proposer: Vec<u8>,
}

#[derive(Debug)]
pub struct TxContext<'a> {
    pub block: &'a mut BlockContext,
    pub tx_hash: Hash,
    pub signer: Vec<u8>,
    pub caller: String,
    pub authenticator: Authenticator,
}
