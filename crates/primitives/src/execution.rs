use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::hash::Hash;
use crate::params::ParamUpdates;
use crate::validator::Validator;

/// Result codes recorded for executed transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TxCode {
    Ok = 0,
    EncodingError = 1,
    WrongChain = 2,
    InvalidNonce = 3,
    InvalidAmount = 4,
    InsufficientBalance = 5,
    InsufficientFee = 6,
    InvalidSignature = 7,
    Unauthorized = 8,
    UnknownError = 0xFFFF,
}

impl From<TxCode> for u32 {
    fn from(code: TxCode) -> Self {
        code as Self
    }
}

pub const SUCCESS_LOG: &str = "success";

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxResult {
    pub code: u32,
    pub gas: i64,
    pub log: String,
}

#[derive(Clone, Debug)]
pub struct BlockExecRequest {
    pub height: i64,
    pub block: Block,
    pub block_id: Hash,
    /// Public key of the block's proposer.
    pub proposer: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockExecResult {
    pub tx_results: Vec<TxResult>,
    pub app_hash: Hash,
    pub validator_updates: Vec<Validator>,
    pub param_updates: ParamUpdates,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub height: i64,
    pub app_hash: Hash,
    /// Set while catching up with the network.
    pub syncing: bool,
}
