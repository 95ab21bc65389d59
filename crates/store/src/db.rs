use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use eyre::Result as EyreResult;
use strum::{AsRefStr, EnumIter};

use crate::tx::Transaction;

mod memory;

pub use memory::InMemoryDB;

#[derive(
    Eq,
    Ord,
    Copy,
    Clone,
    Debug,
    Hash,
    PartialEq,
    PartialOrd,
    EnumIter,
    AsRefStr,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum Column {
    /// Chain state and network parameters.
    Meta,
    /// Application state written by transaction execution.
    State,
    Blocks,
    CommitInfo,
    /// Height (big-endian) to block hash.
    Heights,
    /// Transaction hash to its position in a block.
    TxIndex,
}

pub trait Database: Send + Sync + 'static {
    fn has(&self, col: Column, key: &[u8]) -> EyreResult<bool>;
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>>;
    fn put(&self, col: Column, key: &[u8], value: &[u8]) -> EyreResult<()>;
    fn delete(&self, col: Column, key: &[u8]) -> EyreResult<()>;

    /// Entries whose key starts with `prefix`, in key order.
    fn iter_prefix(&self, col: Column, prefix: &[u8]) -> EyreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// The entry with the greatest key.
    fn last(&self, col: Column) -> EyreResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Applies every operation of `tx` atomically.
    fn apply(&self, tx: &Transaction) -> EyreResult<()>;

    /// A frozen copy of the current contents.
    fn snapshot(&self) -> EyreResult<Arc<dyn Database>>;
}
