//! Durable block index keyed by hash and height.
//!
//! A block and its [`CommitInfo`] are written in one batch, so one exists only
//! with the other.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use eyre::Result as EyreResult;
use meridian_primitives::block::{Block, CommitInfo};
use meridian_primitives::hash::Hash;
use meridian_primitives::inflight::{FetchClaim, InflightSet};
use meridian_primitives::transaction::Transaction;
use parking_lot::RwLock;
use tracing::debug;

use crate::db::Column;
use crate::error::DbError;
use crate::tx::Transaction as Batch;
use crate::Store;

/// The highest stored block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BestBlock {
    /// Zero when the store is empty.
    pub height: i64,
    pub hash: Hash,
    pub app_hash: Hash,
    pub timestamp_ms: u64,
}

/// Raw stored encodings, served to peers without re-encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    pub hash: Hash,
    pub height: i64,
    pub commit_info: Vec<u8>,
    pub block: Vec<u8>,
}

#[derive(Clone, Copy, Debug, BorshSerialize, BorshDeserialize)]
struct TxLocation {
    block: Hash,
    height: i64,
    index: u32,
}

#[derive(Clone, Debug)]
pub struct BlockStore {
    store: Store,
    best: Arc<RwLock<BestBlock>>,
    fetching: InflightSet,
}

fn height_key(height: i64) -> [u8; 8] {
    // Heights are non-negative, so big-endian keys sort numerically.
    height.to_be_bytes()
}

impl BlockStore {
    pub fn open(store: Store) -> EyreResult<Self> {
        let this = Self {
            store,
            best: Arc::default(),
            fetching: InflightSet::default(),
        };

        if let Some((_, hash)) = this.store.last(Column::Heights)? {
            let hash = Hash::try_from_slice(&hash)
                .map_err(|err| DbError::corrupt(Column::Heights, err))?;

            if let Some((block, ci)) = this.get(&hash)? {
                *this.best.write() = BestBlock {
                    height: block.header.height,
                    hash,
                    app_hash: ci.app_hash,
                    timestamp_ms: block.header.timestamp_ms,
                };
            }
        }

        Ok(this)
    }

    /// Stores `block` with its commit info, indexing its transactions.
    pub fn store(&self, block: &Block, commit_info: &CommitInfo) -> EyreResult<()> {
        let hash = block.hash();
        let height = block.header.height;

        let mut raw_block = height.to_le_bytes().to_vec();
        raw_block.extend_from_slice(&block.encode()?);

        let mut batch = Batch::default();
        batch.put(Column::Blocks, hash.to_vec(), raw_block);
        batch.put(Column::CommitInfo, hash.to_vec(), commit_info.encode()?);
        batch.put(Column::Heights, height_key(height).to_vec(), hash.to_vec());

        for (index, tx) in block.txns.iter().enumerate() {
            let location = TxLocation {
                block: hash,
                height,
                index: u32::try_from(index)?,
            };
            batch.put(Column::TxIndex, tx.hash()?.to_vec(), borsh::to_vec(&location)?);
        }

        self.store.apply(&batch)?;

        let mut best = self.best.write();
        if height > best.height {
            *best = BestBlock {
                height,
                hash,
                app_hash: commit_info.app_hash,
                timestamp_ms: block.header.timestamp_ms,
            };
        }

        debug!(%hash, height, txs = block.txns.len(), "Stored block");

        Ok(())
    }

    pub fn have(&self, hash: &Hash) -> EyreResult<bool> {
        self.store.has(Column::Blocks, hash.as_ref())
    }

    pub fn get_raw(&self, hash: &Hash) -> EyreResult<Option<RawBlock>> {
        let Some(stored) = self.store.get(Column::Blocks, hash.as_ref())? else {
            return Ok(None);
        };

        let Some(commit_info) = self.store.get(Column::CommitInfo, hash.as_ref())? else {
            return Err(DbError::corrupt(Column::CommitInfo, "missing for stored block").into());
        };

        let (height, block) = stored
            .split_first_chunk::<8>()
            .ok_or_else(|| DbError::corrupt(Column::Blocks, "truncated record"))?;

        Ok(Some(RawBlock {
            hash: *hash,
            height: i64::from_le_bytes(*height),
            commit_info,
            block: block.to_vec(),
        }))
    }

    pub fn get(&self, hash: &Hash) -> EyreResult<Option<(Block, CommitInfo)>> {
        let Some(raw) = self.get_raw(hash)? else {
            return Ok(None);
        };

        let block =
            Block::decode(&raw.block).map_err(|err| DbError::corrupt(Column::Blocks, err))?;
        let ci = CommitInfo::decode(&raw.commit_info)
            .map_err(|err| DbError::corrupt(Column::CommitInfo, err))?;

        Ok(Some((block, ci)))
    }

    pub fn hash_at(&self, height: i64) -> EyreResult<Option<Hash>> {
        let Some(raw) = self.store.get(Column::Heights, &height_key(height))? else {
            return Ok(None);
        };

        let hash =
            Hash::try_from_slice(&raw).map_err(|err| DbError::corrupt(Column::Heights, err))?;

        Ok(Some(hash))
    }

    pub fn get_raw_by_height(&self, height: i64) -> EyreResult<Option<RawBlock>> {
        match self.hash_at(height)? {
            Some(hash) => self.get_raw(&hash),
            None => Ok(None),
        }
    }

    pub fn get_by_height(&self, height: i64) -> EyreResult<Option<(Hash, Block, CommitInfo)>> {
        let Some(hash) = self.hash_at(height)? else {
            return Ok(None);
        };

        Ok(self.get(&hash)?.map(|(block, ci)| (hash, block, ci)))
    }

    #[must_use]
    pub fn best(&self) -> BestBlock {
        *self.best.read()
    }

    pub fn have_tx(&self, tx_hash: &Hash) -> EyreResult<bool> {
        self.store.has(Column::TxIndex, tx_hash.as_ref())
    }

    /// A confirmed transaction with the height and hash of its block.
    pub fn get_tx(&self, tx_hash: &Hash) -> EyreResult<Option<(Transaction, i64, Hash)>> {
        let Some(raw) = self.store.get(Column::TxIndex, tx_hash.as_ref())? else {
            return Ok(None);
        };

        let location: TxLocation =
            borsh::from_slice(&raw).map_err(|err| DbError::corrupt(Column::TxIndex, err))?;

        let Some((block, _)) = self.get(&location.block)? else {
            return Err(DbError::corrupt(Column::TxIndex, "indexed block missing").into());
        };

        let tx = usize::try_from(location.index)
            .ok()
            .and_then(|index| block.txns.get(index).cloned())
            .ok_or_else(|| DbError::corrupt(Column::TxIndex, "index out of range"))?;

        Ok(Some((tx, location.height, location.block)))
    }

    /// Claims the right to fetch `hash`. `None` if the block is already stored
    /// or another fetch is in flight.
    pub fn pre_fetch(&self, hash: Hash) -> EyreResult<Option<FetchClaim>> {
        if self.have(&hash)? {
            return Ok(None);
        }

        Ok(self.fetching.claim(hash))
    }
}
