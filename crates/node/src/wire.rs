//! Message layouts of the sync protocol.
//!
//! Integers are little-endian and variable fields carry a `u32` length
//! prefix, which is exactly the borsh layout of the types below.

use core::time::Duration;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use meridian_network::request::RequestError;
use meridian_primitives::block::{Block, BlockHeader, CommitInfo};
use meridian_primitives::hash::Hash;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Positive answer to a block-by-hash request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockByHashResponse {
    pub height: i64,
    pub commit_info: Vec<u8>,
    pub block: Vec<u8>,
}

/// Positive answer to a block-by-height request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockByHeightResponse {
    pub hash: Hash,
    pub commit_info: Vec<u8>,
    pub block: Vec<u8>,
}

/// Advertisement of a committed block. Carries the header and commit info so
/// the receiver can vet the block before pulling it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockAnn {
    pub height: i64,
    pub hash: Hash,
    pub header: Vec<u8>,
    pub commit_info: Vec<u8>,
    pub leader_sig: Vec<u8>,
}

impl BlockAnn {
    pub fn new(block: &Block, commit_info: &CommitInfo) -> io::Result<Self> {
        Ok(Self {
            height: block.header.height,
            hash: block.hash(),
            header: borsh::to_vec(&block.header)?,
            commit_info: commit_info.encode()?,
            leader_sig: block.signature.clone(),
        })
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    pub fn header(&self) -> io::Result<BlockHeader> {
        borsh::from_slice(&self.header)
    }

    pub fn commit_info(&self) -> io::Result<CommitInfo> {
        CommitInfo::decode(&self.commit_info)
    }

    /// Reads an announcement off a stream that stays open for the pull.
    /// `limit` bounds the combined size of the variable fields.
    pub async fn read_from<S: AsyncRead + Unpin + ?Sized>(
        stream: &mut S,
        limit: usize,
        deadline: Duration,
    ) -> Result<Self, RequestError> {
        timeout(deadline, Self::read_fields(stream, limit))
            .await
            .map_err(|_| RequestError::Timeout)?
    }

    async fn read_fields<S: AsyncRead + Unpin + ?Sized>(
        stream: &mut S,
        limit: usize,
    ) -> Result<Self, RequestError> {
        let height = stream.read_i64_le().await?;

        let mut hash = [0_u8; Hash::LEN];
        let _read = stream.read_exact(&mut hash).await?;

        let mut budget = Budget { limit, left: limit };

        let header = budget.read_prefixed(stream).await?;
        let commit_info = budget.read_prefixed(stream).await?;
        let leader_sig = budget.read_prefixed(stream).await?;

        Ok(Self {
            height,
            hash: hash.into(),
            header,
            commit_info,
            leader_sig,
        })
    }
}

struct Budget {
    limit: usize,
    left: usize,
}

impl Budget {
    async fn read_prefixed<S: AsyncRead + Unpin + ?Sized>(
        &mut self,
        stream: &mut S,
    ) -> Result<Vec<u8>, RequestError> {
        let len = usize::try_from(stream.read_u32_le().await?).unwrap_or(usize::MAX);

        if len > self.left {
            return Err(RequestError::ReadLimitExceeded(
                u64::try_from(self.limit).unwrap_or(u64::MAX),
            ));
        }

        self.left = self.left.saturating_sub(len);

        let mut buf = vec![0; len];
        let _read = stream.read_exact(&mut buf).await?;

        Ok(buf)
    }
}

/// Reads a 32-byte hash request.
pub async fn read_hash<S: AsyncRead + Unpin + ?Sized>(
    stream: &mut S,
    deadline: Duration,
) -> Result<Hash, RequestError> {
    let mut hash = [0_u8; Hash::LEN];

    let _read = timeout(deadline, stream.read_exact(&mut hash))
        .await
        .map_err(|_| RequestError::Timeout)??;

    Ok(hash.into())
}

/// Reads an 8-byte height request.
pub async fn read_height<S: AsyncRead + Unpin + ?Sized>(
    stream: &mut S,
    deadline: Duration,
) -> Result<i64, RequestError> {
    timeout(deadline, stream.read_i64_le())
        .await
        .map_err(|_| RequestError::Timeout)?
        .map_err(Into::into)
}
