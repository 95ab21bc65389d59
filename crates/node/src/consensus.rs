//! The consensus engine as seen by the sync protocol.

use async_trait::async_trait;
use meridian_primitives::block::{Block, BlockHeader, CommitInfo};
use meridian_primitives::hash::Hash;
use meridian_primitives::inflight::FetchClaim;

#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Whether a block announced as committed is wanted. Called before the
    /// block is pulled.
    fn accept_commit(
        &self,
        height: i64,
        hash: Hash,
        header: &BlockHeader,
        commit_info: &CommitInfo,
        leader_sig: &[u8],
    ) -> bool;

    /// Delivers a fetched and verified committed block. The block is already
    /// in the block store. `claim` keeps other fetches of the block out until
    /// the engine drops it.
    async fn notify_block_commit(
        &self,
        block: Block,
        commit_info: CommitInfo,
        hash: Hash,
        claim: FetchClaim,
    );
}
