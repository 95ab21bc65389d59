//! Fetching blocks and transactions from connected peers.
//!
//! A round asks every connected peer once, in random order, and returns the
//! first answer that verifies. Retrying fetchers repeat rounds with doubling
//! delays. Peers that lack the object, fail, or return something that does
//! not match the request are skipped.

use core::future::Future;
use core::time::Duration;

use eyre::{bail, Result as EyreResult};
use libp2p::PeerId;
use meridian_network::backoff::{cumulative_backoff, Backoff};
use meridian_network::request::request_from;
use meridian_primitives::block::{Block, CommitInfo};
use meridian_primitives::hash::Hash;
use meridian_primitives::transaction::Transaction;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::protocols;
use crate::wire::{BlockByHashResponse, BlockByHeightResponse};
use crate::Node;

#[derive(Clone, Debug)]
pub struct FetchedTx {
    pub tx: Transaction,
    pub raw: Vec<u8>,
    pub peer: PeerId,
}

#[derive(Clone, Debug)]
pub struct FetchedBlock {
    pub hash: Hash,
    pub block: Block,
    pub commit_info: CommitInfo,
    /// The block's encoding as received.
    pub raw: Vec<u8>,
    pub peer: PeerId,
}

impl FetchedBlock {
    #[must_use]
    pub const fn height(&self) -> i64 {
        self.block.header.height
    }
}

/// Decodes a transaction and checks it is the one requested.
pub(crate) fn verify_tx(raw: &[u8], hash: Hash) -> EyreResult<Transaction> {
    let tx = Transaction::decode(raw)?;

    let got = tx.hash()?;
    if got != hash {
        bail!("transaction hash mismatch: got {got}");
    }

    Ok(tx)
}

/// Decodes a block and its commit info and checks the block is the one
/// requested.
pub(crate) fn verify_block(
    raw: &[u8],
    commit_info: &[u8],
    hash: Hash,
    height: i64,
) -> EyreResult<(Block, CommitInfo)> {
    let block = Block::decode(raw)?;

    let got = block.hash();
    if got != hash {
        bail!("block hash mismatch: got {got}");
    }

    if block.header.height != height {
        bail!("block height mismatch: got {}", block.header.height);
    }

    if !block.verify_merkle_root()? {
        bail!("block merkle root does not match its transactions");
    }

    let commit_info = CommitInfo::decode(commit_info)?;

    Ok((block, commit_info))
}

impl Node {
    /// One round for the transaction `hash`.
    pub async fn get_tx(&self, hash: Hash) -> Result<FetchedTx, FetchError> {
        let peers = self.gossip.peers();
        if peers.is_empty() {
            return Err(FetchError::NoPeers);
        }

        let config = self.gossip.config();

        for peer in peers {
            let raw = match request_from(
                self.gossip.host(),
                peer,
                protocols::TX,
                hash.as_ref(),
                config.tx_read_limit,
                config.request_deadlines(),
            )
            .await
            {
                Ok(raw) => raw,
                Err(err) if err.is_not_found() => {
                    debug!(%hash, %peer, "Peer does not have the transaction");
                    continue;
                }
                Err(err) => {
                    info!(%hash, %peer, %err, "Transaction request failed");
                    continue;
                }
            };

            match verify_tx(&raw, hash) {
                Ok(tx) => return Ok(FetchedTx { tx, raw, peer }),
                Err(err) => warn!(%hash, %peer, %err, "Discarding transaction from peer"),
            }
        }

        Err(FetchError::TxNotFound)
    }

    /// One round for the block `hash`.
    pub async fn get_blk(&self, hash: Hash) -> Result<FetchedBlock, FetchError> {
        let peers = self.gossip.peers();
        if peers.is_empty() {
            return Err(FetchError::NoPeers);
        }

        let config = self.gossip.config();

        for peer in peers {
            let resp = match request_from(
                self.gossip.host(),
                peer,
                protocols::BLK,
                hash.as_ref(),
                config.blk_read_limit,
                config.blk_get_deadlines(),
            )
            .await
            {
                Ok(resp) => resp,
                Err(err) if err.is_not_found() => {
                    debug!(%hash, %peer, "Peer does not have the block");
                    continue;
                }
                Err(err) => {
                    info!(%hash, %peer, %err, "Block request failed");
                    continue;
                }
            };

            let verified = borsh::from_slice::<BlockByHashResponse>(&resp)
                .map_err(eyre::Report::from)
                .and_then(|resp| {
                    let (block, commit_info) =
                        verify_block(&resp.block, &resp.commit_info, hash, resp.height)?;
                    Ok((resp.block, block, commit_info))
                });

            match verified {
                Ok((raw, block, commit_info)) => {
                    return Ok(FetchedBlock {
                        hash,
                        block,
                        commit_info,
                        raw,
                        peer,
                    })
                }
                Err(err) => warn!(%hash, %peer, %err, "Discarding block from peer"),
            }
        }

        Err(FetchError::BlockNotFound)
    }

    /// Asks each connected peer once for the block at `height`.
    #[expect(clippy::redundant_pub_crate, reason = "Tokio code")]
    pub async fn get_blk_by_height(
        &self,
        height: i64,
        cancel: &CancellationToken,
    ) -> Result<FetchedBlock, FetchError> {
        select! {
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = self.get_blk_at(height) => outcome,
        }
    }

    async fn get_blk_at(&self, height: i64) -> Result<FetchedBlock, FetchError> {
        let peers = self.gossip.peers();
        if peers.is_empty() {
            return Err(FetchError::NoPeers);
        }

        let config = self.gossip.config();

        for peer in peers {
            let resp = match request_from(
                self.gossip.host(),
                peer,
                protocols::BLK_HEIGHT,
                &height.to_le_bytes(),
                config.blk_read_limit,
                config.blk_get_deadlines(),
            )
            .await
            {
                Ok(resp) => resp,
                Err(err) if err.is_not_found() => {
                    debug!(height, %peer, "Peer does not have the block");
                    continue;
                }
                Err(err) => {
                    info!(height, %peer, %err, "Block request failed");
                    continue;
                }
            };

            let verified = borsh::from_slice::<BlockByHeightResponse>(&resp)
                .map_err(eyre::Report::from)
                .and_then(|resp| {
                    let (block, commit_info) =
                        verify_block(&resp.block, &resp.commit_info, resp.hash, height)?;
                    Ok((resp.hash, resp.block, block, commit_info))
                });

            match verified {
                Ok((hash, raw, block, commit_info)) => {
                    return Ok(FetchedBlock {
                        hash,
                        block,
                        commit_info,
                        raw,
                        peer,
                    })
                }
                Err(err) => warn!(height, %peer, %err, "Discarding block from peer"),
            }
        }

        Err(FetchError::BlockNotFound)
    }

    /// Repeats [`get_tx`](Self::get_tx) rounds up to `max_attempts` times,
    /// waiting `base_delay` after the first and doubling the wait after each.
    pub async fn get_tx_with_retry(
        &self,
        hash: Hash,
        base_delay: Duration,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<FetchedTx, FetchError> {
        retry(hash, base_delay, max_attempts, cancel, FetchError::TxNotFound, || {
            self.get_tx(hash)
        })
        .await
    }

    /// Repeats [`get_blk`](Self::get_blk) rounds up to `max_attempts` times,
    /// waiting `base_delay` after the first and doubling the wait after each.
    pub async fn get_blk_with_retry(
        &self,
        hash: Hash,
        base_delay: Duration,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<FetchedBlock, FetchError> {
        retry(hash, base_delay, max_attempts, cancel, FetchError::BlockNotFound, || {
            self.get_blk(hash)
        })
        .await
    }
}

async fn retry<T, F, Fut>(
    hash: Hash,
    base_delay: Duration,
    max_attempts: u32,
    cancel: &CancellationToken,
    exhausted: FetchError,
    mut round: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = Backoff::new(max_attempts, base_delay, Duration::MAX, false);

    while !backoff.maxed_out() {
        let wait = backoff.next();

        #[expect(clippy::redundant_pub_crate, reason = "Tokio code")]
        let outcome = select! {
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = async {
                sleep(wait).await;
                round().await
            } => outcome,
        };

        match outcome {
            Ok(found) => return Ok(found),
            Err(err) => {
                warn!(%hash, %err, attempt = backoff.tries(), "Unable to retrieve object, waiting to retry");
            }
        }
    }

    warn!(
        %hash,
        attempts = max_attempts,
        waited = ?cumulative_backoff(base_delay, Duration::MAX, max_attempts, false),
        "Giving up on object"
    );

    Err(exhausted)
}
