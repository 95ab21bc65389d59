use eyre::{bail, Result as EyreResult};
use libp2p::PeerId;
use meridian_network::request::{request, write_all, GET_MSG, NO_DATA};
use meridian_network::Stream;
use meridian_primitives::block::Block;
use meridian_primitives::inflight::FetchClaim;
use tracing::{debug, info, warn};

use crate::fetch::{verify_block, FetchedBlock};
use crate::wire::{read_hash, read_height, BlockAnn, BlockByHashResponse, BlockByHeightResponse};
use crate::Node;

impl Node {
    pub(super) async fn serve_blk(&self, stream: &mut Stream) -> EyreResult<()> {
        let config = self.gossip.config();

        let hash = read_hash(stream, config.request_read_timeout).await?;

        let resp = match self.blocks.get_raw(&hash) {
            Ok(Some(raw)) => borsh::to_vec(&BlockByHashResponse {
                height: raw.height,
                commit_info: raw.commit_info,
                block: raw.block,
            })?,
            Ok(None) => {
                debug!(%hash, "Requested block not found");
                vec![NO_DATA]
            }
            Err(err) => {
                warn!(%hash, %err, "Failed to look up requested block");
                vec![NO_DATA]
            }
        };

        write_all(stream, &resp, config.blk_send_timeout).await?;

        Ok(())
    }

    pub(super) async fn serve_blk_by_height(&self, stream: &mut Stream) -> EyreResult<()> {
        let config = self.gossip.config();

        let height = read_height(stream, config.request_read_timeout).await?;

        let resp = match self.blocks.get_raw_by_height(height) {
            Ok(Some(raw)) => borsh::to_vec(&BlockByHeightResponse {
                hash: raw.hash,
                commit_info: raw.commit_info,
                block: raw.block,
            })?,
            Ok(None) => {
                debug!(height, "Requested block height not found");
                vec![NO_DATA]
            }
            Err(err) => {
                warn!(height, %err, "Failed to look up requested block height");
                vec![NO_DATA]
            }
        };

        write_all(stream, &resp, config.blk_send_timeout).await?;

        Ok(())
    }

    pub(super) async fn handle_blk_ann(&self, peer: PeerId, stream: &mut Stream) -> EyreResult<()> {
        let config = *self.gossip.config();

        let ann = BlockAnn::read_from(stream, config.ann_read_limit, config.ann_resp_timeout).await?;
        let (height, hash) = (ann.height, ann.hash);

        if height < 0 {
            bail!("invalid announced block height {height}");
        }

        let header = ann.header()?;
        let commit_info = ann.commit_info()?;

        if header.height != height || header.hash() != hash {
            bail!("announced header does not match block {hash} at height {height}");
        }

        debug!(height, %hash, %peer, "Received block announcement");

        if !self
            .consensus
            .accept_commit(height, hash, &header, &commit_info, &ann.leader_sig)
        {
            debug!(height, %hash, %peer, "Consensus engine declined announced block");
            return Ok(());
        }

        let Some(claim) = self.blocks.pre_fetch(hash)? else {
            debug!(height, %hash, %peer, "Announced block already stored or being fetched");
            return Ok(());
        };

        let pulled = request(
            stream,
            GET_MSG,
            config.blk_read_limit,
            config.blk_get_deadlines(),
        )
        .await
        .map_err(eyre::Report::from)
        .and_then(|raw| {
            let (block, commit_info) = verify_block(&raw, &ann.commit_info, hash, height)?;
            Ok(FetchedBlock {
                hash,
                block,
                commit_info,
                raw,
                peer,
            })
        });

        match pulled {
            Ok(fetched) => self.accept_blk(fetched, ann.leader_sig, claim).await,
            Err(err) => {
                info!(height, %hash, %peer, %err, "Announcer did not provide the block, fetching from peers");

                let node = self.clone();

                drop(tokio::spawn(async move {
                    let config = node.gossip.config();

                    match node
                        .get_blk_with_retry(
                            hash,
                            config.retry_base_delay,
                            config.retry_attempts,
                            &node.cancel,
                        )
                        .await
                    {
                        Ok(fetched) if fetched.commit_info != commit_info => {
                            warn!(
                                height,
                                %hash,
                                peer = %fetched.peer,
                                announced = %commit_info.app_hash,
                                got = %fetched.commit_info.app_hash,
                                "Fetched commit info does not match announcement, dropping block"
                            );
                        }
                        Ok(fetched) => node.accept_blk(fetched, ann.leader_sig, claim).await,
                        Err(err) => warn!(height, %hash, %err, "Failed to fetch announced block"),
                    }
                }));
            }
        }

        Ok(())
    }

    /// Stores a fetched block, hands it to the consensus engine and announces
    /// it onward with the leader signature it was announced with.
    async fn accept_blk(&self, fetched: FetchedBlock, leader_sig: Vec<u8>, claim: FetchClaim) {
        let FetchedBlock {
            hash,
            block,
            commit_info,
            raw,
            peer,
        } = fetched;
        let height = block.header.height;

        if let Err(err) = self.blocks.store(&block, &commit_info) {
            warn!(height, %hash, %err, "Failed to store fetched block");
            return;
        }

        let ann = match BlockAnn::new(&block, &commit_info) {
            Ok(ann) => BlockAnn { leader_sig, ..ann },
            Err(err) => {
                warn!(height, %hash, %err, "Failed to encode block announcement");
                return;
            }
        };

        info!(height, %hash, %peer, txns = block.txns.len(), "Fetched committed block");

        self.purge_committed(&block);

        self.consensus
            .notify_block_commit(block, commit_info, hash, claim)
            .await;

        let gossip = self.gossip.clone();

        drop(tokio::spawn(async move {
            gossip.announce_blk(&ann, &raw, Some(peer)).await;
        }));
    }

    /// Drops the transactions of a committed block from the mempool and
    /// rechecks what remains.
    pub(crate) fn purge_committed(&self, block: &Block) {
        let mut removed = 0_usize;

        for tx in &block.txns {
            match tx.hash() {
                Ok(hash) => {
                    if self.mempool.remove(&hash).is_some() {
                        removed = removed.saturating_add(1);
                    }
                }
                Err(err) => warn!(%err, "Failed to hash committed transaction"),
            }
        }

        self.mempool.recheck(|tx| self.processor.check_tx(tx, true));

        debug!(
            height = block.header.height,
            removed,
            pooled = self.mempool.size().1,
            "Purged committed transactions"
        );
    }
}
