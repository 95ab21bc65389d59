use std::sync::Arc;

use eyre::Result as EyreResult;
use libp2p::PeerId;
use meridian_mempool::Admission;
use meridian_network::request::{request, write_all, GET_MSG, NO_DATA};
use meridian_network::Stream;
use meridian_primitives::hash::Hash;
use meridian_primitives::inflight::FetchClaim;
use tracing::{debug, info, warn};

use crate::fetch::{verify_tx, FetchedTx};
use crate::wire::read_hash;
use crate::Node;

impl Node {
    pub(super) async fn serve_tx(&self, stream: &mut Stream) -> EyreResult<()> {
        let config = self.gossip.config();

        let hash = read_hash(stream, config.request_read_timeout).await?;

        let resp = match self.lookup_tx(&hash) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(%hash, "Requested transaction not found");
                vec![NO_DATA]
            }
            Err(err) => {
                warn!(%hash, %err, "Failed to look up requested transaction");
                vec![NO_DATA]
            }
        };

        write_all(stream, &resp, config.request_write_timeout).await?;

        Ok(())
    }

    /// Pooled first, then confirmed.
    fn lookup_tx(&self, hash: &Hash) -> EyreResult<Option<Vec<u8>>> {
        if let Some(tx) = self.mempool.get(hash) {
            return Ok(Some(tx.encode()?));
        }

        match self.blocks.get_tx(hash)? {
            Some((tx, _, _)) => Ok(Some(tx.encode()?)),
            None => Ok(None),
        }
    }

    pub(super) async fn handle_tx_ann(&self, peer: PeerId, stream: &mut Stream) -> EyreResult<()> {
        let config = *self.gossip.config();

        let hash = read_hash(stream, config.ann_resp_timeout).await?;

        if self.blocks.have_tx(&hash)? {
            debug!(%hash, %peer, "Announced transaction already confirmed");
            return Ok(());
        }

        let Some(claim) = self.mempool.pre_fetch(hash) else {
            debug!(%hash, %peer, "Announced transaction already pooled or being fetched");
            return Ok(());
        };

        let pulled = request(
            stream,
            GET_MSG,
            config.tx_read_limit,
            config.request_deadlines(),
        )
        .await
        .map_err(eyre::Report::from)
        .and_then(|raw| {
            let tx = verify_tx(&raw, hash)?;
            Ok(FetchedTx { tx, raw, peer })
        });

        match pulled {
            Ok(fetched) => self.accept_tx(fetched, claim).await,
            Err(err) => {
                info!(%hash, %peer, %err, "Announcer did not provide the transaction, fetching from peers");

                let node = self.clone();

                drop(tokio::spawn(async move {
                    let config = node.gossip.config();

                    match node
                        .get_tx_with_retry(
                            hash,
                            config.retry_base_delay,
                            config.retry_attempts,
                            &node.cancel,
                        )
                        .await
                    {
                        Ok(fetched) => node.accept_tx(fetched, claim).await,
                        Err(err) => warn!(%hash, %err, "Failed to fetch announced transaction"),
                    }
                }));
            }
        }

        Ok(())
    }

    async fn accept_tx(&self, fetched: FetchedTx, claim: FetchClaim) {
        let FetchedTx { tx, raw, peer } = fetched;
        let hash = claim.hash();

        if let Err(err) = self.processor.check_tx(&tx, false) {
            info!(%hash, %peer, %err, "Rejected fetched transaction");
            return;
        }

        match self.mempool.store(hash, Arc::new(tx), raw.len()) {
            Admission::Stored => debug!(%hash, %peer, "Fetched transaction added to mempool"),
            Admission::AlreadyHave => return,
            Admission::Full => {
                warn!(%hash, "Mempool is full, dropping fetched transaction");
                return;
            }
        }

        claim.done();

        let gossip = self.gossip.clone();

        drop(tokio::spawn(async move {
            gossip.announce_tx(hash, &raw, Some(peer)).await;
        }));
    }
}
