//! Local transaction submission and the hooks the block processor calls back
//! into.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use eyre::{bail, OptionExt, Result as EyreResult};
use meridian_block_processor::modules::{PeerWhitelist, TxBroadcaster};
use meridian_block_processor::BlockProcessor;
use meridian_mempool::{Admission, Mempool};
use meridian_primitives::hash::Hash;
use meridian_primitives::transaction::Transaction;
use parking_lot::RwLock;
use tracing::debug;

use crate::gossip::Gossip;

/// Checks, pools and announces transactions submitted on this node.
///
/// Holds the processor weakly since the processor holds the relay.
#[derive(Clone, Debug)]
pub(crate) struct TxRelay {
    gossip: Gossip,
    mempool: Mempool,
    processor: Weak<BlockProcessor>,
}

impl TxRelay {
    pub(crate) fn new(gossip: Gossip, mempool: Mempool, processor: &Arc<BlockProcessor>) -> Self {
        Self {
            gossip,
            mempool,
            processor: Arc::downgrade(processor),
        }
    }

    pub(crate) async fn broadcast(&self, tx: Transaction) -> EyreResult<Hash> {
        let hash = tx.hash()?;
        let raw = tx.encode()?;

        if !self.mempool.have(&hash) {
            let processor = self
                .processor
                .upgrade()
                .ok_or_eyre("block processor is closed")?;

            processor.check_tx(&tx, false)?;

            match self.mempool.store(hash, Arc::new(tx), raw.len()) {
                Admission::Stored => debug!(%hash, "Transaction added to mempool"),
                Admission::AlreadyHave => {}
                Admission::Full => bail!("mempool is full"),
            }
        }

        self.gossip.announce_tx(hash, &raw, None).await;

        Ok(hash)
    }
}

#[async_trait]
impl TxBroadcaster for TxRelay {
    async fn broadcast_tx(&self, tx: Transaction) -> EyreResult<Hash> {
        self.broadcast(tx).await
    }
}

/// Node identifiers the validator set admits as peers.
#[derive(Clone, Debug, Default)]
pub struct Whitelist {
    peers: Arc<RwLock<BTreeSet<String>>>,
}

impl Whitelist {
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.read().contains(node_id)
    }

    #[must_use]
    pub fn peers(&self) -> Vec<String> {
        self.peers.read().iter().cloned().collect()
    }
}

impl PeerWhitelist for Whitelist {
    fn add_peer(&self, node_id: &str) -> EyreResult<()> {
        if self.peers.write().insert(node_id.to_owned()) {
            debug!(node_id, "Peer whitelisted");
        }

        Ok(())
    }

    fn remove_peer(&self, node_id: &str) -> EyreResult<()> {
        if self.peers.write().remove(node_id) {
            debug!(node_id, "Peer removed from whitelist");
        }

        Ok(())
    }
}
