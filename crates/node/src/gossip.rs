//! Outbound advertisements.

use core::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use libp2p::{PeerId, StreamProtocol};
use meridian_network::admission::PeerSlots;
use meridian_network::request::{advertise_to_peer, Advertised, Deadlines};
use meridian_network::Host;
use meridian_primitives::hash::Hash;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::protocols;
use crate::wire::BlockAnn;

#[derive(Clone)]
pub(crate) struct Gossip {
    host: Arc<dyn Host>,
    slots: Arc<PeerSlots>,
    config: SyncConfig,
}

impl fmt::Debug for Gossip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gossip")
            .field("local_peer_id", &self.host.local_peer_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Gossip {
    pub(crate) fn new(host: Arc<dyn Host>, config: SyncConfig) -> Self {
        Self {
            host,
            slots: Arc::new(PeerSlots::new(config.ann_queue_depth)),
            config,
        }
    }

    pub(crate) fn host(&self) -> &dyn Host {
        &*self.host
    }

    pub(crate) const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Connected peers in random order.
    pub(crate) fn peers(&self) -> Vec<PeerId> {
        let mut peers = self.host.peers();
        peers.shuffle(&mut rand::thread_rng());
        peers
    }

    /// Advertises `ann` to every connected peer except `except`, sending
    /// `content` to those that pull it.
    async fn announce(
        &self,
        protocol: &StreamProtocol,
        ann: &[u8],
        content: &[u8],
        deadlines: Deadlines,
        except: Option<PeerId>,
    ) {
        let local = self.host.local_peer_id();

        debug!(%protocol, busy_peers = self.slots.active_peers(), "Advertising to peers");

        let sends = self
            .host
            .peers()
            .into_iter()
            .filter(|peer| *peer != local && Some(*peer) != except)
            .map(|peer| self.advertise(peer, protocol.clone(), ann, content, deadlines));

        let _sent = join_all(sends).await;
    }

    async fn advertise(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
        ann: &[u8],
        content: &[u8],
        deadlines: Deadlines,
    ) {
        let Some(_slot) = self.slots.acquire(peer).await else {
            return;
        };

        match advertise_to_peer(&*self.host, peer, protocol.clone(), ann, content, deadlines).await
        {
            Ok(Advertised::Sent) => debug!(%peer, %protocol, "Peer pulled advertised content"),
            Ok(Advertised::Declined) => {}
            Err(err) => info!(%peer, %protocol, %err, "Failed to advertise to peer"),
        }
    }

    pub(crate) async fn announce_tx(&self, hash: Hash, raw: &[u8], except: Option<PeerId>) {
        debug!(%hash, "Announcing transaction");

        self.announce(
            &protocols::TX_ANN,
            hash.as_ref(),
            raw,
            self.config.ann_deadlines(),
            except,
        )
        .await;
    }

    /// Announces a committed block. `except` is the peer it came from, if it
    /// did not originate here.
    pub(crate) async fn announce_blk(&self, ann: &BlockAnn, raw: &[u8], except: Option<PeerId>) {
        let encoded = match ann.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                info!(hash = %ann.hash, %err, "Failed to encode block announcement");
                return;
            }
        };

        debug!(height = ann.height, hash = %ann.hash, "Announcing block");

        self.announce(
            &protocols::BLK_ANN,
            &encoded,
            raw,
            self.config.blk_ann_deadlines(),
            except,
        )
        .await;
    }
}
