//! Block and transaction synchronization between peers, and the node that
//! wires it to the block processor.
//!
//! Objects are content addressed. A node advertises what it has, peers pull
//! what they lack over the same stream, verify it against the advertised hash,
//! store it, and advertise it onward. Anything missed is fetched by hash or
//! height from whichever peer has it.

use core::fmt;
use std::sync::Arc;

use eyre::{Result as EyreResult, WrapErr};
use libp2p::PeerId;
use meridian_block_processor::{BlockProcessor, Modules};
use meridian_mempool::Mempool;
use meridian_network::{swarm, Host, IncomingStream};
use meridian_primitives::auth::{KeyType, Signer};
use meridian_primitives::block::{Block, CommitInfo};
use meridian_primitives::hash::Hash;
use meridian_primitives::transaction::Transaction;
use meridian_primitives::validator::Validator;
use meridian_store::blocks::BlockStore;
use meridian_store::Store;
use parking_lot::RwLock;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gossip::Gossip;
use crate::relay::TxRelay;
use crate::wire::BlockAnn;

pub mod config;
pub mod consensus;
pub mod error;
mod fetch;
mod gossip;
mod handlers;
pub mod protocols;
mod relay;
pub mod wire;

pub use config::{NodeConfig, SyncConfig};
pub use consensus::ConsensusEngine;
pub use error::FetchError;
pub use fetch::{FetchedBlock, FetchedTx};
pub use relay::Whitelist;

/// Pooled transactions re-announced per interval.
const REANNOUNCE_BATCH: usize = 100;

/// What this node does in the current validator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Leader,
    Validator,
    Sentry,
}

impl Role {
    fn of(key: &[u8], key_type: KeyType, leader: &[u8], validators: &[Validator]) -> Self {
        if key == leader {
            return Self::Leader;
        }

        if validators
            .iter()
            .any(|v| v.identifier == key && v.key_type == key_type)
        {
            return Self::Validator;
        }

        Self::Sentry
    }
}

#[derive(Clone)]
pub struct Node {
    gossip: Gossip,
    relay: TxRelay,
    processor: Arc<BlockProcessor>,
    blocks: BlockStore,
    mempool: Mempool,
    consensus: Arc<dyn ConsensusEngine>,
    whitelist: Whitelist,
    role: Arc<RwLock<Role>>,
    cancel: CancellationToken,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("peer_id", &self.local_peer_id())
            .field("role", &self.role())
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

pub async fn start(
    config: NodeConfig,
    store: Store,
    modules: Modules,
    consensus: Arc<dyn ConsensusEngine>,
    cancel: CancellationToken,
) -> EyreResult<()> {
    let peer_id = config.identity.public().to_peer_id();

    info!(%peer_id, home = %config.home, "Starting node");

    let signer = Signer::from_keypair(&config.identity)?;

    let blocks = BlockStore::open(store.clone()).wrap_err("failed to open the block store")?;

    let processor = Arc::new(BlockProcessor::new(
        store,
        &blocks,
        modules,
        config.genesis,
        signer,
    )?);

    if !processor.is_initialized() {
        let _head = processor.init_chain().await?;
    }

    let mempool = Mempool::new(config.mempool.max_bytes);

    let (host, incoming) = swarm::start(config.identity, &config.network, &protocols::ALL)?;

    let node = Node::new(
        Arc::new(host),
        processor,
        blocks,
        mempool,
        consensus,
        config.sync,
        cancel,
    );

    node.run(incoming).await;

    Ok(())
}

impl Node {
    /// Registers the node as the processor's transaction broadcaster and
    /// peer whitelist.
    pub fn new(
        host: Arc<dyn Host>,
        processor: Arc<BlockProcessor>,
        blocks: BlockStore,
        mempool: Mempool,
        consensus: Arc<dyn ConsensusEngine>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        let gossip = Gossip::new(host, config);
        let relay = TxRelay::new(gossip.clone(), mempool.clone(), &processor);
        let whitelist = Whitelist::default();

        processor.set_callbacks(Arc::new(relay.clone()), Arc::new(whitelist.clone()));

        let role = Role::of(
            &processor.public_key(),
            processor.key_type(),
            &processor.consensus_params().leader,
            &processor.get_validators(),
        );

        Self {
            gossip,
            relay,
            processor,
            blocks,
            mempool,
            consensus,
            whitelist,
            role: Arc::new(RwLock::new(role)),
            cancel,
        }
    }

    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.gossip.host().local_peer_id()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        *self.role.read()
    }

    #[must_use]
    pub const fn processor(&self) -> &Arc<BlockProcessor> {
        &self.processor
    }

    #[must_use]
    pub const fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    #[must_use]
    pub const fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    #[must_use]
    pub const fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Serves inbound streams and re-announces pooled transactions until
    /// cancelled or the host shuts down.
    pub async fn run(&self, mut incoming: mpsc::Receiver<IncomingStream>) {
        let period = self.gossip.config().tx_reannounce_interval;
        let mut reannounce = interval_at(
            Instant::now().checked_add(period).unwrap_or_else(Instant::now),
            period,
        );
        reannounce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut validators = self.processor.subscribe_validators();

        let best = self.blocks.best();

        info!(
            peer_id = %self.local_peer_id(),
            role = ?self.role(),
            best_height = best.height,
            best_hash = %best.hash,
            "Node started"
        );

        #[expect(clippy::redundant_pub_crate, reason = "Tokio code")]
        loop {
            select! {
                () = self.cancel.cancelled() => break,
                stream = incoming.recv() => {
                    let Some(stream) = stream else {
                        break;
                    };
                    self.handle_stream(stream);
                }
                Some(validators) = validators.recv() => self.update_role(&validators),
                _ = reannounce.tick() => self.reannounce_mempool(),
            }
        }

        self.processor.close().await;

        info!("Node stopped");
    }

    fn update_role(&self, validators: &[Validator]) {
        let role = Role::of(
            &self.processor.public_key(),
            self.processor.key_type(),
            &self.processor.consensus_params().leader,
            validators,
        );

        let prev = core::mem::replace(&mut *self.role.write(), role);

        if prev != role {
            info!(?prev, ?role, "Node role changed");
        }
    }

    fn reannounce_mempool(&self) {
        let pending = self.mempool.peek_n(REANNOUNCE_BATCH, None);

        if pending.is_empty() {
            return;
        }

        debug!(count = pending.len(), "Re-announcing pooled transactions");

        let gossip = self.gossip.clone();

        drop(tokio::spawn(async move {
            for (hash, tx) in pending {
                let Ok(raw) = tx.encode() else {
                    continue;
                };

                gossip.announce_tx(hash, &raw, None).await;
            }
        }));
    }

    /// Checks a locally submitted transaction, pools it and announces it to
    /// every peer.
    pub async fn broadcast_tx(&self, tx: Transaction) -> EyreResult<Hash> {
        self.relay.broadcast(tx).await
    }

    /// Announces a block committed here.
    pub async fn announce_blk(&self, block: &Block, commit_info: &CommitInfo) -> EyreResult<()> {
        let ann = BlockAnn::new(block, commit_info)?;
        let raw = block.encode()?;

        self.purge_committed(block);

        self.gossip.announce_blk(&ann, &raw, None).await;

        Ok(())
    }
}
