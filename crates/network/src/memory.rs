//! An in-process network of hosts joined by `tokio::io::duplex` pipes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use libp2p::{PeerId, StreamProtocol};
use parking_lot::Mutex;
use tokio::io::duplex;
use tokio::sync::mpsc;

use crate::{Host, IncomingStream, OpenStreamError, Stream};

const PIPE_BUFFER: usize = 64 * 1024;
const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Registry {
    inbound: BTreeMap<PeerId, mpsc::Sender<IncomingStream>>,
    links: BTreeMap<PeerId, BTreeSet<PeerId>>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host with a fresh identity.
    pub fn add_host(&self) -> (MemoryHost, mpsc::Receiver<IncomingStream>) {
        self.add_host_with_id(PeerId::random())
    }

    pub fn add_host_with_id(&self, peer_id: PeerId) -> (MemoryHost, mpsc::Receiver<IncomingStream>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let mut registry = self.registry.lock();
        let _prev = registry.inbound.insert(peer_id, tx);
        let _links = registry.links.entry(peer_id).or_default();

        let host = MemoryHost {
            network: self.clone(),
            peer_id,
        };

        (host, rx)
    }

    pub fn connect(&self, a: PeerId, b: PeerId) {
        let mut registry = self.registry.lock();
        let _new = registry.links.entry(a).or_default().insert(b);
        let _new = registry.links.entry(b).or_default().insert(a);
    }

    pub fn disconnect(&self, a: PeerId, b: PeerId) {
        let mut registry = self.registry.lock();
        if let Some(links) = registry.links.get_mut(&a) {
            let _removed = links.remove(&b);
        }
        if let Some(links) = registry.links.get_mut(&b) {
            let _removed = links.remove(&a);
        }
    }

    /// Connects every pair of `peers`.
    pub fn connect_all(&self, peers: &[PeerId]) {
        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i.saturating_add(1)) {
                self.connect(*a, *b);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryHost {
    network: MemoryNetwork,
    peer_id: PeerId,
}

#[async_trait]
impl Host for MemoryHost {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn peers(&self) -> Vec<PeerId> {
        self.network
            .registry
            .lock()
            .links
            .get(&self.peer_id)
            .map(|links| links.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<Stream, OpenStreamError> {
        let inbound = {
            let registry = self.network.registry.lock();

            let linked = registry
                .links
                .get(&self.peer_id)
                .is_some_and(|links| links.contains(&peer));

            if !linked {
                return Err(OpenStreamError::NotConnected(peer));
            }

            registry
                .inbound
                .get(&peer)
                .cloned()
                .ok_or(OpenStreamError::NotConnected(peer))?
        };

        let (local, remote) = duplex(PIPE_BUFFER);

        inbound
            .send(IncomingStream {
                peer: self.peer_id,
                protocol,
                stream: Box::new(remote),
            })
            .await
            .map_err(|_| OpenStreamError::Closed)?;

        Ok(Box::new(local))
    }
}
