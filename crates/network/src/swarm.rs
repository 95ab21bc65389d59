//! libp2p-backed [`Host`].
//!
//! TCP with noise and yamux; `identify` and `ping` keep connections alive and
//! `libp2p-stream` carries the sync protocols. Disconnected bootstrap peers
//! are redialed with exponential backoff.

use core::time::Duration;
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{bail, Result as EyreResult};
use futures_util::StreamExt;
use libp2p::identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig};
use libp2p::noise::Config as NoiseConfig;
use libp2p::ping::Behaviour as PingBehaviour;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::tcp::Config as TcpConfig;
use libp2p::yamux::Config as YamuxConfig;
use libp2p::{PeerId, StreamProtocol, Swarm, SwarmBuilder};
use libp2p_identity::Keypair;
use libp2p_stream::{Behaviour as StreamBehaviour, Control, IncomingStreams};
use multiaddr::{Multiaddr, Protocol};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio::{select, spawn};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::NetworkConfig;
use crate::{Host, IncomingStream, OpenStreamError, Stream};

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const INBOUND_CAPACITY: usize = 128;

const REDIAL_TICK: Duration = Duration::from_secs(1);
const REDIAL_BASE_DELAY: Duration = Duration::from_secs(1);
const REDIAL_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: IdentifyBehaviour,
    ping: PingBehaviour,
    stream: StreamBehaviour,
}

#[derive(Clone)]
pub struct SwarmHost {
    local_peer_id: PeerId,
    control: Control,
    peers: Arc<RwLock<BTreeSet<PeerId>>>,
}

impl core::fmt::Debug for SwarmHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwarmHost")
            .field("local_peer_id", &self.local_peer_id)
            .field("peers", &self.peers.read().len())
            .finish_non_exhaustive()
    }
}

/// Starts the swarm, accepting inbound streams for `protocols`.
pub fn start(
    identity: Keypair,
    config: &NetworkConfig,
    protocols: &[StreamProtocol],
) -> EyreResult<(SwarmHost, mpsc::Receiver<IncomingStream>)> {
    let local_peer_id = identity.public().to_peer_id();

    let mut swarm = SwarmBuilder::with_existing_identity(identity)
        .with_tokio()
        .with_tcp(TcpConfig::default(), NoiseConfig::new, YamuxConfig::default)?
        .with_behaviour(|key| Behaviour {
            identify: IdentifyBehaviour::new(IdentifyConfig::new(
                PROTOCOL_VERSION.to_owned(),
                key.public(),
            )),
            ping: PingBehaviour::default(),
            stream: StreamBehaviour::new(),
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(config.idle_timeout))
        .build();

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let mut control = swarm.behaviour().stream.new_control();

    for protocol in protocols {
        let incoming = match control.accept(protocol.clone()) {
            Ok(incoming) => incoming,
            Err(err) => bail!("Failed to accept streams for {protocol}: {err:?}"),
        };

        drop(spawn(forward_incoming(
            protocol.clone(),
            incoming,
            inbound_tx.clone(),
        )));
    }

    for addr in &config.listen {
        let _listener = swarm.listen_on(addr.clone())?;
    }

    let mut bootstrap = Vec::with_capacity(config.bootstrap.len());

    for addr in &config.bootstrap {
        let mut peer_addr = addr.clone();

        let Some(Protocol::P2p(peer_id)) = peer_addr.pop() else {
            bail!("Failed to parse peer id from addr {:?}", addr);
        };

        bootstrap.push(BootstrapPeer {
            peer_id,
            addr: addr.clone(),
            backoff: Backoff::new(0, REDIAL_BASE_DELAY, REDIAL_MAX_DELAY, true),
        });
    }

    let peers = Arc::default();

    let mut event_loop = EventLoop {
        swarm: Box::new(swarm),
        peers: Arc::clone(&peers),
        bootstrap,
    };

    event_loop.redial_bootstrap();

    drop(spawn(event_loop.run()));

    info!(%local_peer_id, "Network started");

    let host = SwarmHost {
        local_peer_id,
        control,
        peers,
    };

    Ok((host, inbound_rx))
}

async fn forward_incoming(
    protocol: StreamProtocol,
    mut incoming: IncomingStreams,
    inbound: mpsc::Sender<IncomingStream>,
) {
    while let Some((peer, stream)) = incoming.next().await {
        let stream = IncomingStream {
            peer,
            protocol: protocol.clone(),
            stream: Box::new(stream.compat()),
        };

        if inbound.send(stream).await.is_err() {
            debug!(%protocol, "Inbound stream receiver dropped");
            break;
        }
    }
}

/// A configured peer that is redialed whenever it is not connected.
struct BootstrapPeer {
    peer_id: PeerId,
    addr: Multiaddr,
    backoff: Backoff,
}

struct EventLoop {
    swarm: Box<Swarm<Behaviour>>,
    peers: Arc<RwLock<BTreeSet<PeerId>>>,
    bootstrap: Vec<BootstrapPeer>,
}

impl EventLoop {
    async fn run(mut self) {
        let mut redial = interval(REDIAL_TICK);
        redial.set_missed_tick_behavior(MissedTickBehavior::Delay);

        #[expect(clippy::redundant_pub_crate, reason = "Tokio code")]
        loop {
            select! {
                event = self.swarm.next() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle_swarm_event(event);
                }
                _ = redial.tick() => self.redial_bootstrap(),
            }
        }
    }

    /// Dials every disconnected bootstrap peer whose backoff allows it.
    fn redial_bootstrap(&mut self) {
        for peer in &mut self.bootstrap {
            if self.peers.read().contains(&peer.peer_id) || !peer.backoff.try_now() {
                continue;
            }

            debug!(peer_id = %peer.peer_id, attempt = peer.backoff.tries(), "Dialing bootstrap peer");

            if let Err(err) = self.swarm.dial(peer.addr.clone()) {
                warn!(peer_id = %peer.peer_id, %err, "Failed to dial bootstrap peer");
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Listening on");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                if let Some(peer) = self.bootstrap.iter_mut().find(|p| p.peer_id == peer_id) {
                    peer.backoff.reset();
                }

                if self.peers.write().insert(peer_id) {
                    info!(%peer_id, "Peer connected");
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 && self.peers.write().remove(&peer_id) {
                    info!(%peer_id, "Peer disconnected");
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(?peer_id, %error, "Outgoing connection failed");
            }
            SwarmEvent::Behaviour(BehaviourEvent::Identify(event)) => {
                debug!(?event, "Identify event");
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Host for SwarmHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.read().iter().copied().collect()
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<Stream, OpenStreamError> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, protocol.clone())
            .await
            .map_err(|err| match err {
                libp2p_stream::OpenStreamError::UnsupportedProtocol(_) => {
                    OpenStreamError::UnsupportedProtocol { peer, protocol }
                }
                err => OpenStreamError::Transport(err.to_string()),
            })?;

        Ok(Box::new(stream.compat()))
    }
}
