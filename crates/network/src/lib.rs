//! Point-to-point stream networking for the sync protocol.
//!
//! A [`Host`] opens outbound streams to connected peers by protocol id and
//! delivers inbound streams as [`IncomingStream`]s. [`swarm`] provides the
//! libp2p host; [`memory`] an in-process one for simulation and tests.

use core::fmt;

use async_trait::async_trait;
use libp2p::{PeerId, StreamProtocol};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod admission;
pub mod backoff;
pub mod config;
pub mod memory;
pub mod request;
pub mod swarm;

/// A bidirectional byte stream to a peer.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type Stream = Box<dyn AsyncStream>;

pub struct IncomingStream {
    pub peer: PeerId,
    pub protocol: StreamProtocol,
    pub stream: Stream,
}

impl fmt::Debug for IncomingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingStream")
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpenStreamError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("peer {peer} does not support {protocol}")]
    UnsupportedProtocol {
        peer: PeerId,
        protocol: StreamProtocol,
    },
    #[error("host is shut down")]
    Closed,
    #[error("{0}")]
    Transport(String),
}

#[async_trait]
pub trait Host: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<Stream, OpenStreamError>;
}
