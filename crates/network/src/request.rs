//! Request/response and advertise/pull exchanges over a single stream.
//!
//! Every exchange is bounded by [`Deadlines`]. A response consisting of the
//! single byte [`NO_DATA`] means the responder does not have the object; an
//! empty response means it hung up without answering.

use core::time::Duration;
use std::io;

use libp2p::{PeerId, StreamProtocol};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::{Host, OpenStreamError};

/// Sentinel response for "object not available".
pub const NO_DATA: u8 = 0x00;

/// Pull request sent back on an advertisement stream.
pub const GET_MSG: &[u8; 3] = b"get";

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    pub read: Duration,
    pub write: Duration,
}

impl Deadlines {
    #[must_use]
    pub const fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RequestError {
    #[error("resource not available")]
    NotFound,
    #[error("no response")]
    NoResponse,
    #[error("timed out")]
    Timeout,
    #[error("response exceeds {0} bytes")]
    ReadLimitExceeded(u64),
    #[error("unexpected message from peer")]
    UnexpectedMessage,
    #[error(transparent)]
    Open(#[from] OpenStreamError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RequestError {
    /// Whether the peer answered that it lacks the object, or did not answer.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoResponse)
    }
}

/// Outcome of an advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advertised {
    /// The peer pulled the content.
    Sent,
    /// The peer hung up without asking for it.
    Declined,
}

pub async fn write_all<S: AsyncWrite + Unpin + ?Sized>(
    stream: &mut S,
    data: &[u8],
    deadline: Duration,
) -> Result<(), RequestError> {
    timeout(deadline, async {
        stream.write_all(data).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| RequestError::Timeout)??;

    Ok(())
}

/// Reads until the peer closes its side, failing past `limit` bytes.
pub async fn read_to_end<S: AsyncRead + Unpin + ?Sized>(
    stream: &mut S,
    limit: u64,
    deadline: Duration,
) -> Result<Vec<u8>, RequestError> {
    let mut buf = Vec::new();

    let _read = timeout(
        deadline,
        (&mut *stream)
            .take(limit.saturating_add(1))
            .read_to_end(&mut buf),
    )
    .await
    .map_err(|_| RequestError::Timeout)??;

    if u64::try_from(buf.len()).map_or(true, |len| len > limit) {
        return Err(RequestError::ReadLimitExceeded(limit));
    }

    Ok(buf)
}

/// Sends `req` and reads the full response.
pub async fn request<S: AsyncRead + AsyncWrite + Unpin + ?Sized>(
    stream: &mut S,
    req: &[u8],
    limit: u64,
    deadlines: Deadlines,
) -> Result<Vec<u8>, RequestError> {
    write_all(stream, req, deadlines.write).await?;

    let resp = read_to_end(stream, limit, deadlines.read).await?;

    match resp.as_slice() {
        [] => Err(RequestError::NoResponse),
        [NO_DATA] => Err(RequestError::NotFound),
        _ => Ok(resp),
    }
}

/// Opens a stream to `peer` and performs [`request`] on it.
pub async fn request_from(
    host: &dyn Host,
    peer: PeerId,
    protocol: StreamProtocol,
    req: &[u8],
    limit: u64,
    deadlines: Deadlines,
) -> Result<Vec<u8>, RequestError> {
    let mut stream = timeout(deadlines.write, host.open_stream(peer, protocol))
        .await
        .map_err(|_| RequestError::Timeout)??;

    let resp = request(&mut stream, req, limit, deadlines).await;

    let _ignored = stream.shutdown().await;

    resp
}

/// Sends `ann` and, if the peer asks for it, `content`.
pub async fn advertise<S: AsyncRead + AsyncWrite + Unpin + ?Sized>(
    stream: &mut S,
    ann: &[u8],
    content: &[u8],
    deadlines: Deadlines,
) -> Result<Advertised, RequestError> {
    write_all(stream, ann, deadlines.write).await?;

    let mut req = [0_u8; GET_MSG.len()];

    match timeout(deadlines.read, stream.read_exact(&mut req)).await {
        Err(_) => return Err(RequestError::Timeout),
        Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(Advertised::Declined)
        }
        Ok(Err(err)) => return Err(err.into()),
        Ok(Ok(_)) => {}
    }

    if &req != GET_MSG {
        return Err(RequestError::UnexpectedMessage);
    }

    write_all(stream, content, deadlines.write).await?;

    Ok(Advertised::Sent)
}

/// Opens a stream to `peer` and performs [`advertise`] on it.
pub async fn advertise_to_peer(
    host: &dyn Host,
    peer: PeerId,
    protocol: StreamProtocol,
    ann: &[u8],
    content: &[u8],
    deadlines: Deadlines,
) -> Result<Advertised, RequestError> {
    let mut stream = timeout(deadlines.write, host.open_stream(peer, protocol.clone()))
        .await
        .map_err(|_| RequestError::Timeout)??;

    let outcome = advertise(&mut stream, ann, content, deadlines).await;

    let _ignored = stream.shutdown().await;

    if let Ok(Advertised::Declined) = outcome {
        debug!(%peer, %protocol, "Peer declined advertised content");
    }

    outcome
}
