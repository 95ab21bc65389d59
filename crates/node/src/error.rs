use thiserror::Error;

/// Terminal outcome of a fetch that found nothing usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("block not available from any peer")]
    BlockNotFound,
    #[error("transaction not available from any peer")]
    TxNotFound,
    #[error("fetch cancelled")]
    Cancelled,
    #[error("no connected peers")]
    NoPeers,
}
