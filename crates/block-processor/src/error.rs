use meridian_primitives::auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessorError {
    #[error("network is halted for migration")]
    HaltedForMigration,
    #[error("wrong chain ID: {0}")]
    WrongChainId(String),
    #[error("failed to verify the transaction: {0}")]
    Verification(#[from] AuthError),
    /// Admission rejected by the transaction application, reported verbatim.
    #[error(transparent)]
    Admission(eyre::Report),
    #[error("fatal db error during block execution: {0}")]
    FatalDb(eyre::Report),
    #[error("block execution cancelled")]
    Cancelled,
    #[error("no block is being executed")]
    NoOpenTransaction,
    #[error("genesis initialization failed: {0}")]
    Genesis(eyre::Report),
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl ProcessorError {
    /// Whether the node must stop rather than continue with possibly
    /// inconsistent state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalDb(_) | Self::Genesis(_))
    }
}
