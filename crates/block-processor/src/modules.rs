//! The collaborators the block processor drives. Only their call contracts
//! matter here; the node supplies the implementations.

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result as EyreResult;
use meridian_primitives::chain::{BlockContext, ChainContext, TxContext};
use meridian_primitives::genesis::GenesisConfig;
use meridian_primitives::hash::Hash;
use meridian_primitives::params::MigrationStatus;
use meridian_primitives::transaction::{Transaction, VotableEvent};
use meridian_primitives::validator::{Account, AccountId, Validator};
use meridian_store::state::{Changeset, ReadAccess, SnapshotTx, WriteAccess};
use tokio::sync::mpsc;

/// Outcome of executing one transaction.
#[derive(Debug)]
pub struct TxResponse {
    pub code: u32,
    pub gas: i64,
    /// `None` on success.
    pub error: Option<eyre::Report>,
}

/// Join requests resolved while finalizing a block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Finalized {
    pub approved_joins: Vec<AccountId>,
    pub expired_joins: Vec<AccountId>,
}

/// The transaction application engine.
pub trait TxApp: Send + Sync {
    fn begin(&self, height: i64) -> EyreResult<()>;

    fn execute(
        &self,
        ctx: &mut TxContext<'_>,
        db: &mut dyn WriteAccess,
        tx: &Transaction,
    ) -> TxResponse;

    /// Runs end-of-block hooks. Validator updates become visible through
    /// [`ValidatorModule::validator_updates`].
    fn finalize(&self, db: &mut dyn WriteAccess, block: &mut BlockContext) -> EyreResult<Finalized>;

    fn commit(&self) -> EyreResult<()>;

    /// Discards uncommitted in-memory state.
    fn rollback(&self);

    /// Admits `tx` into the mempool view of account state.
    fn apply_mempool(
        &self,
        ctx: &mut TxContext<'_>,
        db: &dyn ReadAccess,
        tx: &Transaction,
    ) -> EyreResult<()>;

    fn genesis_init(
        &self,
        db: &mut dyn WriteAccess,
        genesis: &GenesisConfig,
        chain: &ChainContext,
    ) -> EyreResult<()>;

    fn price(&self, db: &dyn ReadAccess, tx: &Transaction, chain: &ChainContext)
        -> EyreResult<u128>;

    /// `pending` includes mempool-admitted but unconfirmed changes.
    fn account_info(&self, db: &dyn ReadAccess, id: &AccountId, pending: bool)
        -> EyreResult<Account>;
}

pub trait Accounts: Send + Sync {
    /// Accounts modified by the block being executed.
    fn updates(&self) -> Vec<Account>;
}

pub trait ValidatorModule: Send + Sync {
    fn get_validators(&self) -> Vec<Validator>;

    /// Changes made by the block being executed.
    fn validator_updates(&self) -> Vec<Validator>;
}

pub trait SnapshotModule: Send + Sync {
    fn enabled(&self) -> bool;

    fn is_snapshot_due(&self, height: i64) -> bool;

    fn create_snapshot(&self, view: &SnapshotTx, height: i64) -> EyreResult<()>;

    /// Heights of the snapshots on disk.
    fn list_snapshots(&self) -> Vec<i64>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationMetadata {
    pub status: MigrationStatus,
    pub start_height: i64,
    pub end_height: i64,
}

#[async_trait]
pub trait MigratorModule: Send + Sync {
    /// May record parameter updates in `block.chain_context.network_updates`.
    fn notify_height(&self, block: &mut BlockContext, db: &mut dyn WriteAccess) -> EyreResult<()>;

    /// Consumes the changesets of the block at `height` until the channel
    /// closes.
    async fn store_changesets(
        &self,
        height: i64,
        changesets: mpsc::Receiver<Changeset>,
    ) -> EyreResult<()>;

    fn persist_last_changeset_height(&self, db: &mut dyn WriteAccess, height: i64)
        -> EyreResult<()>;

    fn get_migration_metadata(&self, status: MigrationStatus) -> EyreResult<MigrationMetadata>;
}

pub trait EventStore: Send + Sync {
    /// Events with no resolution yet.
    fn get_events(&self, db: &dyn ReadAccess) -> EyreResult<Vec<VotableEvent>>;

    /// Ids of observed events not yet voted on by this node.
    fn unbroadcasted_events(&self) -> EyreResult<Vec<Hash>>;

    fn mark_broadcasted(&self, ids: &[Hash]) -> EyreResult<()>;

    fn update_stats(&self, proposed_events: usize);
}

/// Submits a locally authored transaction to the network.
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    async fn broadcast_tx(&self, tx: Transaction) -> EyreResult<Hash>;
}

/// The set of peers allowed to connect, keyed by `hex(identifier)#key_type`.
pub trait PeerWhitelist: Send + Sync {
    fn add_peer(&self, node_id: &str) -> EyreResult<()>;

    fn remove_peer(&self, node_id: &str) -> EyreResult<()>;
}

#[derive(Clone)]
pub struct Modules {
    pub txapp: Arc<dyn TxApp>,
    pub accounts: Arc<dyn Accounts>,
    pub validators: Arc<dyn ValidatorModule>,
    pub snapshots: Arc<dyn SnapshotModule>,
    pub events: Arc<dyn EventStore>,
    pub migrator: Arc<dyn MigratorModule>,
}

impl core::fmt::Debug for Modules {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Modules").finish_non_exhaustive()
    }
}
