//! Storage for the node: a column key-value [`Database`], the transaction
//! handles the block processor executes against, chain metadata and the
//! block store.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::Result as EyreResult;

use crate::db::{Column, Database, InMemoryDB};
use crate::state::{PreparedTx, ReadTx, SnapshotTx, WriteTx};
use crate::tx::Transaction;

pub mod blocks;
pub mod db;
pub mod error;
pub mod meta;
pub mod state;
pub mod tx;

pub use error::{is_fatal_db_error, DbError};

/// Shared handle to the node database.
#[derive(Clone)]
pub struct Store {
    db: Arc<dyn Database>,
    snapshots: Arc<AtomicU64>,
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            snapshots: Arc::default(),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDB::default()))
    }

    pub fn has(&self, col: Column, key: &[u8]) -> EyreResult<bool> {
        self.db.has(col, key)
    }

    pub fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        self.db.get(col, key)
    }

    pub fn last(&self, col: Column) -> EyreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.db.last(col)
    }

    pub fn apply(&self, tx: &Transaction) -> EyreResult<()> {
        self.db.apply(tx)
    }

    /// A read handle over committed state.
    #[must_use]
    pub fn begin_read(&self) -> ReadTx {
        ReadTx::new(self.clone())
    }

    /// A write transaction, committed in one step.
    #[must_use]
    pub fn begin_tx(&self) -> WriteTx {
        WriteTx::new(self.clone())
    }

    /// A two-phase transaction: precommit, then commit or rollback.
    #[must_use]
    pub fn begin_prepared(&self) -> PreparedTx {
        PreparedTx::new(self.clone())
    }

    /// A read handle over a frozen copy of committed state, with its id.
    pub fn begin_snapshot(&self) -> EyreResult<SnapshotTx> {
        let view = Self::new(self.db.snapshot()?);
        let seq = self.snapshots.fetch_add(1, Ordering::Relaxed);

        Ok(SnapshotTx::new(format!("snapshot-{seq}"), view))
    }
}
