//! Transaction handles over a [`Store`].
//!
//! Writes are buffered in a [`Transaction`] and read back by the same handle
//! before they reach the database. A [`PreparedTx`] adds a precommit phase
//! that streams its pending writes as [`Changeset`]s and fixes their digest.

use borsh::BorshSerialize;
use eyre::Result as EyreResult;
use meridian_primitives::hash::{Hash, Hasher};
use tokio::sync::mpsc;
use tracing::debug;

use crate::db::Column;
use crate::error::DbError;
use crate::tx::{Operation, Transaction};
use crate::Store;

pub trait ReadAccess {
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>>;

    fn has(&self, col: Column, key: &[u8]) -> EyreResult<bool> {
        Ok(self.get(col, key)?.is_some())
    }
}

pub trait WriteAccess: ReadAccess {
    fn put(&mut self, col: Column, key: &[u8], value: Vec<u8>);
    fn delete(&mut self, col: Column, key: &[u8]);
}

/// One row-level mutation produced by executing a block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize)]
pub struct Changeset {
    pub column: Column,
    pub key: Vec<u8>,
    /// `None` for a deletion.
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct ReadTx {
    store: Store,
}

impl ReadTx {
    pub(crate) const fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ReadAccess for ReadTx {
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        self.store.get(col, key)
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotTx {
    id: String,
    view: Store,
}

impl SnapshotTx {
    pub(crate) const fn new(id: String, view: Store) -> Self {
        Self { id, view }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl ReadAccess for SnapshotTx {
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        self.view.get(col, key)
    }
}

fn overlay_get(
    store: &Store,
    pending: &Transaction,
    col: Column,
    key: &[u8],
) -> EyreResult<Option<Vec<u8>>> {
    match pending.get(col, key) {
        Some(Operation::Put { value }) => Ok(Some(value.clone())),
        Some(Operation::Delete) => Ok(None),
        None => store.get(col, key),
    }
}

/// A single-phase write transaction.
#[derive(Debug)]
pub struct WriteTx {
    store: Store,
    pending: Transaction,
}

impl WriteTx {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            pending: Transaction::default(),
        }
    }

    pub fn commit(self) -> EyreResult<()> {
        self.store.apply(&self.pending)
    }

    pub fn rollback(self) {}
}

impl ReadAccess for WriteTx {
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        overlay_get(&self.store, &self.pending, col, key)
    }
}

impl WriteAccess for WriteTx {
    fn put(&mut self, col: Column, key: &[u8], value: Vec<u8>) {
        self.pending.put(col, key.to_vec(), value);
    }

    fn delete(&mut self, col: Column, key: &[u8]) {
        self.pending.delete(col, key.to_vec());
    }
}

/// A two-phase write transaction.
#[derive(Debug)]
pub struct PreparedTx {
    store: Store,
    pending: Transaction,
    precommitted: Option<Hash>,
}

impl PreparedTx {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            pending: Transaction::default(),
            precommitted: None,
        }
    }

    /// Ends the execute phase. Sends every pending write, in column then key
    /// order, to `changesets` when given, and returns the digest of that
    /// sequence. No writes are accepted afterwards.
    pub async fn precommit(
        &mut self,
        changesets: Option<&mpsc::Sender<Changeset>>,
    ) -> EyreResult<Hash> {
        if self.precommitted.is_some() {
            return Err(DbError::AlreadyPrecommitted.into());
        }

        let mut hasher = Hasher::default();
        let mut delivered = changesets.is_some();

        for (column, key, op) in self.pending.iter() {
            let changeset = Changeset {
                column,
                key: key.to_vec(),
                value: match op {
                    Operation::Put { value } => Some(value.clone()),
                    Operation::Delete => None,
                },
            };

            changeset.serialize(&mut hasher)?;

            if let (true, Some(sender)) = (delivered, changesets) {
                if sender.send(changeset).await.is_err() {
                    debug!("Changeset receiver dropped, continuing without delivery");
                    delivered = false;
                }
            }
        }

        let hash = hasher.finalize();
        self.precommitted = Some(hash);

        Ok(hash)
    }

    #[must_use]
    pub const fn precommit_hash(&self) -> Option<Hash> {
        self.precommitted
    }

    /// Applies the precommitted writes. Applying them again is a no-op, so a
    /// failed commit may be retried.
    pub fn commit(&self) -> EyreResult<()> {
        if self.precommitted.is_none() {
            return Err(DbError::NotPrecommitted.into());
        }

        self.store.apply(&self.pending)
    }

    pub fn rollback(self) {}
}

impl ReadAccess for PreparedTx {
    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        overlay_get(&self.store, &self.pending, col, key)
    }
}

impl WriteAccess for PreparedTx {
    fn put(&mut self, col: Column, key: &[u8], value: Vec<u8>) {
        debug_assert!(self.precommitted.is_none(), "write after precommit");
        self.pending.put(col, key.to_vec(), value);
    }

    fn delete(&mut self, col: Column, key: &[u8]) {
        debug_assert!(self.precommitted.is_none(), "write after precommit");
        self.pending.delete(col, key.to_vec());
    }
}
