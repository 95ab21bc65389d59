//! Pool of unconfirmed transactions, kept in arrival order.

use std::sync::Arc;

use indexmap::IndexMap;
use meridian_primitives::hash::Hash;
use meridian_primitives::inflight::{FetchClaim, InflightSet};
use meridian_primitives::transaction::Transaction;
use parking_lot::Mutex;
use tracing::{debug, warn};


pub const DEFAULT_MAX_BYTES: usize = 200_000_000;

/// Outcome of [`Mempool::store`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Stored,
    AlreadyHave,
    /// The pool has no room for the transaction.
    Full,
}

#[derive(Debug)]
struct Entry {
    tx: Arc<Transaction>,
    size: usize,
}

#[derive(Debug, Default)]
struct Inner {
    txns: IndexMap<Hash, Entry>,
    bytes: usize,
    max_bytes: usize,
}

impl Inner {
    fn remove(&mut self, hash: &Hash) -> Option<Entry> {
        let entry = self.txns.shift_remove(hash)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }
}

#[derive(Clone, Debug)]
pub struct Mempool {
    inner: Arc<Mutex<Inner>>,
    fetching: InflightSet,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl Mempool {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_bytes,
                ..Inner::default()
            })),
            fetching: InflightSet::default(),
        }
    }

    #[must_use]
    pub fn have(&self, hash: &Hash) -> bool {
        self.inner.lock().txns.contains_key(hash)
    }

    #[must_use]
    pub fn get(&self, hash: &Hash) -> Option<Arc<Transaction>> {
        self.inner.lock().txns.get(hash).map(|entry| Arc::clone(&entry.tx))
    }

    /// Adds `tx` under `hash`. Any fetch claim on the hash is unaffected; the
    /// claim holder releases it once the transaction is stored.
    pub fn store(&self, hash: Hash, tx: Arc<Transaction>, size: usize) -> Admission {
        let mut inner = self.inner.lock();

        if inner.txns.contains_key(&hash) {
            return Admission::AlreadyHave;
        }

        if inner.bytes.saturating_add(size) > inner.max_bytes {
            warn!(%hash, size, pooled = inner.bytes, "Mempool full, rejecting transaction");
            return Admission::Full;
        }

        inner.bytes = inner.bytes.saturating_add(size);
        let _prev = inner.txns.insert(hash, Entry { tx, size });

        Admission::Stored
    }

    pub fn remove(&self, hash: &Hash) -> Option<Arc<Transaction>> {
        self.inner.lock().remove(hash).map(|entry| entry.tx)
    }

    /// Up to `n` transactions in arrival order, stopping before the first one
    /// that would push the total past `max_bytes`. `None` means unbounded.
    #[must_use]
    pub fn peek_n(&self, n: usize, max_bytes: Option<usize>) -> Vec<(Hash, Arc<Transaction>)> {
        let inner = self.inner.lock();

        let mut total = 0_usize;
        let mut out = Vec::new();

        for (hash, entry) in inner.txns.iter().take(n) {
            if let Some(max) = max_bytes {
                total = total.saturating_add(entry.size);
                if total > max {
                    break;
                }
            }
            out.push((*hash, Arc::clone(&entry.tx)));
        }

        out
    }

    /// Total pooled bytes and transaction count.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.bytes, inner.txns.len())
    }

    /// Claims the right to fetch `hash`. `None` if the transaction is already
    /// pooled or another fetch is in flight.
    #[must_use]
    pub fn pre_fetch(&self, hash: Hash) -> Option<FetchClaim> {
        if self.have(&hash) {
            return None;
        }

        self.fetching.claim(hash)
    }

    /// Re-validates every pooled transaction in order, evicting those `check`
    /// rejects.
    pub fn recheck<E, F>(&self, mut check: F)
    where
        E: core::fmt::Display,
        F: FnMut(&Transaction) -> Result<(), E>,
    {
        let mut inner = self.inner.lock();

        let mut evicted = Vec::new();
        for (hash, entry) in &inner.txns {
            if let Err(err) = check(&entry.tx) {
                debug!(%hash, %err, "Evicting transaction on recheck");
                evicted.push(*hash);
            }
        }

        for hash in evicted {
            let _removed = inner.remove(&hash);
        }
    }
}
