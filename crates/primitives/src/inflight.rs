//! Single-flight fetch claims.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hash::Hash;

/// The set of object hashes with a fetch in progress.
#[derive(Clone, Debug, Default)]
pub struct InflightSet {
    inner: Arc<Mutex<HashSet<Hash>>>,
}

impl InflightSet {
    /// Claims `hash` exclusively. Returns `None` if a fetch is already in
    /// flight.
    #[must_use]
    pub fn claim(&self, hash: Hash) -> Option<FetchClaim> {
        if !self.inner.lock().insert(hash) {
            return None;
        }

        Some(FetchClaim {
            set: self.clone(),
            hash,
        })
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().contains(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// An exclusive fetch claim, released on drop.
#[derive(Debug)]
#[must_use = "the claim is released when dropped"]
pub struct FetchClaim {
    set: InflightSet,
    hash: Hash,
}

impl FetchClaim {
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.hash
    }

    /// Releases the claim.
    pub fn done(self) {}
}

impl Drop for FetchClaim {
    fn drop(&mut self) {
        let _removed = self.set.inner.lock().remove(&self.hash);
    }
}
