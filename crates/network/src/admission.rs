//! Per-peer admission for outbound advertisements.
//!
//! At most one advertisement is in flight per destination peer. Further
//! requests wait for the slot, up to a fixed queue depth; beyond that they are
//! dropped. Slot tokens are recycled through a bounded pool.

use std::collections::HashMap;
use std::sync::Arc;

use libp2p::PeerId;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

pub const DEFAULT_QUEUE_DEPTH: usize = 4;
const MAX_POOLED_TOKENS: usize = 256;

#[derive(Debug)]
struct Slot {
    token: Arc<Semaphore>,
    /// In-flight plus waiting requests.
    holders: usize,
}

#[derive(Debug, Default)]
struct SlotState {
    active: HashMap<PeerId, Slot>,
    pool: Vec<Arc<Semaphore>>,
}

#[derive(Debug)]
pub struct PeerSlots {
    queue_depth: usize,
    state: Mutex<SlotState>,
}

impl Default for PeerSlots {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl PeerSlots {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth,
            state: Mutex::default(),
        }
    }

    /// Waits for the slot of `peer`. Returns `None` when the peer's queue is
    /// full.
    pub async fn acquire(self: &Arc<Self>, peer: PeerId) -> Option<SlotGuard> {
        let token = {
            let mut state = self.state.lock();
            let SlotState { active, pool } = &mut *state;

            let slot = active.entry(peer).or_insert_with(|| Slot {
                token: pool.pop().unwrap_or_else(|| Arc::new(Semaphore::new(1))),
                holders: 0,
            });

            if slot.holders > self.queue_depth {
                warn!(%peer, queue_depth = self.queue_depth, "Advertisement queue full, dropping");
                return None;
            }

            slot.holders = slot.holders.saturating_add(1);

            Arc::clone(&slot.token)
        };

        let mut guard = SlotGuard {
            slots: Arc::clone(self),
            peer,
            permit: None,
        };

        guard.permit = Some(token.acquire_owned().await.ok()?);

        Some(guard)
    }

    /// Peers holding or waiting for a slot.
    #[must_use]
    pub fn active_peers(&self) -> usize {
        self.state.lock().active.len()
    }

    fn release(&self, peer: &PeerId) {
        let mut state = self.state.lock();

        let Some(slot) = state.active.get_mut(peer) else {
            return;
        };

        slot.holders = slot.holders.saturating_sub(1);

        if slot.holders > 0 {
            return;
        }

        if let Some(slot) = state.active.remove(peer) {
            if state.pool.len() < MAX_POOLED_TOKENS {
                state.pool.push(slot.token);
            }
        }
    }
}

/// Holds a peer's advertisement slot until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<PeerSlots>,
    peer: PeerId,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.slots.release(&self.peer);
    }
}
