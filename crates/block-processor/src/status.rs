use std::collections::HashMap;
use std::time::SystemTime;

use meridian_primitives::hash::Hash;

/// Progress of the block being executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockExecStatus {
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    /// Transaction hashes in block order.
    pub tx_ids: Vec<Hash>,
    pub tx_status: HashMap<Hash, bool>,
}

impl BlockExecStatus {
    pub(crate) fn new(tx_ids: Vec<Hash>) -> Self {
        let tx_status = tx_ids.iter().map(|id| (*id, false)).collect();

        Self {
            start_time: SystemTime::now(),
            end_time: None,
            tx_ids,
            tx_status,
        }
    }

    pub(crate) fn mark_done(&mut self, id: Hash) {
        let _prev = self.tx_status.insert(id, true);
    }

    pub(crate) fn finish(&mut self) {
        self.end_time = Some(SystemTime::now());
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.tx_status.values().filter(|done| **done).count()
    }
}
