use std::collections::BTreeMap;

use crate::db::Column;

/// An ordered batch of writes, applied atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    cols: BTreeMap<Column, BTreeMap<Vec<u8>, Operation>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Put { value: Vec<u8> },
    Delete,
}

impl Transaction {
    #[must_use]
    pub fn get(&self, col: Column, key: &[u8]) -> Option<&Operation> {
        self.cols.get(&col).and_then(|ops| ops.get(key))
    }

    pub fn put(&mut self, col: Column, key: Vec<u8>, value: Vec<u8>) {
        let _prev = self
            .cols
            .entry(col)
            .or_default()
            .insert(key, Operation::Put { value });
    }

    pub fn delete(&mut self, col: Column, key: Vec<u8>) {
        let _prev = self
            .cols
            .entry(col)
            .or_default()
            .insert(key, Operation::Delete);
    }

    /// Folds `other` into `self`, `other` winning on conflicts.
    pub fn merge(&mut self, other: &Self) {
        for (col, key, op) in other.iter() {
            let _prev = self
                .cols
                .entry(col)
                .or_default()
                .insert(key.to_vec(), op.clone());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cols.values().all(BTreeMap::is_empty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cols.values().map(BTreeMap::len).sum()
    }

    /// Operations in column order, then key order.
    pub fn iter(&self) -> impl Iterator<Item = (Column, &[u8], &Operation)> {
        self.cols.iter().flat_map(|(col, ops)| {
            ops.iter()
                .map(move |(key, op)| (*col, key.as_slice(), op))
        })
    }
}
