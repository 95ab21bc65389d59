use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::Result as EyreResult;
use parking_lot::RwLock;

use crate::db::{Column, Database};
use crate::tx::{Operation, Transaction};

type Columns = BTreeMap<Column, BTreeMap<Vec<u8>, Vec<u8>>>;

#[derive(Debug, Default)]
pub struct InMemoryDB {
    cols: RwLock<Columns>,
}

impl Database for InMemoryDB {
    fn has(&self, col: Column, key: &[u8]) -> EyreResult<bool> {
        Ok(self
            .cols
            .read()
            .get(&col)
            .is_some_and(|entries| entries.contains_key(key)))
    }

    fn get(&self, col: Column, key: &[u8]) -> EyreResult<Option<Vec<u8>>> {
        Ok(self
            .cols
            .read()
            .get(&col)
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn put(&self, col: Column, key: &[u8], value: &[u8]) -> EyreResult<()> {
        let _prev = self
            .cols
            .write()
            .entry(col)
            .or_default()
            .insert(key.to_vec(), value.to_vec());

        Ok(())
    }

    fn delete(&self, col: Column, key: &[u8]) -> EyreResult<()> {
        if let Some(entries) = self.cols.write().get_mut(&col) {
            let _prev = entries.remove(key);
        }

        Ok(())
    }

    fn iter_prefix(&self, col: Column, prefix: &[u8]) -> EyreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cols = self.cols.read();

        let Some(entries) = cols.get(&col) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn last(&self, col: Column) -> EyreResult<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.cols.read().get(&col).and_then(|entries| {
            entries
                .last_key_value()
                .map(|(key, value)| (key.clone(), value.clone()))
        }))
    }

    fn apply(&self, tx: &Transaction) -> EyreResult<()> {
        let mut cols = self.cols.write();

        for (col, key, op) in tx.iter() {
            let entries = cols.entry(col).or_default();

            match op {
                Operation::Put { value } => {
                    let _prev = entries.insert(key.to_vec(), value.clone());
                }
                Operation::Delete => {
                    let _prev = entries.remove(key);
                }
            }
        }

        Ok(())
    }

    fn snapshot(&self) -> EyreResult<Arc<dyn Database>> {
        Ok(Arc::new(Self {
            cols: RwLock::new(self.cols.read().clone()),
        }))
    }
}
