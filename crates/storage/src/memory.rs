//! In-memory backend used by tests and tooling.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp, ALL_COLUMNS};

type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<HashMap<Column, ColumnMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut columns = HashMap::new();
        for column in ALL_COLUMNS {
            columns.insert(column, ColumnMap::new());
        }
        Self {
            columns: RwLock::new(columns),
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let columns = self.columns.read().map_err(poisoned)?;
        Ok(columns
            .get(&column)
            .and_then(|map| map.get(key))
            .cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut columns = self.columns.write().map_err(poisoned)?;
        columns
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut columns = self.columns.write().map_err(poisoned)?;
        if let Some(map) = columns.get_mut(&column) {
            map.remove(key);
        }
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let columns = self.columns.read().map_err(poisoned)?;
        let Some(map) = columns.get(&column) else {
            return Ok(Vec::new());
        };
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        // One write lock for the whole batch keeps it atomic for readers.
        let mut columns = self.columns.write().map_err(poisoned)?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    columns
                        .entry(*column)
                        .or_default()
                        .insert(key.as_slice().to_vec(), value.clone());
                }
                WriteOp::Delete { column, key } => {
                    if let Some(map) = columns.get_mut(column) {
                        map.remove(key.as_slice());
                    }
                }
            }
        }
        Ok(())
    }
}
