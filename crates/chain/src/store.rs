//! The UTXO store abstraction the engine runs against, and its key/value
//! implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use prund_consensus::Hash256;
use prund_primitives::OutPoint;
use prund_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::stored::{StoredBlock, StoredOutput, StoredUndoableBlock};

pub type OutPointKey = [u8; 36];

pub fn outpoint_key(outpoint: &OutPoint) -> OutPointKey {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&outpoint.hash);
    key[32..].copy_from_slice(&outpoint.index.to_le_bytes());
    key
}

/// Store capabilities the connect/disconnect engine needs. Transactional at
/// block granularity: UTXO mutations only happen inside a batch, and the
/// batch publishes atomically on commit.
pub trait FullPrunedStore: Send + Sync {
    /// Open a write batch. Opening while one is already open is a no-op so
    /// the chain selector can bracket several engine calls in one batch.
    fn begin_batch(&self) -> Result<(), StoreError>;
    /// Atomically publish all pending mutations.
    fn commit_batch(&self) -> Result<(), StoreError>;
    /// Discard all pending mutations. Harmless with no batch open, since
    /// error paths abort before the selector gets a chance to.
    fn abort_batch(&self) -> Result<(), StoreError>;

    /// Current unspent output at `(txid, index)`, reflecting in-batch
    /// writes.
    fn get_output(&self, txid: &Hash256, index: u32)
        -> Result<Option<StoredOutput>, StoreError>;
    fn add_unspent_output(&self, output: StoredOutput) -> Result<(), StoreError>;
    fn remove_unspent_output(&self, output: &StoredOutput) -> Result<(), StoreError>;
    /// True when any output of `txid` is unspent. `expected_count` bounds
    /// the probe: a transaction id fixes its output count, so only indexes
    /// below it can exist.
    fn has_unspent_outputs(
        &self,
        txid: &Hash256,
        expected_count: usize,
    ) -> Result<bool, StoreError>;

    /// Record a block and its undoable form, replacing any prior record for
    /// the hash. Outside a batch this writes through directly (the
    /// side-branch attach path persists without a chain-head commit).
    fn put_undo(
        &self,
        hash: &Hash256,
        block: &StoredBlock,
        undo: &StoredUndoableBlock,
    ) -> Result<(), StoreError>;
    /// `None` means the undo data has been pruned.
    fn get_undo(&self, hash: &Hash256) -> Result<Option<StoredUndoableBlock>, StoreError>;
}

struct BatchSession {
    batch: WriteBatch,
    // In-batch views: `None` marks a pending delete.
    utxos: HashMap<OutPointKey, Option<StoredOutput>>,
    undo: HashMap<Hash256, Option<StoredUndoableBlock>>,
}

impl BatchSession {
    fn new() -> Self {
        Self {
            batch: WriteBatch::new(),
            utxos: HashMap::new(),
            undo: HashMap::new(),
        }
    }
}

/// [`FullPrunedStore`] over a [`KeyValueStore`] backend. An open batch
/// session buffers writes and overlays reads so the engine sees its own
/// pending mutations; commit flushes the buffered batch in one backend
/// write.
pub struct KvPrunedStore<S> {
    store: S,
    session: Mutex<Option<BatchSession>>,
}

impl<S> KvPrunedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            session: Mutex::new(None),
        }
    }

    /// The underlying key/value store, for committed-state queries from
    /// surrounding subsystems.
    pub fn backend(&self) -> &S {
        &self.store
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("batch session lock poisoned".to_string())
}

fn corrupt(what: &str) -> StoreError {
    StoreError::Backend(format!("invalid {what} record"))
}

impl<S: KeyValueStore> KvPrunedStore<S> {
    /// The store's prune policy hook: erase the undoable record for a block
    /// whose reorg window has passed. After this, replay and disconnect of
    /// the block report `PrunedError`.
    pub fn prune_undo(&self, hash: &Hash256) -> Result<(), StoreError> {
        let mut session = self.session.lock().map_err(poisoned)?;
        if let Some(session) = session.as_mut() {
            session.undo.insert(*hash, None);
            session.batch.delete(Column::BlockUndo, hash);
            return Ok(());
        }
        self.store.delete(Column::BlockUndo, hash)
    }

    /// Stored block record for `hash`, if one was recorded.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError> {
        match self.store.get(Column::BlockIndex, hash)? {
            Some(bytes) => Ok(Some(
                StoredBlock::decode(&bytes).map_err(|_| corrupt("stored block"))?,
            )),
            None => Ok(None),
        }
    }

    fn base_output(&self, key: &OutPointKey) -> Result<Option<StoredOutput>, StoreError> {
        match self.store.get(Column::Utxo, key)? {
            Some(bytes) => Ok(Some(
                StoredOutput::decode(&bytes).map_err(|_| corrupt("unspent output"))?,
            )),
            None => Ok(None),
        }
    }

    fn output_at(&self, txid: &Hash256, index: u32) -> Result<Option<StoredOutput>, StoreError> {
        let key = outpoint_key(&OutPoint { hash: *txid, index });
        {
            let session = self.session.lock().map_err(poisoned)?;
            if let Some(session) = session.as_ref() {
                if let Some(pending) = session.utxos.get(&key) {
                    return Ok(pending.clone());
                }
            }
        }
        self.base_output(&key)
    }
}

impl<S: KeyValueStore> FullPrunedStore for KvPrunedStore<S> {
    fn begin_batch(&self) -> Result<(), StoreError> {
        let mut session = self.session.lock().map_err(poisoned)?;
        if session.is_none() {
            *session = Some(BatchSession::new());
        }
        Ok(())
    }

    fn commit_batch(&self) -> Result<(), StoreError> {
        let taken = {
            let mut session = self.session.lock().map_err(poisoned)?;
            session.take()
        };
        let Some(taken) = taken else {
            return Err(StoreError::Backend(
                "commit without an open batch".to_string(),
            ));
        };
        self.store.write_batch(&taken.batch)
    }

    fn abort_batch(&self) -> Result<(), StoreError> {
        let mut session = self.session.lock().map_err(poisoned)?;
        *session = None;
        Ok(())
    }

    fn get_output(
        &self,
        txid: &Hash256,
        index: u32,
    ) -> Result<Option<StoredOutput>, StoreError> {
        self.output_at(txid, index)
    }

    fn add_unspent_output(&self, output: StoredOutput) -> Result<(), StoreError> {
        let key = outpoint_key(&output.outpoint);
        // Duplicate keys cannot happen while the engine enforces BIP30;
        // refuse them so a bug surfaces as a store error instead of a
        // silent overwrite.
        if self.output_at(&output.outpoint.hash, output.outpoint.index)?.is_some() {
            return Err(StoreError::Backend(format!(
                "duplicate unspent output at index {}",
                output.outpoint.index
            )));
        }
        let mut session = self.session.lock().map_err(poisoned)?;
        let Some(session) = session.as_mut() else {
            return Err(StoreError::Backend(
                "unspent output mutation outside a batch".to_string(),
            ));
        };
        session.batch.put(Column::Utxo, key, output.encode());
        session.utxos.insert(key, Some(output));
        Ok(())
    }

    fn remove_unspent_output(&self, output: &StoredOutput) -> Result<(), StoreError> {
        let key = outpoint_key(&output.outpoint);
        let mut session = self.session.lock().map_err(poisoned)?;
        let Some(session) = session.as_mut() else {
            return Err(StoreError::Backend(
                "unspent output mutation outside a batch".to_string(),
            ));
        };
        session.batch.delete(Column::Utxo, key);
        session.utxos.insert(key, None);
        Ok(())
    }

    fn has_unspent_outputs(
        &self,
        txid: &Hash256,
        expected_count: usize,
    ) -> Result<bool, StoreError> {
        for index in 0..expected_count {
            if self.output_at(txid, index as u32)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn put_undo(
        &self,
        hash: &Hash256,
        block: &StoredBlock,
        undo: &StoredUndoableBlock,
    ) -> Result<(), StoreError> {
        let mut session = self.session.lock().map_err(poisoned)?;
        if let Some(session) = session.as_mut() {
            session.batch.put(Column::BlockIndex, hash, block.encode());
            session.batch.put(Column::BlockUndo, hash, undo.encode());
            session.undo.insert(*hash, Some(undo.clone()));
            return Ok(());
        }
        drop(session);
        self.store.put(Column::BlockIndex, hash, &block.encode())?;
        self.store.put(Column::BlockUndo, hash, &undo.encode())
    }

    fn get_undo(&self, hash: &Hash256) -> Result<Option<StoredUndoableBlock>, StoreError> {
        {
            let session = self.session.lock().map_err(poisoned)?;
            if let Some(session) = session.as_ref() {
                if let Some(pending) = session.undo.get(hash) {
                    return Ok(pending.clone());
                }
            }
        }
        match self.store.get(Column::BlockUndo, hash)? {
            Some(bytes) => Ok(Some(
                StoredUndoableBlock::decode(&bytes).map_err(|_| corrupt("block undo"))?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prund_storage::memory::MemoryStore;

    fn sample_output(index: u32) -> StoredOutput {
        StoredOutput {
            outpoint: OutPoint {
                hash: [0x22; 32],
                index,
            },
            value: 1_000,
            script_pubkey: vec![0x51],
            height: 5,
            is_coinbase: false,
        }
    }

    #[test]
    fn mutations_require_an_open_batch() {
        let store = KvPrunedStore::new(MemoryStore::new());
        assert!(store.add_unspent_output(sample_output(0)).is_err());
        assert!(store.remove_unspent_output(&sample_output(0)).is_err());
        assert!(store.commit_batch().is_err());
    }

    #[test]
    fn batch_reads_reflect_pending_writes() {
        let store = KvPrunedStore::new(MemoryStore::new());
        store.begin_batch().expect("begin");
        let output = sample_output(0);
        store.add_unspent_output(output.clone()).expect("add");
        assert_eq!(
            store.get_output(&output.outpoint.hash, 0).expect("get"),
            Some(output.clone())
        );
        assert!(store.has_unspent_outputs(&output.outpoint.hash, 1).expect("has"));

        store.remove_unspent_output(&output).expect("remove");
        assert_eq!(store.get_output(&output.outpoint.hash, 0).expect("get"), None);
        assert!(!store.has_unspent_outputs(&output.outpoint.hash, 1).expect("has"));
    }

    #[test]
    fn abort_discards_and_commit_publishes() {
        let store = KvPrunedStore::new(MemoryStore::new());
        let output = sample_output(1);

        store.begin_batch().expect("begin");
        store.add_unspent_output(output.clone()).expect("add");
        store.abort_batch().expect("abort");
        assert_eq!(store.get_output(&output.outpoint.hash, 1).expect("get"), None);

        store.begin_batch().expect("begin");
        store.add_unspent_output(output.clone()).expect("add");
        store.commit_batch().expect("commit");
        assert_eq!(
            store.get_output(&output.outpoint.hash, 1).expect("get"),
            Some(output)
        );
    }

    #[test]
    fn nested_begin_keeps_the_open_batch() {
        let store = KvPrunedStore::new(MemoryStore::new());
        store.begin_batch().expect("begin");
        store.add_unspent_output(sample_output(2)).expect("add");
        store.begin_batch().expect("begin again");
        store.commit_batch().expect("commit");
        assert!(store.get_output(&[0x22; 32], 2).expect("get").is_some());
    }

    #[test]
    fn duplicate_add_is_a_store_error() {
        let store = KvPrunedStore::new(MemoryStore::new());
        store.begin_batch().expect("begin");
        store.add_unspent_output(sample_output(3)).expect("add");
        assert!(store.add_unspent_output(sample_output(3)).is_err());
    }
}
