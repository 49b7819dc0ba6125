//! Block connect, side-branch replay, and disconnect.

use std::sync::Arc;

use rayon::prelude::*;

use prund_consensus::money::Amount;
use prund_consensus::subsidy::block_subsidy;
use prund_consensus::ConsensusParams;
use prund_primitives::hash::hash256_to_hex;
use prund_primitives::{Block, BlockHeader, OutPoint, Transaction};
use prund_script::{
    is_pay_to_script_hash, legacy_sig_op_count, p2sh_sig_op_count, ScriptError, ScriptVerifier,
};
use prund_storage::StoreError;

use crate::error::{ChainError, VerificationError};
use crate::store::FullPrunedStore;
use crate::stored::{StoredBlock, StoredOutput, StoredTransaction, StoredUndoableBlock, TxOutputChanges};

/// The hooks a chain selector drives. The selector owns block-header chain
/// management and decides which blocks become the chain head; this engine
/// owns the UTXO consequences.
pub trait ChainEngine {
    /// Header-only attach on the side-branch fast path: persist the block
    /// record with a pre-computed delta as its undoable form.
    fn add_to_store_with_undo(
        &self,
        prev: &StoredBlock,
        header: &BlockHeader,
        changes: TxOutputChanges,
    ) -> Result<StoredBlock, ChainError>;

    /// Full-block attach: persist the block record with the complete
    /// transaction list as its undoable form. No UTXO mutation happens yet.
    fn add_to_store_full(&self, prev: &StoredBlock, block: &Block)
        -> Result<StoredBlock, ChainError>;

    fn should_verify_transactions(&self) -> bool;

    /// Apply a new block's transactions forward, performing all consensus
    /// checks. The store batch is left open for the selector.
    fn connect_transactions(
        &self,
        height: u32,
        block: &Block,
    ) -> Result<TxOutputChanges, ChainError>;

    /// Bring a block previously on a side branch onto the active chain,
    /// re-verifying from its archived transactions when they survive, or
    /// trusting its stored delta when only that remains.
    fn replay_side_block(&self, block: &StoredBlock) -> Result<TxOutputChanges, ChainError>;

    /// Reverse a block's effect on the UTXO set using its undo record.
    fn disconnect_transactions(&self, old_block: &StoredBlock) -> Result<(), ChainError>;

    /// The selector is about to make the batched work the new chain head:
    /// commit the open batch.
    fn pre_set_chain_head(&self) -> Result<(), ChainError>;

    /// The selector decided against the candidate: abort the open batch.
    fn not_setting_chain_head(&self) -> Result<(), ChainError>;
}

/// Aborts the store batch on drop unless the operation completed and chose
/// to leave the batch open for the selector's commit.
struct BatchGuard<'a, S: FullPrunedStore> {
    store: &'a S,
    armed: bool,
}

impl<'a, S: FullPrunedStore> BatchGuard<'a, S> {
    fn begin(store: &'a S) -> Result<Self, StoreError> {
        store.begin_batch()?;
        Ok(Self { store, armed: true })
    }

    fn keep_open(mut self) {
        self.armed = false;
    }
}

impl<S: FullPrunedStore> Drop for BatchGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            // Error-path cleanup; a failed abort cannot be reported here.
            let _ = self.store.abort_batch();
        }
    }
}

struct ScriptCheck {
    script_sig: Vec<u8>,
    script_pubkey: Vec<u8>,
}

pub struct FullPrunedChain<S: FullPrunedStore> {
    params: ConsensusParams,
    store: S,
    script_verifier: Option<Arc<dyn ScriptVerifier>>,
}

impl<S: FullPrunedStore> FullPrunedChain<S> {
    pub fn new(params: ConsensusParams, store: S) -> Self {
        Self {
            params,
            store,
            script_verifier: None,
        }
    }

    /// Attach per-input script execution. Without a verifier the engine
    /// performs every structural check but leaves script evaluation to the
    /// surrounding node.
    pub fn with_script_verifier(mut self, verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.script_verifier = Some(verifier);
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Forward verification shared by connect and replay: spends inputs and
    /// creates outputs in block order while enforcing BIP30, coinbase
    /// maturity, the P2SH sigop budget, and monetary conservation.
    fn verify_transactions(
        &self,
        transactions: &[&Transaction],
        height: u32,
        header_time: u32,
    ) -> Result<TxOutputChanges, ChainError> {
        let params = &self.params;
        let enforce_p2sh = i64::from(header_time) >= params.bip16_enforce_time;

        if !params.is_checkpoint(height) {
            // Duplicate-txid blocks predate the checkpoint era and are all
            // pinned there, so only non-checkpoint heights are probed.
            for tx in transactions {
                if self
                    .store
                    .has_unspent_outputs(&tx.txid(), tx.vout.len())?
                {
                    return Err(VerificationError::Bip30Duplicate.into());
                }
            }
        }

        let mut created: Vec<StoredOutput> = Vec::new();
        let mut spent: Vec<StoredOutput> = Vec::new();
        let mut script_checks: Vec<ScriptCheck> = Vec::new();
        let mut sig_ops: u32 = 0;
        let mut total_fees: Amount = 0;
        let mut coinbase_value: Option<Amount> = None;

        for tx in transactions {
            let is_coinbase = tx.is_coinbase();
            let txid = tx.txid();
            let mut value_in: Amount = 0;
            let mut value_out: Amount = 0;

            if enforce_p2sh && !is_coinbase {
                sig_ops = sig_ops.saturating_add(
                    legacy_sig_op_count(tx).map_err(VerificationError::Script)?,
                );
            }

            if !is_coinbase {
                for input in &tx.vin {
                    let prev = match self
                        .store
                        .get_output(&input.prevout.hash, input.prevout.index)?
                    {
                        Some(prev) => prev,
                        None => {
                            eprintln!(
                                "missing input {}:{} for tx {} at height {}",
                                hash256_to_hex(&input.prevout.hash),
                                input.prevout.index,
                                hash256_to_hex(&txid),
                                height
                            );
                            return Err(VerificationError::MissingOutput(input.prevout).into());
                        }
                    };
                    // Coinbases can't be spent until they mature; a reorg
                    // deeper than the maturity window would otherwise
                    // destroy entire transaction chains.
                    if prev.is_coinbase {
                        let depth = i64::from(height) - i64::from(prev.height);
                        if depth < i64::from(params.spendable_coinbase_depth) {
                            return Err(VerificationError::ImmatureCoinbase { depth }.into());
                        }
                    }
                    value_in = value_in
                        .checked_add(prev.value)
                        .ok_or(VerificationError::ValueOutOfRange)?;
                    if enforce_p2sh {
                        if is_pay_to_script_hash(&prev.script_pubkey) {
                            sig_ops = sig_ops.saturating_add(
                                p2sh_sig_op_count(&input.script_sig)
                                    .map_err(VerificationError::Script)?,
                            );
                        }
                        if sig_ops > params.max_block_sigops {
                            return Err(VerificationError::SigopsExceeded.into());
                        }
                    }
                    if self.script_verifier.is_some() {
                        script_checks.push(ScriptCheck {
                            script_sig: input.script_sig.clone(),
                            script_pubkey: prev.script_pubkey.clone(),
                        });
                    }
                    self.store.remove_unspent_output(&prev)?;
                    spent.push(prev);
                }
            }

            for (index, output) in tx.vout.iter().enumerate() {
                value_out = value_out
                    .checked_add(output.value)
                    .ok_or(VerificationError::ValueOutOfRange)?;
                let stored = StoredOutput {
                    outpoint: OutPoint {
                        hash: txid,
                        index: index as u32,
                    },
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    height,
                    is_coinbase,
                };
                self.store.add_unspent_output(stored.clone())?;
                created.push(stored);
            }

            // Individual values were range-checked before the block got
            // here; re-checked for defence in depth.
            if value_out < 0 || value_out > params.max_money {
                return Err(VerificationError::ValueOutOfRange.into());
            }
            if is_coinbase {
                coinbase_value = Some(value_out);
            } else {
                if value_in < value_out || value_in > params.max_money {
                    return Err(VerificationError::ValueOutOfRange.into());
                }
                total_fees = total_fees
                    .checked_add(value_in - value_out)
                    .ok_or(VerificationError::FeesOutOfRange)?;
            }
        }

        let claimable = block_subsidy(height, params)
            .checked_add(total_fees)
            .ok_or(VerificationError::FeesOutOfRange)?;
        if total_fees > params.max_money || claimable < coinbase_value.unwrap_or_default() {
            return Err(VerificationError::FeesOutOfRange.into());
        }

        if let Some(verifier) = self.script_verifier.as_deref() {
            let ok = script_checks
                .par_iter()
                .all(|check| verifier.verify(&check.script_sig, &check.script_pubkey));
            if !ok {
                return Err(VerificationError::Script(ScriptError::VerifyFailed).into());
            }
        }

        Ok(TxOutputChanges { created, spent })
    }
}

impl<S: FullPrunedStore> ChainEngine for FullPrunedChain<S> {
    fn add_to_store_with_undo(
        &self,
        prev: &StoredBlock,
        header: &BlockHeader,
        changes: TxOutputChanges,
    ) -> Result<StoredBlock, ChainError> {
        let stored = prev.build(header.clone());
        self.store.put_undo(
            &stored.hash(),
            &stored,
            &StoredUndoableBlock::OutputChanges(changes),
        )?;
        Ok(stored)
    }

    fn add_to_store_full(
        &self,
        prev: &StoredBlock,
        block: &Block,
    ) -> Result<StoredBlock, ChainError> {
        let stored = prev.build(block.header.clone());
        let transactions = block
            .transactions
            .iter()
            .map(|transaction| StoredTransaction {
                transaction: transaction.clone(),
                height: stored.height,
            })
            .collect();
        self.store.put_undo(
            &stored.hash(),
            &stored,
            &StoredUndoableBlock::Transactions(transactions),
        )?;
        Ok(stored)
    }

    fn should_verify_transactions(&self) -> bool {
        true
    }

    fn connect_transactions(
        &self,
        height: u32,
        block: &Block,
    ) -> Result<TxOutputChanges, ChainError> {
        if block.transactions.is_empty() {
            return Err(VerificationError::MissingTransactions.into());
        }
        let hash = block.hash();
        if !self.params.passes_checkpoint(height, &hash) {
            return Err(VerificationError::CheckpointMismatch { height }.into());
        }

        let guard = BatchGuard::begin(&self.store)?;
        let transactions: Vec<&Transaction> = block.transactions.iter().collect();
        let changes = self.verify_transactions(&transactions, height, block.header.time)?;
        // Record the delta eagerly so disconnect works even before the
        // header chain's attach pass replaces this record with one carrying
        // cumulative work.
        let stored = StoredBlock::from_header(block.header.clone(), height);
        self.store.put_undo(
            &hash,
            &stored,
            &StoredUndoableBlock::OutputChanges(changes.clone()),
        )?;
        guard.keep_open();
        Ok(changes)
    }

    fn replay_side_block(&self, block: &StoredBlock) -> Result<TxOutputChanges, ChainError> {
        let hash = block.hash();
        let height = block.height;
        if !self.params.passes_checkpoint(height, &hash) {
            return Err(VerificationError::CheckpointMismatch { height }.into());
        }

        let guard = BatchGuard::begin(&self.store)?;
        let Some(undo) = self.store.get_undo(&hash)? else {
            // Reorg reaches past the prune horizon; the data is gone.
            return Err(ChainError::Pruned(hash));
        };
        let changes = match undo {
            StoredUndoableBlock::Transactions(stored_transactions) => {
                // Re-verify: the active-chain invariants must still hold
                // under the new chain prefix.
                let transactions: Vec<&Transaction> = stored_transactions
                    .iter()
                    .map(|stored| &stored.transaction)
                    .collect();
                let changes =
                    self.verify_transactions(&transactions, height, block.header.time)?;
                // The block is now active; keep its delta so a later
                // disconnect has something to reverse.
                self.store.put_undo(
                    &hash,
                    block,
                    &StoredUndoableBlock::OutputChanges(changes.clone()),
                )?;
                changes
            }
            StoredUndoableBlock::OutputChanges(changes) => {
                // Pruned down to the delta: it was fully verified when the
                // branch was first built, so trust it after a BIP30 guard.
                if !self.params.is_checkpoint(height) {
                    for output in &changes.created {
                        if self
                            .store
                            .get_output(&output.outpoint.hash, output.outpoint.index)?
                            .is_some()
                        {
                            return Err(VerificationError::Bip30Duplicate.into());
                        }
                    }
                }
                for output in &changes.created {
                    self.store.add_unspent_output(output.clone())?;
                }
                for output in &changes.spent {
                    self.store.remove_unspent_output(output)?;
                }
                changes
            }
        };
        guard.keep_open();
        Ok(changes)
    }

    fn disconnect_transactions(&self, old_block: &StoredBlock) -> Result<(), ChainError> {
        let hash = old_block.hash();
        let guard = BatchGuard::begin(&self.store)?;
        let Some(undo) = self.store.get_undo(&hash)? else {
            return Err(ChainError::Pruned(hash));
        };
        let StoredUndoableBlock::OutputChanges(changes) = undo else {
            // Connected blocks always carry a delta; a transactions-only
            // record here means the store lost it.
            return Err(StoreError::Backend(format!(
                "undo record for block {} has no output changes",
                hash256_to_hex(&hash)
            ))
            .into());
        };
        for output in &changes.spent {
            self.store.add_unspent_output(output.clone())?;
        }
        for output in &changes.created {
            self.store.remove_unspent_output(output)?;
        }
        guard.keep_open();
        Ok(())
    }

    fn pre_set_chain_head(&self) -> Result<(), ChainError> {
        self.store.commit_batch()?;
        Ok(())
    }

    fn not_setting_chain_head(&self) -> Result<(), ChainError> {
        self.store.abort_batch()?;
        Ok(())
    }
}
