//! Shared helpers for building test chains out of hand-rolled blocks.
#![allow(dead_code)]

use prund_chain::{FullPrunedChain, KvPrunedStore};
use prund_consensus::money::{Amount, COIN};
use prund_consensus::{chain_params, ConsensusParams, Hash256, Network};
use prund_primitives::{merkle_root, Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};
use prund_storage::memory::MemoryStore;
use prund_storage::{Column, KeyValueStore};

pub type TestStore = KvPrunedStore<MemoryStore>;
pub type TestChain = FullPrunedChain<TestStore>;

/// Regtest-style easy target.
pub const TEST_BITS: u32 = 0x207f_ffff;
/// A block time before BIP16 enforcement.
pub const PRE_P2SH_TIME: u32 = 1_300_000_000;
/// A block time after BIP16 enforcement.
pub const POST_P2SH_TIME: u32 = 1_400_000_000;

pub fn test_params() -> ConsensusParams {
    chain_params(Network::Regtest)
}

pub fn new_chain(params: ConsensusParams) -> TestChain {
    FullPrunedChain::new(params, KvPrunedStore::new(MemoryStore::new()))
}

/// A coinbase whose scriptSig tag keeps txids distinct across blocks.
pub fn coinbase_tx(value: Amount, tag: u32) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: tag.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

pub fn spend_tx(inputs: Vec<(OutPoint, Vec<u8>)>, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        vin: inputs
            .into_iter()
            .map(|(prevout, script_sig)| TxIn {
                prevout,
                script_sig,
                sequence: u32::MAX,
            })
            .collect(),
        vout: outputs,
        lock_time: 0,
    }
}

pub fn build_block(prev_block: Hash256, time: u32, transactions: Vec<Transaction>) -> Block {
    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_block,
            merkle_root: merkle_root(&txids),
            time,
            bits: TEST_BITS,
            nonce: 0,
        },
        transactions,
    }
}

/// A genesis block with a single `50 * COIN` coinbase.
pub fn genesis_block() -> Block {
    build_block([0u8; 32], PRE_P2SH_TIME, vec![coinbase_tx(50 * COIN, 0)])
}

/// The committed UTXO column, key/value bytes in key order.
pub fn utxo_snapshot(chain: &TestChain) -> Vec<(Vec<u8>, Vec<u8>)> {
    chain
        .store()
        .backend()
        .scan_prefix(Column::Utxo, &[])
        .expect("scan utxo column")
}
