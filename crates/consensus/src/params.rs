//! Per-network consensus parameters and checkpoint tables.

use crate::constants::{
    BIP16_ENFORCE_TIME, COINBASE_MATURITY, MAX_BLOCK_SIGOPS, SUBSIDY_HALVING_INTERVAL,
};
use crate::money::{Amount, COIN, MAX_MONEY};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// A hard-coded `(height, hash)` pair pinning the accepted chain.
///
/// Checkpointed heights also grandfather historical anomalies: the BIP30
/// duplicate check is skipped there, and reorganizations may never cross the
/// last checkpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub max_money: Amount,
    pub max_block_sigops: u32,
    pub spendable_coinbase_depth: u32,
    pub bip16_enforce_time: i64,
    pub subsidy_halving_interval: u32,
    pub initial_subsidy: Amount,
    pub hash_genesis_block: Hash256,
    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    /// True when no checkpoint exists at `height`, or the one that does
    /// matches `hash`.
    pub fn passes_checkpoint(&self, height: u32, hash: &Hash256) -> bool {
        match self.checkpoint_hash(height) {
            Some(expected) => expected == *hash,
            None => true,
        }
    }

    pub fn is_checkpoint(&self, height: u32) -> bool {
        self.checkpoint_hash(height).is_some()
    }

    fn checkpoint_hash(&self, height: u32) -> Option<Hash256> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
            .map(|checkpoint| checkpoint.hash)
    }
}

/// Parse a display-order (big-endian) hex string into an internal-order hash.
pub fn hash256_from_hex(hex: &str) -> Option<Hash256> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    let bytes = hex.as_bytes();
    for (i, slot) in out.iter_mut().enumerate() {
        let high = (bytes[2 * i] as char).to_digit(16)? as u8;
        let low = (bytes[2 * i + 1] as char).to_digit(16)? as u8;
        *slot = high << 4 | low;
    }
    out.reverse();
    Some(out)
}

// Called only on the hard-coded tables below.
fn hash_constant(hex: &str) -> Hash256 {
    match hash256_from_hex(hex) {
        Some(hash) => hash,
        None => panic!("invalid hash constant {hex}"),
    }
}

fn checkpoint(height: u32, hex: &str) -> Checkpoint {
    Checkpoint {
        height,
        hash: hash_constant(hex),
    }
}

pub fn chain_params(network: Network) -> ConsensusParams {
    let base = ConsensusParams {
        network,
        max_money: MAX_MONEY,
        max_block_sigops: MAX_BLOCK_SIGOPS,
        spendable_coinbase_depth: COINBASE_MATURITY,
        bip16_enforce_time: BIP16_ENFORCE_TIME,
        subsidy_halving_interval: SUBSIDY_HALVING_INTERVAL,
        initial_subsidy: 50 * COIN,
        hash_genesis_block: [0u8; 32],
        checkpoints: Vec::new(),
    };
    match network {
        Network::Mainnet => ConsensusParams {
            hash_genesis_block: hash_constant(
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            ),
            // The first four entries pin the duplicate-coinbase era; see the
            // BIP30 handling in the connect engine.
            checkpoints: vec![
                checkpoint(
                    91_722,
                    "00000000000271a2dc26e7667f8419f2e15416dc6955e5a6c6cdf3f2574dd08e",
                ),
                checkpoint(
                    91_812,
                    "00000000000af0aed4792b1acee3d966af36cf5def14935db8de83d6f9306f2f",
                ),
                checkpoint(
                    91_842,
                    "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec",
                ),
                checkpoint(
                    91_880,
                    "00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721",
                ),
                checkpoint(
                    200_000,
                    "000000000000034a7dedef4a161fa058a2d67a173a90155f3a2fe6fc132e0ebf",
                ),
            ],
            ..base
        },
        Network::Testnet => ConsensusParams {
            hash_genesis_block: hash_constant(
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            ),
            ..base
        },
        Network::Regtest => ConsensusParams {
            hash_genesis_block: hash_constant(
                "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            ),
            ..base
        },
    }
}
