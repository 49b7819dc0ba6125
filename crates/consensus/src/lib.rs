//! Consensus parameters, monetary amounts, and the subsidy schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod subsidy;

/// A 256-bit identifier (transaction id or block id), kept in internal
/// little-endian byte order. Hex display reverses the bytes.
pub type Hash256 = [u8; 32];

pub use params::{chain_params, hash256_from_hex, Checkpoint, ConsensusParams, Network};
pub use subsidy::block_subsidy;
