//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// The maximum allowed number of signature check operations in a block
/// (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = 20_000;
/// Coinbase transaction outputs can only be spent after this number of new
/// blocks.
pub const COINBASE_MATURITY: u32 = 100;
/// Block timestamp (seconds since epoch) from which pay-to-script-hash
/// evaluation and sigop accounting are enforced.
pub const BIP16_ENFORCE_TIME: i64 = 1_333_238_400;
/// Number of blocks between subsidy halvings.
pub const SUBSIDY_HALVING_INTERVAL: u32 = 210_000;
