//! Block subsidy schedule.

use crate::money::Amount;
use crate::params::ConsensusParams;

/// Amount of new supply a block at the given height may create, before fees.
///
/// Halves every `subsidy_halving_interval` blocks. From the 64th halving on
/// the shift would fall off the end of the integer, so the subsidy is pinned
/// to zero there.
pub fn block_subsidy(height: u32, params: &ConsensusParams) -> Amount {
    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }
    params.initial_subsidy >> halvings
}
