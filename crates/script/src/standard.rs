//! Standard script template detection.

use crate::opcodes::{OP_EQUAL, OP_HASH160};

/// `OP_HASH160 <20-byte hash> OP_EQUAL`.
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Build the locking script for a 20-byte script hash.
pub fn pay_to_script_hash(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trip() {
        let script = pay_to_script_hash(&[7u8; 20]);
        assert!(is_pay_to_script_hash(&script));
    }

    #[test]
    fn rejects_near_misses() {
        assert!(!is_pay_to_script_hash(&[]));
        assert!(!is_pay_to_script_hash(&[OP_HASH160, 0x14]));
        let mut script = pay_to_script_hash(&[7u8; 20]);
        script.push(0x00);
        assert!(!is_pay_to_script_hash(&script));
    }
}
