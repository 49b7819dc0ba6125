use prund_consensus::Hash256;

use crate::encoding::{DecodeError, Decoder, Encoder};

/// Reference to a specific transaction output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    /// The reserved prevout of a coinbase input.
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }

    pub fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u32_le(self.index);
    }

    pub fn consensus_decode(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}
