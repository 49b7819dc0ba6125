//! Persistent record forms: outputs, archived transactions, undo deltas,
//! and the per-block records the store keeps.

use primitive_types::U256;
use prund_consensus::money::Amount;
use prund_consensus::Hash256;
use prund_primitives::encoding::{DecodeError, Decoder, Encoder};
use prund_primitives::{BlockHeader, OutPoint, Transaction};

/// Persistent form of a transaction output.
///
/// Carries everything a later spend check needs: the creating height drives
/// coinbase maturity, the script drives P2SH sigop accounting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredOutput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl StoredOutput {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_to(&mut encoder);
        encoder.into_inner()
    }

    pub fn encode_to(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_bool(self.is_coinbase);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let output = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(output)
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let outpoint = OutPoint::consensus_decode(decoder)?;
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let is_coinbase = decoder.read_bool()?;
        Ok(Self {
            outpoint,
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

/// A transaction archived with the height of its creating block, so a
/// side-branch block can be re-verified after its outputs left the UTXO set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredTransaction {
    pub transaction: Transaction,
    pub height: u32,
}

impl StoredTransaction {
    pub fn encode_to(&self, encoder: &mut Encoder) {
        self.transaction.consensus_encode_to(encoder);
        encoder.write_u32_le(self.height);
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let transaction = Transaction::consensus_decode_from(decoder)?;
        let height = decoder.read_u32_le()?;
        Ok(Self {
            transaction,
            height,
        })
    }
}

/// Undo delta for one block.
///
/// Applying `created` as inserts and `spent` as deletes moves the UTXO set
/// forward over the block; the reverse application undoes it exactly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxOutputChanges {
    pub created: Vec<StoredOutput>,
    pub spent: Vec<StoredOutput>,
}

impl TxOutputChanges {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_to(&mut encoder);
        encoder.into_inner()
    }

    pub fn encode_to(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.created.len() as u64);
        for output in &self.created {
            output.encode_to(encoder);
        }
        encoder.write_varint(self.spent.len() as u64);
        for output in &self.spent {
            output.encode_to(encoder);
        }
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let created = decode_output_list(decoder)?;
        let spent = decode_output_list(decoder)?;
        Ok(Self { created, spent })
    }
}

fn decode_output_list(decoder: &mut Decoder<'_>) -> Result<Vec<StoredOutput>, DecodeError> {
    let count = decoder.read_varint()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::LengthOutOfRange)?;
    if count > decoder.remaining() {
        return Err(DecodeError::LengthOutOfRange);
    }
    let mut outputs = Vec::with_capacity(count);
    for _ in 0..count {
        outputs.push(StoredOutput::decode_from(decoder)?);
    }
    Ok(outputs)
}

const UNDO_TAG_TRANSACTIONS: u8 = 0;
const UNDO_TAG_OUT_CHANGES: u8 = 1;

/// The undoable record kept per block: the full transaction list while the
/// block is recent enough to re-verify, or only the output delta once the
/// store has pruned it down.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoredUndoableBlock {
    Transactions(Vec<StoredTransaction>),
    OutputChanges(TxOutputChanges),
}

impl StoredUndoableBlock {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        match self {
            StoredUndoableBlock::Transactions(transactions) => {
                encoder.write_u8(UNDO_TAG_TRANSACTIONS);
                encoder.write_varint(transactions.len() as u64);
                for transaction in transactions {
                    transaction.encode_to(&mut encoder);
                }
            }
            StoredUndoableBlock::OutputChanges(changes) => {
                encoder.write_u8(UNDO_TAG_OUT_CHANGES);
                changes.encode_to(&mut encoder);
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = match decoder.read_u8()? {
            UNDO_TAG_TRANSACTIONS => {
                let count = decoder.read_varint()?;
                let count = usize::try_from(count).map_err(|_| DecodeError::LengthOutOfRange)?;
                if count > decoder.remaining() {
                    return Err(DecodeError::LengthOutOfRange);
                }
                let mut transactions = Vec::with_capacity(count);
                for _ in 0..count {
                    transactions.push(StoredTransaction::decode_from(&mut decoder)?);
                }
                StoredUndoableBlock::Transactions(transactions)
            }
            UNDO_TAG_OUT_CHANGES => {
                StoredUndoableBlock::OutputChanges(TxOutputChanges::decode_from(&mut decoder)?)
            }
            _ => return Err(DecodeError::LengthOutOfRange),
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(record)
    }
}

/// A block as the header chain tracks it: header, height, and cumulative
/// work. The work bytes are big-endian so they sort lexicographically.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredBlock {
    pub header: BlockHeader,
    pub height: u32,
    pub chainwork: [u8; 32],
}

impl StoredBlock {
    /// Record for a chain tip with no parent.
    pub fn genesis(header: BlockHeader) -> Self {
        let chainwork = block_proof(header.bits).to_big_endian();
        Self {
            header,
            height: 0,
            chainwork,
        }
    }

    /// Standalone record carrying only the block's own proof. Used where no
    /// parent record is at hand; the header chain's attach path replaces it
    /// with the cumulative record.
    pub fn from_header(header: BlockHeader, height: u32) -> Self {
        let chainwork = block_proof(header.bits).to_big_endian();
        Self {
            header,
            height,
            chainwork,
        }
    }

    /// Record for a child block of `self`.
    pub fn build(&self, header: BlockHeader) -> Self {
        let work = U256::from_big_endian(&self.chainwork)
            .checked_add(block_proof(header.bits))
            .unwrap_or(U256::MAX);
        Self {
            header,
            height: self.height + 1,
            chainwork: work.to_big_endian(),
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn chainwork_value(&self) -> U256 {
        U256::from_big_endian(&self.chainwork)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode_to(&mut encoder);
        encoder.write_u32_le(self.height);
        encoder.write_bytes(&self.chainwork);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode_from(&mut decoder)?;
        let height = decoder.read_u32_le()?;
        let chainwork = decoder.read_fixed::<32>()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            height,
            chainwork,
        })
    }
}

/// Work proven by a header with the given compact difficulty target:
/// `~target / (target + 1) + 1`. Zero, negative, and overflowing targets
/// prove nothing.
pub fn block_proof(bits: u32) -> U256 {
    let Some(target) = target_from_compact(bits) else {
        return U256::zero();
    };
    (!target / (target + U256::one())) + U256::one()
}

fn target_from_compact(bits: u32) -> Option<U256> {
    let exponent = (bits >> 24) as u32;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return None;
    }
    if bits & 0x0080_0000 != 0 {
        // Sign bit set: negative target.
        return None;
    }
    if exponent > 34 || (mantissa > 0xff && exponent > 33) || (mantissa > 0xffff && exponent > 32)
    {
        return None;
    }
    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3) as usize)
    };
    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prund_primitives::{TxIn, TxOut};

    fn sample_output(index: u32) -> StoredOutput {
        StoredOutput {
            outpoint: OutPoint {
                hash: [0x33; 32],
                index,
            },
            value: 5_000_000_000,
            script_pubkey: vec![0x76, 0xa9, 0x14],
            height: 17,
            is_coinbase: index == 0,
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root: [0x44; 32],
            time: 1_300_000_000,
            bits: 0x1d00ffff,
            nonce: 7,
        }
    }

    #[test]
    fn stored_output_round_trip() {
        let output = sample_output(0);
        assert_eq!(StoredOutput::decode(&output.encode()), Ok(output));
    }

    #[test]
    fn stored_output_rejects_trailing_bytes() {
        let mut bytes = sample_output(1).encode();
        bytes.push(0xff);
        assert_eq!(
            StoredOutput::decode(&bytes),
            Err(DecodeError::TrailingBytes)
        );
    }

    #[test]
    fn undoable_block_round_trips_both_forms() {
        let changes = TxOutputChanges {
            created: vec![sample_output(0), sample_output(1)],
            spent: vec![sample_output(2)],
        };
        let record = StoredUndoableBlock::OutputChanges(changes);
        assert_eq!(StoredUndoableBlock::decode(&record.encode()), Ok(record));

        let transaction = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![0x01],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        let record = StoredUndoableBlock::Transactions(vec![StoredTransaction {
            transaction,
            height: 12,
        }]);
        assert_eq!(StoredUndoableBlock::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn unknown_undo_tag_rejected() {
        assert!(StoredUndoableBlock::decode(&[0x07]).is_err());
    }

    #[test]
    fn stored_block_round_trip_and_build() {
        let genesis = StoredBlock::genesis(sample_header());
        assert_eq!(StoredBlock::decode(&genesis.encode()), Ok(genesis.clone()));

        let mut child_header = sample_header();
        child_header.prev_block = genesis.hash();
        let child = genesis.build(child_header);
        assert_eq!(child.height, 1);
        assert_eq!(
            child.chainwork_value(),
            genesis.chainwork_value() + block_proof(child.header.bits)
        );
    }

    #[test]
    fn block_proof_of_invalid_targets_is_zero() {
        assert_eq!(block_proof(0), U256::zero());
        // Negative target (sign bit set).
        assert_eq!(block_proof(0x0180_0001), U256::zero());
        // Overflowing exponent.
        assert_eq!(block_proof(0xff00_ffff), U256::zero());
    }

    #[test]
    fn block_proof_of_limit_target() {
        // The classic difficulty-one target: work is 2^32 / (2^224 / 2^208)
        // in the right ballpark; just pin the known value.
        let proof = block_proof(0x1d00ffff);
        assert_eq!(proof, U256::from(0x0001_0001u64 << 16) + U256::one());
    }
}
