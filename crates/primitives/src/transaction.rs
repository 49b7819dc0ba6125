use prund_consensus::money::Amount;
use prund_consensus::Hash256;

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// True for the block-reward transaction: a single input with the
    /// reserved null prevout.
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode_to(&mut encoder);
        encoder.into_inner()
    }

    pub fn consensus_encode_to(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.prevout.consensus_encode(encoder);
            encoder.write_var_bytes(&input.script_sig);
            encoder.write_u32_le(input.sequence);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            encoder.write_i64_le(output.value);
            encoder.write_var_bytes(&output.script_pubkey);
        }
        encoder.write_u32_le(self.lock_time);
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let transaction = Self::consensus_decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(transaction)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let input_count = read_count(decoder)?;
        let mut vin = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let prevout = OutPoint::consensus_decode(decoder)?;
            let script_sig = decoder.read_var_bytes()?;
            let sequence = decoder.read_u32_le()?;
            vin.push(TxIn {
                prevout,
                script_sig,
                sequence,
            });
        }
        let output_count = read_count(decoder)?;
        let mut vout = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = decoder.read_i64_le()?;
            let script_pubkey = decoder.read_var_bytes()?;
            vout.push(TxOut {
                value,
                script_pubkey,
            });
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

// Collection counts are bounded by the remaining input so a hostile prefix
// cannot trigger a huge allocation.
fn read_count(decoder: &mut Decoder<'_>) -> Result<usize, DecodeError> {
    let count = decoder.read_varint()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::LengthOutOfRange)?;
    if count > decoder.remaining() {
        return Err(DecodeError::LengthOutOfRange);
    }
    Ok(count)
}
