//! Error types surfaced to the chain selector.

use std::fmt;

use prund_consensus::Hash256;
use prund_primitives::hash::hash256_to_hex;
use prund_primitives::OutPoint;
use prund_script::ScriptError;
use prund_storage::StoreError;

/// A consensus rule was violated; the block must be rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationError {
    MissingTransactions,
    CheckpointMismatch { height: u32 },
    Bip30Duplicate,
    MissingOutput(OutPoint),
    ImmatureCoinbase { depth: i64 },
    Script(ScriptError),
    SigopsExceeded,
    ValueOutOfRange,
    FeesOutOfRange,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::MissingTransactions => write!(f, "block has no transactions"),
            VerificationError::CheckpointMismatch { height } => {
                write!(f, "block failed checkpoint lock-in at height {height}")
            }
            VerificationError::Bip30Duplicate => write!(
                f,
                "duplicate transaction id with unspent outputs (BIP30)"
            ),
            VerificationError::MissingOutput(outpoint) => write!(
                f,
                "attempted spend of a non-existent or already spent output {}:{}",
                hash256_to_hex(&outpoint.hash),
                outpoint.index
            ),
            VerificationError::ImmatureCoinbase { depth } => {
                write!(f, "tried to spend coinbase at depth {depth}")
            }
            VerificationError::Script(err) => write!(f, "invalid script in transaction: {err}"),
            VerificationError::SigopsExceeded => {
                write!(f, "too many signature operations in block")
            }
            VerificationError::ValueOutOfRange => write!(f, "transaction value out of range"),
            VerificationError::FeesOutOfRange => write!(f, "transaction fees out of range"),
        }
    }
}

impl std::error::Error for VerificationError {}

#[derive(Debug)]
pub enum ChainError {
    Verification(VerificationError),
    Store(StoreError),
    /// Undo data needed for a reorganization has been pruned. The selector
    /// must refuse to reorganize past this block.
    Pruned(Hash256),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Verification(err) => write!(f, "{err}"),
            ChainError::Store(err) => write!(f, "{err}"),
            ChainError::Pruned(hash) => {
                write!(f, "undo data pruned for block {}", hash256_to_hex(hash))
            }
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainError::Verification(err) => Some(err),
            ChainError::Store(err) => Some(err),
            ChainError::Pruned(_) => None,
        }
    }
}

impl From<VerificationError> for ChainError {
    fn from(err: VerificationError) -> Self {
        ChainError::Verification(err)
    }
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}
