//! Fully-validating, pruning block-chain connector.
//!
//! The engine applies candidate blocks to a persistent UTXO set inside a
//! store-level write batch, records per-block undo information, and can
//! replay or reverse blocks during reorganizations. Header-chain selection
//! sits above it behind the [`engine::ChainEngine`] hooks; script execution
//! sits below it behind [`prund_script::ScriptVerifier`].

pub mod engine;
pub mod error;
pub mod store;
pub mod stored;

pub use engine::{ChainEngine, FullPrunedChain};
pub use error::{ChainError, VerificationError};
pub use store::{FullPrunedStore, KvPrunedStore};
pub use stored::{
    StoredBlock, StoredOutput, StoredTransaction, StoredUndoableBlock, TxOutputChanges,
};
