//! Script parsing and signature-operation accounting.

pub mod opcodes;
pub mod sigops;
pub mod standard;

use std::fmt;

pub use sigops::{count_sig_ops, legacy_sig_op_count, p2sh_sig_op_count};
pub use standard::is_pay_to_script_hash;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptError {
    /// A push opcode claims more data than the script contains.
    TruncatedPush,
    /// A pay-to-script-hash scriptSig contained a non-push opcode.
    NonPushInScriptSig,
    /// Script execution rejected the input.
    VerifyFailed,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::TruncatedPush => write!(f, "truncated push data"),
            ScriptError::NonPushInScriptSig => {
                write!(f, "non-push opcode in pay-to-script-hash scriptSig")
            }
            ScriptError::VerifyFailed => write!(f, "script verification failed"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Per-input script execution, provided by a collaborator.
///
/// The connect engine treats execution as an opaque pure predicate over the
/// unlocking and locking scripts; interpreters plug in here.
pub trait ScriptVerifier: Send + Sync {
    fn verify(&self, script_sig: &[u8], script_pubkey: &[u8]) -> bool;
}

impl<F> ScriptVerifier for F
where
    F: Fn(&[u8], &[u8]) -> bool + Send + Sync,
{
    fn verify(&self, script_sig: &[u8], script_pubkey: &[u8]) -> bool {
        self(script_sig, script_pubkey)
    }
}
