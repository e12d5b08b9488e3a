//! Error types for consensus validation

use thiserror::Error;

/// Opcode-level script failure reasons
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Script evaluated without error but finished with a false/empty top stack element")]
    EvalFalse,

    #[error("OP_RETURN was encountered")]
    OpReturn,

    #[error("Script is too big")]
    ScriptSize,

    #[error("Push value size limit exceeded")]
    PushSize,

    #[error("Operation limit exceeded")]
    OpCount,

    #[error("Stack size limit exceeded")]
    StackSize,

    #[error("Script failed an OP_VERIFY operation")]
    Verify,

    #[error("Script failed an OP_EQUALVERIFY operation")]
    EqualVerify,

    #[error("Script failed an OP_CHECKSIGVERIFY operation")]
    CheckSigVerify,

    #[error("Opcode missing or not understood")]
    BadOpcode,

    #[error("Operation not valid with the current stack size")]
    InvalidStackOperation,

    #[error("Only push operators allowed in signatures")]
    SigPushOnly,

    #[error("Stack size must be exactly one after execution")]
    CleanStack,

    #[error("Witness program has incorrect length")]
    WitnessProgramWrongLength,

    #[error("Witness program was passed an empty witness")]
    WitnessProgramWitnessEmpty,

    #[error("Witness program hash mismatch")]
    WitnessProgramMismatch,

    #[error("Witness requires empty scriptSig")]
    WitnessMalleated,

    #[error("Witness requires only-redeemscript scriptSig")]
    WitnessMalleatedP2sh,

    #[error("Witness provided for non-witness script")]
    WitnessUnexpected,

    #[error("Witness version reserved for soft-fork upgrades")]
    DiscourageUpgradableWitnessProgram,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Transaction validation failed: {0}")]
    TransactionValidation(String),

    #[error("block validation failed: {reason}")]
    BlockValidation {
        reason: String,
        #[source]
        cause: Option<Box<ConsensusError>>,
    },

    #[error("mandatory-script-verify-flag-failed ({reason})")]
    ScriptVerify { reason: ScriptError },

    #[error("non-mandatory-script-verify-flag ({reason})")]
    NonMandatoryFlag { reason: ScriptError },

    #[error("name already registered: {name}")]
    DuplicateName { name: String },

    #[error("name does not exist: {name}")]
    UnknownName { name: String },

    #[error("update of {name} does not spend its current output")]
    WrongPrevout { name: String },

    #[error("name not found: {0}")]
    NameNotFound(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("Name transaction invalid: {0}")]
    NameTransaction(String),

    #[error("Transaction rejected by mempool: {0}")]
    MempoolRejected(String),

    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// Wrap a transaction-level failure so it rejects the whole block
    pub fn block(reason: impl Into<String>, cause: ConsensusError) -> Self {
        ConsensusError::BlockValidation {
            reason: reason.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Block-level failure without an underlying transaction error
    pub fn bad_block(reason: impl Into<String>) -> Self {
        ConsensusError::BlockValidation {
            reason: reason.into(),
            cause: None,
        }
    }

    /// Innermost script failure carried by this error, if any
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            ConsensusError::ScriptVerify { reason } => Some(reason),
            ConsensusError::NonMandatoryFlag { reason } => Some(reason),
            ConsensusError::BlockValidation { cause: Some(cause), .. } => cause.script_error(),
            _ => None,
        }
    }

    /// Reject reason as reported to a block or transaction submitter
    pub fn reject_reason(&self) -> String {
        match self {
            ConsensusError::BlockValidation { cause: Some(cause), .. } => cause.reject_reason(),
            ConsensusError::BlockValidation { reason, cause: None } => reason.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_verify_display() {
        let err = ConsensusError::ScriptVerify { reason: ScriptError::EqualVerify };
        assert_eq!(
            err.to_string(),
            "mandatory-script-verify-flag-failed (Script failed an OP_EQUALVERIFY operation)"
        );
    }

    #[test]
    fn test_non_mandatory_display() {
        let err = ConsensusError::NonMandatoryFlag { reason: ScriptError::EqualVerify };
        assert_eq!(
            err.to_string(),
            "non-mandatory-script-verify-flag (Script failed an OP_EQUALVERIFY operation)"
        );
    }

    #[test]
    fn test_block_reject_reason_uses_cause() {
        let err = ConsensusError::block(
            "tx 1",
            ConsensusError::ScriptVerify { reason: ScriptError::EqualVerify },
        );
        assert!(err.reject_reason().starts_with("mandatory-script-verify-flag-failed"));
        assert_eq!(err.script_error(), Some(&ScriptError::EqualVerify));
    }

    #[test]
    fn test_bad_block_reason() {
        let err = ConsensusError::bad_block("unexpected-witness");
        assert_eq!(err.reject_reason(), "unexpected-witness");
        assert!(err.script_error().is_none());
    }
}
