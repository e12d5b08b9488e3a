//! # Name-Consensus
//!
//! Consensus rules for a name registry embedded in a UTXO chain.
//!
//! Names are registered and updated by transaction outputs whose locking
//! script carries a name-operation prefix. Every live name is bound to
//! exactly one unspent output, and only the holder of that output can
//! update it. Outputs may sit at legacy, script-hash-wrapped witness or
//! native witness addresses; witness rules become consensus at a fixed
//! activation height while relay policy enforces them from the start.
//!
//! ## Layers
//!
//! - Wire codec and script interpreter (`serialization`, `script`, `witness`)
//! - Name state machine (`name_script`, `names`)
//! - Activation gate (`activation`)
//! - Acceptance pipeline (`transaction`, `mempool`, `validation`)
//! - Block assembly and proof of work (`mining`, `pow`)
//! - Wallet and node facade (`address`, `wallet`, `node`, `config`)
//!
//! ## Usage
//!
//! ```rust
//! use name_consensus::node::Node;
//! use name_consensus::config::NodeConfig;
//! use name_consensus::address::AddressType;
//!
//! let mut node = Node::new(NodeConfig::default()).unwrap();
//! node.mine_blocks(1).unwrap();
//!
//! let address = node.get_new_address(AddressType::Bech32);
//! node.register_name(b"d/example", b"{}", Some(address)).unwrap();
//! node.mine_blocks(1).unwrap();
//!
//! let info = node.show_name(b"d/example").unwrap();
//! assert_eq!(info.value, "{}");
//! assert_eq!(info.address, Some(address));
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod serialization;
pub mod script;
pub mod witness;
pub mod name_script;
pub mod names;
pub mod activation;
pub mod transaction;
pub mod pow;
pub mod mempool;
pub mod mining;
pub mod validation;
pub mod address;
pub mod wallet;
pub mod config;
pub mod node;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ConsensusError, Result, ScriptError};

use activation::{ActivationState, SegwitGate};
use names::{NameDb, NameMutation};
use script::{NoSignatureChecker, ScriptVerifier};

/// Stateless entry points into the consensus rules
///
/// # Examples
///
/// ```
/// use name_consensus::NameConsensus;
/// use name_consensus::activation::{ActivationState, SegwitGate};
///
/// let consensus = NameConsensus::new(SegwitGate::new(432));
/// assert_eq!(consensus.activation_state(431), ActivationState::Pre);
/// assert_eq!(consensus.activation_state(432), ActivationState::Post);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NameConsensus {
    gate: SegwitGate,
    verifier: script::Interpreter,
}

impl NameConsensus {
    pub fn new(gate: SegwitGate) -> Self {
        Self { gate, verifier: script::Interpreter }
    }

    pub fn gate(&self) -> &SegwitGate {
        &self.gate
    }

    pub fn activation_state(&self, height: Natural) -> ActivationState {
        self.gate.classify(height)
    }

    /// Validate a transaction's structure
    ///
    /// # Examples
    ///
    /// ```
    /// use name_consensus::NameConsensus;
    /// use name_consensus::types::*;
    ///
    /// let consensus = NameConsensus::default();
    /// let tx = Transaction {
    ///     version: 1,
    ///     inputs: vec![TransactionInput {
    ///         prevout: OutPoint::new([1; 32], 0),
    ///         script_sig: vec![],
    ///         sequence: 0xffffffff,
    ///         witness: vec![],
    ///     }],
    ///     outputs: vec![TransactionOutput { value: 1000, script_pubkey: vec![0x51] }],
    ///     lock_time: 0,
    /// };
    /// assert_eq!(consensus.validate_transaction(&tx).unwrap(), ValidationResult::Valid);
    /// ```
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<ValidationResult> {
        transaction::check_transaction(tx)
    }

    /// Validate inputs against the UTXO set; returns the fee when valid
    pub fn validate_tx_inputs(
        &self,
        tx: &Transaction,
        utxo_set: &UtxoSet,
    ) -> Result<(ValidationResult, Integer)> {
        transaction::check_tx_inputs(tx, utxo_set)
    }

    /// Name effect of `tx` against confirmed state
    pub fn validate_name_transaction(
        &self,
        tx: &Transaction,
        utxo_set: &UtxoSet,
        names: &NameDb,
    ) -> Result<Option<NameMutation>> {
        names::check_name_transaction(tx, utxo_set, names)
    }

    /// Verify a script pair under the consensus flags for `height`
    ///
    /// Signature opcodes always fail here; use the acceptance pipeline to
    /// check signed spends.
    ///
    /// # Examples
    ///
    /// ```
    /// use name_consensus::NameConsensus;
    ///
    /// let consensus = NameConsensus::default();
    /// // OP_1 | OP_1 OP_EQUAL
    /// assert!(consensus.verify_script(&[0x51], &[0x51, 0x87], &vec![], 1).is_ok());
    /// ```
    pub fn verify_script(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        witness: &Witness,
        height: Natural,
    ) -> std::result::Result<(), ScriptError> {
        let flags = self.gate.mandatory_flags(height);
        self.verifier.verify(script_sig, script_pubkey, witness, flags, &NoSignatureChecker)
    }

    pub fn check_proof_of_work(&self, header: &BlockHeader) -> Result<bool> {
        pow::check_proof_of_work(header)
    }
}
