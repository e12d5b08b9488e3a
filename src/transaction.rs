//! Context-free and UTXO-dependent transaction checks

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::script::{ScriptResult, ScriptVerifier, TransactionSignatureChecker};
use crate::serialization::{hash_to_hex, serialize_transaction};
use crate::types::*;
use std::collections::HashSet;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (v, ins, outs, lt) is valid if and only if:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. ∀o ∈ outs: 0 ≤ o.value ≤ M_max, and Σ o.value ≤ M_max
/// 3. |ins| ≤ M_max_inputs ∧ |outs| ≤ M_max_outputs
/// 4. |serialize(tx, no witness)| ≤ M_max_tx_size
/// 5. no two inputs spend the same outpoint
/// 6. a coinbase has a 2..=100 byte scriptSig; other inputs have non-null prevouts
pub fn check_transaction(tx: &Transaction) -> Result<ValidationResult> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Ok(ValidationResult::Invalid("Empty inputs or outputs".to_string()));
    }

    let mut total = 0i64;
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 || output.value > MAX_MONEY {
            return Ok(ValidationResult::Invalid(format!(
                "Invalid output value {} at index {}",
                output.value, i
            )));
        }
        total += output.value;
        if total > MAX_MONEY {
            return Ok(ValidationResult::Invalid("Total output value out of range".to_string()));
        }
    }

    if tx.inputs.len() > MAX_INPUTS {
        return Ok(ValidationResult::Invalid(format!("Too many inputs: {}", tx.inputs.len())));
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return Ok(ValidationResult::Invalid(format!("Too many outputs: {}", tx.outputs.len())));
    }

    let tx_size = serialize_transaction(tx, false).len();
    if tx_size > MAX_TX_SIZE {
        return Ok(ValidationResult::Invalid(format!("Transaction too large: {} bytes", tx_size)));
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Ok(ValidationResult::Invalid("Duplicate input".to_string()));
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return Ok(ValidationResult::Invalid(format!("Bad coinbase script length {}", len)));
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Ok(ValidationResult::Invalid("Null prevout".to_string()));
    }

    Ok(ValidationResult::Valid)
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 → {valid, invalid} × ℤ
///
/// For transaction tx with UTXO set us:
/// 1. If tx is coinbase: return (valid, 0)
/// 2. Let total_in = Σᵢ us(i.prevout).value
/// 3. Let total_out = Σₒ o.value
/// 4. If total_in < total_out: return (invalid, 0)
/// 5. Return (valid, total_in - total_out)
pub fn check_tx_inputs(tx: &Transaction, utxo_set: &UtxoSet) -> Result<(ValidationResult, Integer)> {
    if tx.is_coinbase() {
        return Ok((ValidationResult::Valid, 0));
    }

    let mut total_input_value = 0i64;
    for (i, input) in tx.inputs.iter().enumerate() {
        match utxo_set.get(&input.prevout) {
            Some(utxo) => total_input_value += utxo.value,
            None => {
                return Ok((
                    ValidationResult::Invalid(format!("Input {} not found in UTXO set", i)),
                    0,
                ))
            }
        }
    }

    let total_output_value: i64 = tx.outputs.iter().map(|o| o.value).sum();
    if total_input_value < total_output_value {
        return Ok((ValidationResult::Invalid("Insufficient input value".to_string()), 0));
    }

    Ok((ValidationResult::Valid, total_input_value - total_output_value))
}

/// Outputs spent by `tx`, in input order
pub fn collect_spent_outputs(tx: &Transaction, utxo_set: &UtxoSet) -> Result<Vec<UTXO>> {
    tx.inputs
        .iter()
        .map(|input| {
            utxo_set.get(&input.prevout).cloned().ok_or_else(|| {
                ConsensusError::UtxoNotFound(format!(
                    "{}:{}",
                    hash_to_hex(&input.prevout.hash),
                    input.prevout.index
                ))
            })
        })
        .collect()
}

/// Verify every input script of `tx` under `flags`
///
/// `spent_outputs[i]` is the output spent by input i. Evaluation stops at the
/// first failing input.
pub fn verify_transaction_scripts(
    tx: &Transaction,
    spent_outputs: &[UTXO],
    flags: u32,
    verifier: &dyn ScriptVerifier,
) -> ScriptResult<()> {
    for (i, (input, spent)) in tx.inputs.iter().zip(spent_outputs).enumerate() {
        let checker = TransactionSignatureChecker::new(tx, i, spent.value);
        verifier.verify(&input.script_sig, &spent.script_pubkey, &input.witness, flags, &checker)?;
    }
    Ok(())
}
