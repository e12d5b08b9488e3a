//! Segregated witness commitments
//!
//! WitnessRoot = MerkleRoot({wtxid(tx) : tx ∈ block.transactions}) with the
//! coinbase wtxid replaced by zero. The coinbase commits to
//! sha256d(WitnessRoot ‖ reserved) in an OP_RETURN output.

use crate::constants::WITNESS_COMMITMENT_HEADER;
use crate::error::{ConsensusError, Result};
use crate::serialization::{sha256d, txid, wtxid};
use crate::types::*;

/// Size of a commitment script: OP_RETURN, push 36, header, digest
const COMMITMENT_SCRIPT_LEN: usize = 38;

/// Compute merkle root from hashes, duplicating the last hash on odd levels
pub fn compute_merkle_root(hashes: &[Hash]) -> Result<Hash> {
    if hashes.is_empty() {
        return Err(ConsensusError::TransactionValidation(
            "Cannot compute merkle root from empty hash list".to_string(),
        ));
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&chunk[0]);
            combined[32..].copy_from_slice(chunk.get(1).unwrap_or(&chunk[0]));
            next_level.push(sha256d(&combined));
        }
        level = next_level;
    }

    Ok(level[0])
}

/// Merkle root over txids, as committed in the block header
pub fn compute_block_merkle_root(transactions: &[Transaction]) -> Result<Hash> {
    let hashes: Vec<Hash> = transactions.iter().map(txid).collect();
    compute_merkle_root(&hashes)
}

/// Merkle root over wtxids with the coinbase slot zeroed
pub fn compute_witness_merkle_root(block: &Block) -> Result<Hash> {
    if block.transactions.is_empty() {
        return Err(ConsensusError::bad_block(
            "Cannot compute witness merkle root for empty block",
        ));
    }

    let hashes: Vec<Hash> = block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| if i == 0 { [0u8; 32] } else { wtxid(tx) })
        .collect();
    compute_merkle_root(&hashes)
}

/// Commitment digest placed into the coinbase
pub fn witness_commitment_digest(witness_root: &Hash, reserved: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(witness_root);
    data[32..].copy_from_slice(reserved);
    sha256d(&data)
}

/// Build `OP_RETURN <0xaa21a9ed ‖ digest>`
pub fn build_commitment_script(digest: &Hash) -> ByteString {
    let mut script = Vec::with_capacity(COMMITMENT_SCRIPT_LEN);
    script.push(0x6a); // OP_RETURN
    script.push(0x24); // push 36 bytes
    script.extend_from_slice(&WITNESS_COMMITMENT_HEADER);
    script.extend_from_slice(digest);
    script
}

/// Extract the commitment digest from an output script
pub fn extract_witness_commitment(script: &[u8]) -> Option<Hash> {
    if script.len() >= COMMITMENT_SCRIPT_LEN
        && script[0] == 0x6a
        && script[1] == 0x24
        && script[2..6] == WITNESS_COMMITMENT_HEADER
    {
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&script[6..38]);
        return Some(commitment);
    }
    None
}

/// Index of the commitment output; the last matching output wins
pub fn find_commitment_output(coinbase: &Transaction) -> Option<usize> {
    coinbase
        .outputs
        .iter()
        .rposition(|output| extract_witness_commitment(&output.script_pubkey).is_some())
}

/// Validate the witness commitment of a block whose witness rules are active
///
/// A block without a commitment is valid only if it carries no witness data.
pub fn validate_witness_commitment(block: &Block) -> Result<()> {
    let coinbase = block
        .transactions
        .first()
        .ok_or_else(|| ConsensusError::bad_block("bad-cb-missing"))?;

    let index = match find_commitment_output(coinbase) {
        Some(index) => index,
        None => {
            if block.has_witness() {
                return Err(ConsensusError::bad_block("unexpected-witness"));
            }
            return Ok(());
        }
    };

    let reserved = match coinbase.inputs[0].witness.as_slice() {
        [element] if element.len() == 32 => {
            let mut reserved = [0u8; 32];
            reserved.copy_from_slice(element);
            reserved
        }
        _ => return Err(ConsensusError::bad_block("bad-witness-nonce-size")),
    };

    let committed = extract_witness_commitment(&coinbase.outputs[index].script_pubkey)
        .ok_or_else(|| ConsensusError::bad_block("bad-witness-merkle-match"))?;
    let root = compute_witness_merkle_root(block)?;
    if witness_commitment_digest(&root, &reserved) != committed {
        return Err(ConsensusError::bad_block("bad-witness-merkle-match"));
    }

    Ok(())
}
