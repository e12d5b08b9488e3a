//! Block assembly and proof-of-work search

use crate::error::Result;
use crate::pow::check_proof_of_work;
use crate::script::{encode_script_num, push_data, OP_0};
use crate::serialization::{block_hash, hash_to_hex};
use crate::types::*;
use crate::witness::{
    build_commitment_script, compute_block_merkle_root, compute_witness_merkle_root,
    witness_commitment_digest,
};
use log::debug;
use std::thread::{self, JoinHandle};

/// Reserved value committed alongside the witness root
pub const WITNESS_RESERVED_VALUE: Hash = [0u8; 32];

/// Builds candidate blocks on top of a given tip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAssembler {
    pub bits: Natural,
    pub version: Integer,
}

impl BlockAssembler {
    pub fn new(bits: Natural) -> Self {
        Self { bits, version: 4 }
    }

    /// Assemble: ℋ × 𝒯𝒳 × ℕ × 𝒯𝒳* → ℬ
    ///
    /// 1. Coinbase first, then `transactions` in order
    /// 2. If any transaction carries witness data, commit to the witness root:
    ///    coinbase witness = [reserved],
    ///    output = OP_RETURN aa21a9ed sha256d(witness_root ‖ reserved)
    /// 3. Header merkle root over txids
    ///
    /// The nonce is left at zero; see [`BlockAssembler::solve`].
    pub fn assemble(
        &self,
        prev_hash: Hash,
        coinbase: Transaction,
        time: Natural,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let mut all = Vec::with_capacity(transactions.len() + 1);
        all.push(coinbase);
        all.extend(transactions);

        let mut block = Block {
            header: BlockHeader {
                version: self.version,
                prev_block_hash: prev_hash,
                merkle_root: [0u8; 32],
                timestamp: time,
                bits: self.bits,
                nonce: 0,
            },
            transactions: all,
        };

        if block.transactions[1..].iter().any(Transaction::has_witness) {
            add_witness_commitment(&mut block)?;
        }

        block.header.merkle_root = compute_block_merkle_root(&block.transactions)?;
        Ok(block)
    }

    /// Search the nonce space; on exhaustion bump the timestamp and restart
    pub fn solve(block: &mut Block) -> Result<()> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            if check_proof_of_work(&block.header)? {
                debug!(
                    "solved block {} after {} attempts",
                    hash_to_hex(&block_hash(&block.header)),
                    attempts
                );
                return Ok(());
            }
            if block.header.nonce >= u32::MAX as Natural {
                block.header.nonce = 0;
                block.header.timestamp += 1;
            } else {
                block.header.nonce += 1;
            }
        }
    }

    /// Run [`BlockAssembler::solve`] on a worker thread; join before submitting
    pub fn solve_in_background(mut block: Block) -> JoinHandle<Result<Block>> {
        thread::spawn(move || {
            Self::solve(&mut block)?;
            Ok(block)
        })
    }
}

/// Add the witness commitment output and the coinbase reserved value
pub fn add_witness_commitment(block: &mut Block) -> Result<()> {
    let coinbase = &mut block.transactions[0];
    coinbase.inputs[0].witness = vec![WITNESS_RESERVED_VALUE.to_vec()];

    let root = compute_witness_merkle_root(block)?;
    let digest = witness_commitment_digest(&root, &WITNESS_RESERVED_VALUE);
    block.transactions[0].outputs.push(TransactionOutput {
        value: 0,
        script_pubkey: build_commitment_script(&digest),
    });
    Ok(())
}

/// CreateCoinbase: ℕ × ℤ × 𝕊 → 𝒯𝒳
///
/// The height is pushed in the scriptSig so every coinbase has a distinct txid.
pub fn create_coinbase(height: Natural, value: Amount, script_pubkey: ByteString) -> Transaction {
    let mut script_sig = Vec::new();
    push_data(&mut script_sig, &encode_script_num(height));
    script_sig.push(OP_0);

    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: 0xffffffff,
            witness: vec![],
        }],
        outputs: vec![TransactionOutput { value, script_pubkey }],
        lock_time: 0,
    }
}
