//! Block acceptance
//!
//! [`ChainState`] owns the UTXO set and the name database. A block is
//! validated against a staged copy of both; the copy replaces the live state
//! only if every check passes, so a rejected block leaves no trace. Each
//! connected block records undo data so the tip can be disconnected again.

use crate::activation::SegwitGate;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::mining::create_coinbase;
use crate::name_script::NameScript;
use crate::names::{check_name_transaction, display_name, NameDb, NameEntry, NameUndo};
use crate::pow::check_proof_of_work;
use crate::script::{ScriptVerifier, OP_RETURN};
use crate::serialization::{block_hash, hash_to_hex, txid};
use crate::transaction::{
    check_transaction, check_tx_inputs, collect_spent_outputs, verify_transaction_scripts,
};
use crate::types::*;
use crate::witness::{compute_block_merkle_root, validate_witness_commitment};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Everything needed to revert one connected block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    /// Transactions of the block, handed back on disconnect
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    pub spent: Vec<(OutPoint, UTXO)>,
    pub created: Vec<OutPoint>,
    pub names: Vec<NameUndo>,
}

/// Serializable image of a [`ChainState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub deployment_height: Natural,
    pub headers: Vec<BlockHeader>,
    pub utxos: Vec<(OutPoint, UTXO)>,
    pub names: Vec<NameEntry>,
    pub undo: Vec<BlockUndo>,
}

/// Header of the fixed genesis block
pub fn genesis_header() -> BlockHeader {
    let coinbase = create_coinbase(0, BLOCK_SUBSIDY, vec![OP_RETURN]);
    BlockHeader {
        version: 1,
        prev_block_hash: [0u8; 32],
        merkle_root: compute_block_merkle_root(&[coinbase]).unwrap_or([0u8; 32]),
        timestamp: GENESIS_TIMESTAMP,
        bits: POW_LIMIT_BITS,
        nonce: 0,
    }
}

/// Chain tip state: headers, UTXO set, names and undo data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    gate: SegwitGate,
    headers: Vec<BlockHeader>,
    utxo_set: UtxoSet,
    names: NameDb,
    undo: Vec<BlockUndo>,
}

impl ChainState {
    pub fn new(gate: SegwitGate) -> Self {
        Self {
            gate,
            headers: vec![genesis_header()],
            utxo_set: UtxoSet::new(),
            names: NameDb::new(),
            undo: Vec::new(),
        }
    }

    pub fn gate(&self) -> &SegwitGate {
        &self.gate
    }

    /// Height of the tip; genesis is height 0
    pub fn height(&self) -> Natural {
        (self.headers.len() - 1) as Natural
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.headers[self.headers.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash {
        block_hash(self.tip())
    }

    pub fn header_at(&self, height: Natural) -> Option<&BlockHeader> {
        self.headers.get(height as usize)
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn names(&self) -> &NameDb {
        &self.names
    }

    /// Median timestamp of the last MEDIAN_TIME_SPAN headers
    pub fn median_time_past(&self) -> Natural {
        let start = self.headers.len().saturating_sub(MEDIAN_TIME_SPAN);
        let mut times: Vec<Natural> = self.headers[start..].iter().map(|h| h.timestamp).collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// ConnectBlock: ℬ × 𝒰𝒮 × NameDb → {valid, invalid} × 𝒰𝒮 × NameDb
    ///
    /// For block b = (h, txs) at height = tip + 1:
    /// 1. Validate header h: parent, proof of work, difficulty, merkle root,
    ///    timestamp above median time past
    /// 2. Coinbase first and only first
    /// 3. Witness rules: before activation any witness data is rejected;
    ///    afterwards a present commitment must match
    /// 4. For each tx ∈ txs in order, against the staged state:
    ///    structure, inputs, scripts under the gate's mandatory flags, name
    ///    rules; then apply UTXO and name effects
    /// 5. Coinbase output ≤ subsidy + fees
    /// 6. Swap the staged state in and record undo data
    ///
    /// Any failure is a `BlockValidation` error and leaves `self` untouched.
    pub fn connect_block(&mut self, block: &Block, verifier: &dyn ScriptVerifier) -> Result<()> {
        let height = self.height() + 1;
        let hash = block_hash(&block.header);

        match self.stage_block(block, height, verifier) {
            Ok((utxo_set, names, mut undo)) => {
                undo.transactions = block.transactions.clone();
                self.utxo_set = utxo_set;
                self.names = names;
                self.headers.push(block.header.clone());
                self.undo.push(undo);
                info!(
                    "connected block {} at height {} ({} txs)",
                    hash_to_hex(&hash),
                    height,
                    block.transactions.len()
                );
                Ok(())
            }
            Err(err) => {
                warn!("rejected block {}: {}", hash_to_hex(&hash), err.reject_reason());
                Err(err)
            }
        }
    }

    fn check_header(&self, block: &Block) -> Result<()> {
        let header = &block.header;
        if header.prev_block_hash != self.tip_hash() {
            return Err(ConsensusError::bad_block("bad-prevblk"));
        }
        if header.bits != self.tip().bits {
            return Err(ConsensusError::bad_block("bad-diffbits"));
        }
        match check_proof_of_work(header) {
            Ok(true) => {}
            Ok(false) => return Err(ConsensusError::bad_block("high-hash")),
            Err(e) => return Err(ConsensusError::block("bad-diffbits", e)),
        }
        if header.timestamp <= self.median_time_past() {
            return Err(ConsensusError::bad_block("time-too-old"));
        }
        let merkle_root = compute_block_merkle_root(&block.transactions)
            .map_err(|e| ConsensusError::block("bad-txnmrklroot", e))?;
        if merkle_root != header.merkle_root {
            return Err(ConsensusError::bad_block("bad-txnmrklroot"));
        }
        Ok(())
    }

    fn stage_block(
        &self,
        block: &Block,
        height: Natural,
        verifier: &dyn ScriptVerifier,
    ) -> Result<(UtxoSet, NameDb, BlockUndo)> {
        match block.transactions.first() {
            Some(coinbase) if coinbase.is_coinbase() => {}
            _ => return Err(ConsensusError::bad_block("bad-cb-missing")),
        }
        if block.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ConsensusError::bad_block("bad-cb-multiple"));
        }

        self.check_header(block)?;

        if self.gate.is_active(height) {
            validate_witness_commitment(block)?;
        } else if block.has_witness() {
            return Err(ConsensusError::bad_block("unexpected-witness"));
        }

        let flags = self.gate.mandatory_flags(height);
        let mut utxo_set = self.utxo_set.clone();
        let mut names = self.names.clone();
        let mut undo = BlockUndo::default();
        let mut total_fees: Amount = 0;

        for (i, tx) in block.transactions.iter().enumerate() {
            let tx_id = txid(tx);
            let in_block = |e: ConsensusError| {
                ConsensusError::block(format!("tx {} ({})", i, hash_to_hex(&tx_id)), e)
            };

            if let ValidationResult::Invalid(reason) = check_transaction(tx)? {
                return Err(in_block(ConsensusError::TransactionValidation(reason)));
            }

            let mutation = if tx.is_coinbase() {
                None
            } else {
                let spent_outputs = collect_spent_outputs(tx, &utxo_set).map_err(in_block)?;
                let (input_valid, fee) = check_tx_inputs(tx, &utxo_set)?;
                if let ValidationResult::Invalid(reason) = input_valid {
                    return Err(in_block(ConsensusError::TransactionValidation(reason)));
                }
                total_fees += fee;

                verify_transaction_scripts(tx, &spent_outputs, flags, verifier)
                    .map_err(|reason| in_block(ConsensusError::ScriptVerify { reason }))?;

                let mutation =
                    check_name_transaction(tx, &utxo_set, &names).map_err(in_block)?;

                for input in &tx.inputs {
                    if let Some(utxo) = utxo_set.remove(&input.prevout) {
                        undo.spent.push((input.prevout, utxo));
                    }
                }
                mutation
            };

            for (index, output) in tx.outputs.iter().enumerate() {
                if output.script_pubkey.first() == Some(&OP_RETURN) {
                    continue;
                }
                let outpoint = OutPoint::new(tx_id, index as Natural);
                utxo_set.insert(
                    outpoint,
                    UTXO { value: output.value, script_pubkey: output.script_pubkey.clone(), height },
                );
                undo.created.push(outpoint);
            }

            if let Some(mutation) = mutation {
                let script = &tx.outputs[mutation.output].script_pubkey;
                let name_undo =
                    names.apply(&mutation, tx_id, script, height).map_err(in_block)?;
                undo.names.push(name_undo);
            }
        }

        let coinbase_value: Amount = block.transactions[0].outputs.iter().map(|o| o.value).sum();
        if coinbase_value > BLOCK_SUBSIDY + total_fees {
            return Err(ConsensusError::bad_block("bad-cb-amount"));
        }

        Ok((utxo_set, names, undo))
    }

    /// DisconnectTip: revert the last connected block from its undo data
    /// and return the block
    pub fn disconnect_tip(&mut self) -> Result<Block> {
        let undo = self.undo.pop().ok_or_else(|| {
            ConsensusError::bad_block("cannot disconnect the genesis block")
        })?;
        let header = self.headers.pop().ok_or_else(|| {
            ConsensusError::bad_block("cannot disconnect the genesis block")
        })?;

        for (outpoint, utxo) in undo.spent {
            self.utxo_set.insert(outpoint, utxo);
        }
        for outpoint in &undo.created {
            self.utxo_set.remove(outpoint);
        }
        for name_undo in undo.names.into_iter().rev() {
            self.names.undo(name_undo);
        }

        debug!("disconnected block {} at height {}", hash_to_hex(&block_hash(&header)), self.height() + 1);
        Ok(Block { header, transactions: undo.transactions })
    }

    /// CheckNameDb: every live name is bound to an unspent output whose
    /// script carries that name and value, and every unspent name output
    /// is the binding of its name
    pub fn check_name_db(&self) -> Result<()> {
        let inconsistent = |msg: String| Err(ConsensusError::NameTransaction(msg));

        for entry in self.names.iter() {
            let name = display_name(&entry.name);
            let utxo = match self.utxo_set.get(&entry.outpoint) {
                Some(utxo) => utxo,
                None => return inconsistent(format!("{} is bound to a spent output", name)),
            };
            match NameScript::parse(&utxo.script_pubkey).op {
                Some(op) if op.name() == entry.name.as_slice() && op.value() == entry.value.as_slice() => {}
                _ => return inconsistent(format!("output of {} does not carry its state", name)),
            }
        }

        for (outpoint, utxo) in &self.utxo_set {
            if let Some(op) = NameScript::parse(&utxo.script_pubkey).op {
                let bound = self.names.lookup(op.name()).map(|entry| entry.outpoint);
                if bound != Some(*outpoint) {
                    return inconsistent(format!(
                        "unspent output for {} is not its current binding",
                        display_name(op.name())
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let mut utxos: Vec<(OutPoint, UTXO)> =
            self.utxo_set.iter().map(|(k, v)| (*k, v.clone())).collect();
        utxos.sort_by(|a, b| (a.0.hash, a.0.index).cmp(&(b.0.hash, b.0.index)));
        ChainSnapshot {
            deployment_height: self.gate.deployment_height,
            headers: self.headers.clone(),
            utxos,
            names: self.names.iter().cloned().collect(),
            undo: self.undo.clone(),
        }
    }

    pub fn from_snapshot(snapshot: ChainSnapshot) -> Result<Self> {
        if snapshot.headers.is_empty() {
            return Err(ConsensusError::Serialization("snapshot without headers".to_string()));
        }
        if snapshot.undo.len() + 1 != snapshot.headers.len() {
            return Err(ConsensusError::Serialization(
                "snapshot undo data does not match headers".to_string(),
            ));
        }

        let mut names = NameDb::new();
        for entry in snapshot.names {
            names.insert(entry);
        }
        Ok(Self {
            gate: SegwitGate::new(snapshot.deployment_height),
            headers: snapshot.headers,
            utxo_set: snapshot.utxos.into_iter().collect(),
            names,
            undo: snapshot.undo,
        })
    }
}
