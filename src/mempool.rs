//! Mempool admission
//!
//! Admission evaluates scripts with the relay (standard) flags. A failure is
//! rechecked with the consensus (mandatory) flags to tell relay-only policy
//! failures apart from real script failures. Admission never touches the
//! name database. Pool transactions may spend outputs of earlier pool
//! transactions, so a name can carry a chain of pending updates on top of
//! its confirmed state or a pending registration.

use crate::activation::SegwitGate;
use crate::address::Destination;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::name_script::{NameOp, NameScript};
use crate::names::{check_name_transaction, display_name, NameDb, NameView};
use crate::script::{witness_program, ScriptVerifier, OP_RETURN};
use crate::serialization::{hash_to_hex, txid};
use crate::transaction::{
    check_transaction, check_tx_inputs, collect_spent_outputs, verify_transaction_scripts,
};
use crate::types::*;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Largest OP_RETURN output relayed
pub const MAX_DATA_CARRIER_SIZE: usize = 83;

/// Relay limits applied on top of consensus rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolPolicy {
    /// Fees above this are rejected unless the submitter allows high fees
    pub max_fee: Amount,
    pub allow_high_fees: bool,
}

impl Default for MempoolPolicy {
    fn default() -> Self {
        Self { max_fee: COIN / 10, allow_high_fees: false }
    }
}

/// Admitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash,
    pub fee: Amount,
    pub name_op: Option<NameOp>,
}

impl MempoolEntry {
    /// The output carrying this entry's name operation
    pub fn name_outpoint(&self) -> Option<OutPoint> {
        self.name_op.as_ref()?;
        self.tx
            .outputs
            .iter()
            .position(|output| NameScript::parse(&output.script_pubkey).is_name_op())
            .map(|index| OutPoint::new(self.txid, index as Natural))
    }
}

/// Pool of unconfirmed transactions in admission order
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<Hash, MempoolEntry>,
    order: Vec<Hash>,
    spent: HashMap<OutPoint, Hash>,
    pending_registrations: HashMap<ByteString, Hash>,
    pending_updates: HashMap<ByteString, Vec<Hash>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains_key(outpoint)
    }

    pub fn has_pending_registration(&self, name: &[u8]) -> bool {
        self.pending_registrations.contains_key(name)
    }

    pub fn has_pending_update(&self, name: &[u8]) -> bool {
        self.pending_updates.get(name).map_or(false, |txids| !txids.is_empty())
    }

    /// Output created by a pool transaction, as it would be confirmed at `height`
    pub fn output(&self, outpoint: &OutPoint, height: Natural) -> Option<UTXO> {
        let output = self.entries.get(&outpoint.hash)?.tx.outputs.get(outpoint.index as usize)?;
        if output.script_pubkey.first() == Some(&OP_RETURN) {
            return None;
        }
        Some(UTXO { value: output.value, script_pubkey: output.script_pubkey.clone(), height })
    }

    /// Entries in admission order
    ///
    /// A transaction always comes after the pool transactions it spends.
    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.order.iter().filter_map(|txid| self.entries.get(txid))
    }

    /// Record an entry produced by [`accept_to_memory_pool`]
    pub fn insert(&mut self, entry: MempoolEntry) {
        for input in &entry.tx.inputs {
            self.spent.insert(input.prevout, entry.txid);
        }
        match &entry.name_op {
            Some(NameOp::Register { name, .. }) => {
                self.pending_registrations.insert(name.clone(), entry.txid);
            }
            Some(NameOp::Update { name, .. }) => {
                self.pending_updates.entry(name.clone()).or_default().push(entry.txid);
            }
            None => {}
        }
        self.order.push(entry.txid);
        self.entries.insert(entry.txid, entry);
    }

    pub fn remove(&mut self, txid: &Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.order.retain(|id| id != txid);
        for input in &entry.tx.inputs {
            self.spent.remove(&input.prevout);
        }
        match &entry.name_op {
            Some(NameOp::Register { name, .. }) => {
                self.pending_registrations.remove(name);
            }
            Some(NameOp::Update { name, .. }) => {
                if let Some(txids) = self.pending_updates.get_mut(name) {
                    txids.retain(|id| id != txid);
                    if txids.is_empty() {
                        self.pending_updates.remove(name);
                    }
                }
            }
            None => {}
        }
        Some(entry)
    }

    /// Evict transactions mined in `block`, those that conflict with it and
    /// every pool descendant of a conflict
    ///
    /// A conflict spends an output the block spent or registers a name the
    /// block registered. Descendants of mined transactions stay; their
    /// inputs are now confirmed.
    pub fn remove_for_block(&mut self, block: &Block) {
        let mut mined: HashSet<Hash> = HashSet::new();
        let mut conflicted: HashSet<Hash> = HashSet::new();

        for tx in &block.transactions {
            let id = txid(tx);
            if self.contains(&id) {
                mined.insert(id);
            }
            for input in &tx.inputs {
                if let Some(spender) = self.spent.get(&input.prevout) {
                    if *spender != id {
                        conflicted.insert(*spender);
                    }
                }
            }
            for output in &tx.outputs {
                if let Some(NameOp::Register { name, .. }) = NameScript::parse(&output.script_pubkey).op {
                    if let Some(pending) = self.pending_registrations.get(&name) {
                        if *pending != id {
                            conflicted.insert(*pending);
                        }
                    }
                }
            }
        }

        // Admission order puts parents first, so one pass finds all descendants
        for entry in self.entries() {
            if entry.tx.inputs.iter().any(|input| conflicted.contains(&input.prevout.hash)) {
                conflicted.insert(entry.txid);
            }
        }

        for id in mined.iter().chain(conflicted.iter()) {
            self.remove(id);
        }
        if !conflicted.is_empty() {
            debug!("evicted {} conflicting mempool transactions", conflicted.len());
        }
    }
}

/// Confirmed names with the pool's pending operations applied in order
struct PendingNames<'a> {
    names: &'a NameDb,
    mempool: &'a Mempool,
}

impl NameView for PendingNames<'_> {
    fn binding(&self, name: &[u8]) -> Option<OutPoint> {
        let mut current = match self.names.binding(name) {
            Some(outpoint) => outpoint,
            None => {
                let txid = self.mempool.pending_registrations.get(name)?;
                self.mempool.get(txid)?.name_outpoint()?
            }
        };
        while let Some(entry) = self.mempool.spent.get(&current).and_then(|id| self.mempool.get(id)) {
            match (&entry.name_op, entry.name_outpoint()) {
                (Some(op), Some(next)) if op.name() == name => current = next,
                _ => break,
            }
        }
        Some(current)
    }
}

/// IsStandardTx: 𝒯𝒳 → {true, false}
///
/// Relay policy on outputs: the address part of every output (after any
/// name prefix) is a known destination template, or the output is a small
/// OP_RETURN data carrier. Unknown witness versions are non-standard.
pub fn is_standard_tx(tx: &Transaction) -> Result<bool> {
    for input in &tx.inputs {
        if input.script_sig.len() > MAX_SCRIPT_SIZE {
            return Ok(false);
        }
    }

    for output in &tx.outputs {
        let script = &output.script_pubkey;
        if script.first() == Some(&OP_RETURN) {
            if script.len() > MAX_DATA_CARRIER_SIZE {
                return Ok(false);
            }
            continue;
        }
        let address = NameScript::parse(script).address;
        if let Some((version, _)) = witness_program(address) {
            if version != 0 {
                return Ok(false);
            }
        }
        if Destination::from_script(address).is_none() {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Check for inputs already spent by a pool transaction
fn has_conflicts(tx: &Transaction, mempool: &Mempool) -> bool {
    tx.inputs.iter().any(|input| mempool.is_spent(&input.prevout))
}

/// Outputs spent by `tx`, taken from the UTXO set or from pool transactions
fn resolve_inputs(tx: &Transaction, utxo_set: &UtxoSet, mempool: &Mempool, height: Natural) -> UtxoSet {
    tx.inputs
        .iter()
        .filter_map(|input| {
            let utxo = utxo_set
                .get(&input.prevout)
                .cloned()
                .or_else(|| mempool.output(&input.prevout, height))?;
            Some((input.prevout, utxo))
        })
        .collect()
}

/// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒮 × NameDb × Mempool → MempoolEntry
///
/// For transaction tx at the height of the next block:
/// 1. Reject coinbases and transactions already in the pool
/// 2. Validate transaction structure and standardness
/// 3. Check inputs against the UTXO set and pool outputs
/// 4. Check the fee against the policy limit
/// 5. Check name rules against confirmed and pending name state
/// 6. Verify scripts with standard flags; classify failures with mandatory flags
///
/// The caller inserts the returned entry; nothing is mutated here.
#[allow(clippy::too_many_arguments)]
pub fn accept_to_memory_pool(
    tx: &Transaction,
    utxo_set: &UtxoSet,
    names: &NameDb,
    mempool: &Mempool,
    height: Natural,
    gate: &SegwitGate,
    verifier: &dyn ScriptVerifier,
    policy: &MempoolPolicy,
) -> Result<MempoolEntry> {
    let tx_id = txid(tx);
    let reject = |reason: &str| {
        debug!("rejected {} from mempool: {}", hash_to_hex(&tx_id), reason);
        Err(ConsensusError::MempoolRejected(reason.to_string()))
    };

    // 1. Coinbase and duplicates
    if tx.is_coinbase() {
        return reject("coinbase");
    }
    if mempool.contains(&tx_id) {
        return reject("txn-already-in-mempool");
    }

    // 2. Structure and standardness
    if let ValidationResult::Invalid(reason) = check_transaction(tx)? {
        return Err(ConsensusError::TransactionValidation(reason));
    }
    if !is_standard_tx(tx)? {
        return reject("scriptpubkey");
    }

    // 3. Inputs
    if has_conflicts(tx, mempool) {
        return reject("txn-mempool-conflict");
    }
    let view = resolve_inputs(tx, utxo_set, mempool, height);
    let spent_outputs = collect_spent_outputs(tx, &view)?;
    let (input_valid, fee) = check_tx_inputs(tx, &view)?;
    if let ValidationResult::Invalid(reason) = input_valid {
        return Err(ConsensusError::TransactionValidation(reason));
    }

    // 4. Fee limit
    if fee > policy.max_fee && !policy.allow_high_fees {
        return reject("absurdly-high-fee");
    }

    // 5. Name rules; a second pending registration of a name is refused
    for output in &tx.outputs {
        if let Some(NameOp::Register { name, .. }) = NameScript::parse(&output.script_pubkey).op {
            if mempool.has_pending_registration(&name) {
                debug!("name {} already has a pending registration", display_name(&name));
                return reject("txn-mempool-name-error");
            }
        }
    }
    let mutation = check_name_transaction(tx, &view, &PendingNames { names, mempool })?;

    // 6. Scripts
    let standard = gate.standard_flags(height);
    if let Err(relay_error) = verify_transaction_scripts(tx, &spent_outputs, standard, verifier) {
        let mandatory = gate.mandatory_flags(height);
        let err = match verify_transaction_scripts(tx, &spent_outputs, mandatory, verifier) {
            Ok(()) => ConsensusError::NonMandatoryFlag { reason: relay_error },
            Err(consensus_error) => ConsensusError::ScriptVerify { reason: consensus_error },
        };
        debug!("rejected {} from mempool: {}", hash_to_hex(&tx_id), err);
        return Err(err);
    }

    info!("accepted {} to mempool (fee {})", hash_to_hex(&tx_id), fee);
    Ok(MempoolEntry {
        tx: tx.clone(),
        txid: tx_id,
        fee,
        name_op: mutation.map(|m| m.op),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_script::build_name_script;
    use crate::script::{hash160, push_data, Interpreter, OP_0, OP_1};

    fn witness_keyhash_script(tag: u8) -> ByteString {
        let mut script = vec![OP_0];
        push_data(&mut script, &[tag; 20]);
        script
    }

    fn create_test_tx(prevout: OutPoint, script_pubkey: ByteString, value: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout,
                script_sig: vec![],
                sequence: 0xffffffff,
                witness: vec![],
            }],
            outputs: vec![TransactionOutput { value, script_pubkey }],
            lock_time: 0,
        }
    }

    /// Pay-to-script-hash of a bare OP_1: standard and spendable without keys
    fn op_true_p2sh() -> ByteString {
        Destination::ScriptHash(hash160(&[OP_1])).script_pubkey()
    }

    fn spend_op_true(prevout: OutPoint, script_pubkey: ByteString, value: Amount) -> Transaction {
        let mut tx = create_test_tx(prevout, script_pubkey, value);
        push_data(&mut tx.inputs[0].script_sig, &[OP_1]);
        tx
    }

    fn anyone_can_spend_utxos(outpoints: &[OutPoint]) -> UtxoSet {
        // A bare OP_1 is spendable with an empty scriptSig and a clean stack
        outpoints
            .iter()
            .map(|o| (*o, UTXO { value: COIN, script_pubkey: vec![0x51], height: 1 }))
            .collect()
    }

    fn accept(tx: &Transaction, utxos: &UtxoSet, names: &NameDb, mempool: &Mempool) -> Result<MempoolEntry> {
        accept_to_memory_pool(
            tx,
            utxos,
            names,
            mempool,
            1,
            &SegwitGate::new(432),
            &Interpreter,
            &MempoolPolicy::default(),
        )
    }

    #[test]
    fn test_accept_simple() {
        let outpoint = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[outpoint]);
        let tx = create_test_tx(outpoint, witness_keyhash_script(1), COIN - 1000);
        let entry = accept(&tx, &utxos, &NameDb::new(), &Mempool::new()).unwrap();
        assert_eq!(entry.fee, 1000);
        assert!(entry.name_op.is_none());
    }

    #[test]
    fn test_reject_coinbase() {
        let mut tx = create_test_tx(OutPoint::null(), witness_keyhash_script(1), 1000);
        tx.inputs[0].script_sig = vec![0x01, 0x01];
        let err = accept(&tx, &UtxoSet::new(), &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "coinbase"));
    }

    #[test]
    fn test_reject_missing_inputs() {
        let tx = create_test_tx(OutPoint::new([1; 32], 0), witness_keyhash_script(1), 1000);
        let err = accept(&tx, &UtxoSet::new(), &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::UtxoNotFound(_)));
    }

    #[test]
    fn test_reject_nonstandard_output() {
        let outpoint = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[outpoint]);
        let tx = create_test_tx(outpoint, vec![0x51], COIN - 1000);
        let err = accept(&tx, &utxos, &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "scriptpubkey"));
    }

    #[test]
    fn test_reject_absurd_fee_unless_allowed() {
        let outpoint = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[outpoint]);
        let tx = create_test_tx(outpoint, witness_keyhash_script(1), 1000);
        let err = accept(&tx, &utxos, &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "absurdly-high-fee"));

        let policy = MempoolPolicy { allow_high_fees: true, ..MempoolPolicy::default() };
        let accepted = accept_to_memory_pool(
            &tx,
            &utxos,
            &NameDb::new(),
            &Mempool::new(),
            1,
            &SegwitGate::new(432),
            &Interpreter,
            &policy,
        );
        assert!(accepted.is_ok());
    }

    #[test]
    fn test_reject_double_spend_against_pool() {
        let outpoint = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[outpoint]);
        let mut mempool = Mempool::new();
        let first = create_test_tx(outpoint, witness_keyhash_script(1), COIN - 1000);
        mempool.insert(accept(&first, &utxos, &NameDb::new(), &mempool).unwrap());

        let second = create_test_tx(outpoint, witness_keyhash_script(2), COIN - 1000);
        let err = accept(&second, &utxos, &NameDb::new(), &mempool).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "txn-mempool-conflict"));

        let err = accept(&first, &utxos, &NameDb::new(), &mempool).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "txn-already-in-mempool"));
    }

    #[test]
    fn test_pending_registration_conflict() {
        let outpoints = [OutPoint::new([1; 32], 0), OutPoint::new([2; 32], 0)];
        let utxos = anyone_can_spend_utxos(&outpoints);
        let op = NameOp::Register { name: b"d/test".to_vec(), value: b"{}".to_vec() };
        let script = build_name_script(&witness_keyhash_script(1), &op);

        let mut mempool = Mempool::new();
        let first = create_test_tx(outpoints[0], script.clone(), COIN - 1000);
        let entry = accept(&first, &utxos, &NameDb::new(), &mempool).unwrap();
        assert_eq!(entry.name_op, Some(op));
        mempool.insert(entry);
        assert!(mempool.has_pending_registration(b"d/test"));

        let second = create_test_tx(outpoints[1], script, COIN - 1000);
        let err = accept(&second, &utxos, &NameDb::new(), &mempool).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "txn-mempool-name-error"));
    }

    #[test]
    fn test_failed_script_is_consensus_error() {
        let outpoint = OutPoint::new([1; 32], 0);
        let mut utxos = UtxoSet::new();
        utxos.insert(outpoint, UTXO { value: COIN, script_pubkey: vec![0x51, 0x52, 0x88], height: 1 });
        let tx = create_test_tx(outpoint, witness_keyhash_script(1), COIN - 1000);
        let err = accept(&tx, &utxos, &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::ScriptVerify { .. }));
    }

    #[test]
    fn test_witness_spend_before_activation_is_policy_error() {
        let outpoint = OutPoint::new([1; 32], 0);
        let mut utxos = UtxoSet::new();
        utxos.insert(outpoint, UTXO { value: COIN, script_pubkey: witness_keyhash_script(9), height: 1 });
        let mut tx = create_test_tx(outpoint, witness_keyhash_script(1), COIN - 1000);
        tx.inputs[0].witness = vec![b"dummy".to_vec(), b"dummy".to_vec()];

        let err = accept(&tx, &utxos, &NameDb::new(), &Mempool::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "non-mandatory-script-verify-flag (Script failed an OP_EQUALVERIFY operation)"
        );
    }

    #[test]
    fn test_remove_for_block_evicts_mined_and_conflicts() {
        let outpoints = [OutPoint::new([1; 32], 0), OutPoint::new([2; 32], 0)];
        let utxos = anyone_can_spend_utxos(&outpoints);
        let mut mempool = Mempool::new();
        let mined = create_test_tx(outpoints[0], witness_keyhash_script(1), COIN - 1000);
        let conflicted = create_test_tx(outpoints[1], witness_keyhash_script(2), COIN - 1000);
        mempool.insert(accept(&mined, &utxos, &NameDb::new(), &mempool).unwrap());
        mempool.insert(accept(&conflicted, &utxos, &NameDb::new(), &mempool).unwrap());
        assert_eq!(mempool.len(), 2);

        let double_spend = create_test_tx(outpoints[1], witness_keyhash_script(3), COIN - 2000);
        let block = Block {
            header: BlockHeader {
                version: 4,
                prev_block_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 0,
                bits: POW_LIMIT_BITS,
                nonce: 0,
            },
            transactions: vec![mined, double_spend],
        };
        mempool.remove_for_block(&block);
        assert!(mempool.is_empty());
        assert!(!mempool.is_spent(&outpoints[0]));
        assert_eq!(mempool.entries().count(), 0);
    }

    #[test]
    fn test_accept_spend_of_pool_output() {
        let outpoint = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[outpoint]);
        let mut mempool = Mempool::new();
        let parent = create_test_tx(outpoint, op_true_p2sh(), COIN - 1000);
        let parent_entry = accept(&parent, &utxos, &NameDb::new(), &mempool).unwrap();
        let parent_id = parent_entry.txid;
        mempool.insert(parent_entry);

        let child = spend_op_true(OutPoint::new(parent_id, 0), witness_keyhash_script(1), COIN - 3000);
        let entry = accept(&child, &utxos, &NameDb::new(), &mempool).unwrap();
        assert_eq!(entry.fee, 2000);
        mempool.insert(entry);

        let order: Vec<Hash> = mempool.entries().map(|e| e.txid).collect();
        assert_eq!(order, vec![parent_id, txid(&child)]);
    }

    #[test]
    fn test_chained_updates_of_confirmed_name() {
        let name_outpoint = OutPoint::new([5; 32], 0);
        let register = NameOp::Register { name: b"d/chain".to_vec(), value: b"{}".to_vec() };
        let confirmed_script = build_name_script(&op_true_p2sh(), &register);
        let mut utxos = UtxoSet::new();
        utxos.insert(name_outpoint, UTXO { value: COIN, script_pubkey: confirmed_script.clone(), height: 1 });
        let mut names = NameDb::new();
        names.register(b"d/chain", b"{}", &confirmed_script, name_outpoint, 1).unwrap();

        let update = |value: &[u8]| NameOp::Update { name: b"d/chain".to_vec(), value: value.to_vec() };
        let mut mempool = Mempool::new();
        let first = spend_op_true(
            name_outpoint,
            build_name_script(&op_true_p2sh(), &update(br#"{"n":1}"#)),
            COIN - 1000,
        );
        mempool.insert(accept(&first, &utxos, &names, &mempool).unwrap());

        let second = spend_op_true(
            OutPoint::new(txid(&first), 0),
            build_name_script(&op_true_p2sh(), &update(br#"{"n":2}"#)),
            COIN - 2000,
        );
        let entry = accept(&second, &utxos, &names, &mempool).unwrap();
        assert_eq!(entry.name_op, Some(update(br#"{"n":2}"#)));
        mempool.insert(entry);
        assert!(mempool.has_pending_update(b"d/chain"));
        assert_eq!(mempool.pending_updates[b"d/chain".as_slice()].len(), 2);

        // Spending the confirmed name output again conflicts with the chain
        let competing = spend_op_true(
            name_outpoint,
            build_name_script(&op_true_p2sh(), &update(br#"{"n":3}"#)),
            COIN - 1000,
        );
        let err = accept(&competing, &utxos, &names, &mempool).unwrap_err();
        assert!(matches!(err, ConsensusError::MempoolRejected(ref r) if r == "txn-mempool-conflict"));

        mempool.remove(&txid(&second));
        mempool.remove(&txid(&first));
        assert!(!mempool.has_pending_update(b"d/chain"));
    }

    #[test]
    fn test_update_on_pending_registration() {
        let funding = OutPoint::new([1; 32], 0);
        let utxos = anyone_can_spend_utxos(&[funding]);
        let register = NameOp::Register { name: b"d/fresh".to_vec(), value: b"{}".to_vec() };
        let mut mempool = Mempool::new();
        let registration = create_test_tx(funding, build_name_script(&op_true_p2sh(), &register), COIN - 1000);
        mempool.insert(accept(&registration, &utxos, &NameDb::new(), &mempool).unwrap());

        let update = NameOp::Update { name: b"d/fresh".to_vec(), value: br#"{"a":1}"#.to_vec() };
        let tx = spend_op_true(
            OutPoint::new(txid(&registration), 0),
            build_name_script(&op_true_p2sh(), &update),
            COIN - 2000,
        );
        let entry = accept(&tx, &utxos, &NameDb::new(), &mempool).unwrap();
        assert_eq!(entry.name_op, Some(update));

        // Without the pool the name output does not exist
        let err = accept(&tx, &UtxoSet::new(), &NameDb::new(), &Mempool::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::UtxoNotFound(_)));
    }

    #[test]
    fn test_remove_for_block_evicts_descendants_of_conflicts() {
        let outpoints = [OutPoint::new([1; 32], 0), OutPoint::new([2; 32], 0)];
        let utxos = anyone_can_spend_utxos(&outpoints);
        let mut mempool = Mempool::new();

        let doomed = create_test_tx(outpoints[0], op_true_p2sh(), COIN - 1000);
        mempool.insert(accept(&doomed, &utxos, &NameDb::new(), &mempool).unwrap());
        let doomed_child = spend_op_true(OutPoint::new(txid(&doomed), 0), witness_keyhash_script(1), COIN - 2000);
        mempool.insert(accept(&doomed_child, &utxos, &NameDb::new(), &mempool).unwrap());

        let parent = create_test_tx(outpoints[1], op_true_p2sh(), COIN - 1000);
        mempool.insert(accept(&parent, &utxos, &NameDb::new(), &mempool).unwrap());
        let child = spend_op_true(OutPoint::new(txid(&parent), 0), witness_keyhash_script(2), COIN - 2000);
        mempool.insert(accept(&child, &utxos, &NameDb::new(), &mempool).unwrap());
        assert_eq!(mempool.len(), 4);

        let double_spend = create_test_tx(outpoints[0], witness_keyhash_script(3), COIN - 500);
        let block = Block {
            header: BlockHeader {
                version: 4,
                prev_block_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 0,
                bits: POW_LIMIT_BITS,
                nonce: 0,
            },
            transactions: vec![double_spend, parent.clone()],
        };
        mempool.remove_for_block(&block);

        let remaining: Vec<Hash> = mempool.entries().map(|e| e.txid).collect();
        assert_eq!(remaining, vec![txid(&child)]);
        assert!(mempool.is_spent(&OutPoint::new(txid(&parent), 0)));
        assert!(!mempool.is_spent(&outpoints[0]));
    }
}
