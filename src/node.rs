//! Node facade
//!
//! Ties the chain state, mempool, wallet and block assembler together and
//! exposes the operations a user or test harness drives: name registration
//! and updates, raw transaction building, direct block submission and
//! mining. Every state change goes through the same acceptance pipeline
//! that external submissions use.

use crate::address::{AddressType, Destination};
use crate::config::NodeConfig;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::mempool::{accept_to_memory_pool, Mempool};
use crate::mining::{create_coinbase, BlockAssembler};
use crate::name_script::{build_name_script, NameOp, NameScript};
use crate::names::{check_name, check_value, display_name};
use crate::script::Interpreter;
use crate::serialization::{
    block_hash, deserialize_block, deserialize_transaction, hash_to_hex, serialize_transaction,
    txid,
};
use crate::types::*;
use crate::validation::{ChainSnapshot, ChainState};
use crate::wallet::Wallet;
use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Fee paid by wallet-built name transactions
pub const WALLET_TX_FEE: Amount = COIN / 1000;

/// Current state of a name as shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameInfo {
    pub name: String,
    pub value: String,
    pub address: Option<Destination>,
    pub height: Natural,
    pub txid: Hash,
    pub vout: Natural,
}

impl NameInfo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// Name operation waiting in the mempool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingName {
    pub name: String,
    pub value: String,
    pub address: Option<Destination>,
    pub txid: Hash,
    pub vout: Natural,
    pub register: bool,
}

/// Result of signing a raw transaction with the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    /// Whether every input now carries a signature
    pub complete: bool,
}

/// Persisted node state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub chain: ChainSnapshot,
    pub wallet_keys: usize,
}

#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    chain: ChainState,
    mempool: Mempool,
    wallet: Wallet,
    assembler: BlockAssembler,
    verifier: Interpreter,
    /// Coinbase outputs pay here
    mining_destination: Destination,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let chain = ChainState::new(config.gate());
        Ok(Self::with_chain(config, chain))
    }

    fn with_chain(config: NodeConfig, chain: ChainState) -> Self {
        let mut wallet = Wallet::new(config.wallet_seed.as_bytes());
        let mining_destination = wallet.get_new_address(AddressType::Legacy);
        Self {
            assembler: BlockAssembler::new(chain.tip().bits),
            config,
            chain,
            mempool: Mempool::new(),
            wallet,
            verifier: Interpreter,
            mining_destination,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn get_new_address(&mut self, kind: AddressType) -> Destination {
        self.wallet.get_new_address(kind)
    }

    pub fn block_count(&self) -> Natural {
        self.chain.height()
    }

    pub fn best_block_hash(&self) -> Hash {
        self.chain.tip_hash()
    }

    pub fn median_time_past(&self) -> Natural {
        self.chain.median_time_past()
    }

    /// Timestamp for the next mined block
    pub fn next_block_template_time(&self) -> Natural {
        self.chain.median_time_past().max(self.chain.tip().timestamp) + 1
    }

    /// Wallet-owned, confirmed, non-name output worth at least `min_amount`
    /// that no pool transaction spends; oldest first
    pub fn find_spendable(&self, min_amount: Amount) -> Option<(OutPoint, UTXO)> {
        self.chain
            .utxo_set()
            .iter()
            .filter(|(outpoint, utxo)| {
                utxo.value >= min_amount
                    && !self.mempool.is_spent(outpoint)
                    && !NameScript::parse(&utxo.script_pubkey).is_name_op()
                    && self.wallet.is_mine(&utxo.script_pubkey)
            })
            .min_by_key(|(outpoint, utxo)| (utxo.height, outpoint.hash, outpoint.index))
            .map(|(outpoint, utxo)| (*outpoint, utxo.clone()))
    }

    /// Register `name` with `value`, paying the name output to `destination`
    /// (a fresh wallet address when `None`). Returns the txid.
    pub fn register_name(
        &mut self,
        name: &[u8],
        value: &[u8],
        destination: Option<Destination>,
    ) -> Result<Hash> {
        check_name(name)?;
        check_value(value)?;
        if self.chain.names().lookup(name).is_some() {
            return Err(ConsensusError::DuplicateName { name: display_name(name) });
        }

        let op = NameOp::Register { name: name.to_vec(), value: value.to_vec() };
        self.send_name_operation(op, None, destination)
    }

    /// Update `name` to `value`, moving it to `destination` (a fresh wallet
    /// address when `None`). The current name output must be the wallet's.
    pub fn update_name(
        &mut self,
        name: &[u8],
        value: &[u8],
        destination: Option<Destination>,
    ) -> Result<Hash> {
        check_value(value)?;
        if self.mempool.has_pending_registration(name) || self.mempool.has_pending_update(name) {
            return Err(ConsensusError::Wallet(format!(
                "there is already a pending operation on {}",
                display_name(name)
            )));
        }
        let entry = self
            .chain
            .names()
            .lookup(name)
            .ok_or_else(|| ConsensusError::UnknownName { name: display_name(name) })?;
        if !self.wallet.is_mine(&entry.locking_script) {
            return Err(ConsensusError::Wallet(format!(
                "name {} is not controlled by this wallet",
                display_name(name)
            )));
        }
        let name_input = entry.outpoint;
        let locked = self
            .chain
            .utxo_set()
            .get(&name_input)
            .map(|utxo| utxo.value)
            .ok_or_else(|| ConsensusError::UtxoNotFound(display_name(name)))?;

        let op = NameOp::Update { name: name.to_vec(), value: value.to_vec() };
        self.send_name_operation(op, Some((name_input, locked)), destination)
    }

    fn send_name_operation(
        &mut self,
        op: NameOp,
        name_input: Option<(OutPoint, Amount)>,
        destination: Option<Destination>,
    ) -> Result<Hash> {
        // An update carries the locked amount over from the name input
        let (name_value, needed) = match name_input {
            Some((_, locked)) => (locked, WALLET_TX_FEE),
            None => (NAME_LOCKED_AMOUNT, NAME_LOCKED_AMOUNT + WALLET_TX_FEE),
        };
        let (funding, funding_utxo) = self
            .find_spendable(needed)
            .ok_or_else(|| ConsensusError::Wallet("insufficient funds".to_string()))?;

        let destination =
            destination.unwrap_or_else(|| self.wallet.get_new_address(AddressType::Legacy));
        let mut outputs = vec![TransactionOutput {
            value: name_value,
            script_pubkey: build_name_script(&destination.script_pubkey(), &op),
        }];
        let change = funding_utxo.value - needed;
        if change > 0 {
            let change_address = self.wallet.get_new_address(AddressType::Legacy);
            outputs.push(TransactionOutput { value: change, script_pubkey: change_address.script_pubkey() });
        }

        let inputs = name_input
            .map(|(outpoint, _)| outpoint)
            .into_iter()
            .chain(std::iter::once(funding))
            .map(|prevout| TransactionInput {
                prevout,
                script_sig: vec![],
                sequence: SEQUENCE_FINAL as Natural,
                witness: vec![],
            })
            .collect();
        let mut tx = Transaction { version: 1, inputs, outputs, lock_time: 0 };

        let spent = self.spent_outputs(&tx);
        if !self.wallet.sign_transaction(&mut tx, &spent)? {
            return Err(ConsensusError::Wallet("could not sign every input".to_string()));
        }

        debug!("sending {} for {}", if op.is_register() { "registration" } else { "update" }, display_name(op.name()));
        self.accept_transaction(&tx, false)
    }

    /// ShowName: the confirmed state of `name`
    pub fn show_name(&self, name: &[u8]) -> Result<NameInfo> {
        let entry = self
            .chain
            .names()
            .lookup(name)
            .ok_or_else(|| ConsensusError::NameNotFound(display_name(name)))?;
        Ok(NameInfo {
            name: display_name(&entry.name),
            value: display_name(&entry.value),
            address: Destination::from_script(&entry.locking_script),
            height: entry.last_update_height,
            txid: entry.outpoint.hash,
            vout: entry.outpoint.index,
        })
    }

    /// NameList: every confirmed name, ordered by name
    pub fn name_list(&self) -> Vec<NameInfo> {
        self.chain
            .names()
            .iter()
            .filter_map(|entry| self.show_name(&entry.name).ok())
            .collect()
    }

    /// NamePending: name operations in the mempool, in admission order,
    /// optionally only those on `name`
    pub fn name_pending(&self, name: Option<&[u8]>) -> Vec<PendingName> {
        self.mempool
            .entries()
            .filter_map(|entry| {
                let op = entry.name_op.as_ref()?;
                if name.map_or(false, |name| name != op.name()) {
                    return None;
                }
                let outpoint = entry.name_outpoint()?;
                let script = &entry.tx.outputs[outpoint.index as usize].script_pubkey;
                Some(PendingName {
                    name: display_name(op.name()),
                    value: display_name(op.value()),
                    address: Destination::from_script(script),
                    txid: outpoint.hash,
                    vout: outpoint.index,
                    register: op.is_register(),
                })
            })
            .collect()
    }

    /// Unsigned transaction spending `inputs` and paying `outputs`
    pub fn build_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[(Destination, Amount)],
    ) -> Result<Vec<u8>> {
        if let Some((_, amount)) = outputs.iter().find(|(_, amount)| !(0..=MAX_MONEY).contains(amount)) {
            return Err(ConsensusError::Wallet(format!("invalid amount {}", amount)));
        }

        let tx = Transaction {
            version: 1,
            inputs: inputs
                .iter()
                .map(|prevout| TransactionInput {
                    prevout: *prevout,
                    script_sig: vec![],
                    sequence: SEQUENCE_FINAL as Natural,
                    witness: vec![],
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|(destination, value)| TransactionOutput {
                    value: *value,
                    script_pubkey: destination.script_pubkey(),
                })
                .collect(),
            lock_time: 0,
        };
        Ok(serialize_transaction(&tx, true))
    }

    /// Prefix output `output_index` of `raw` with the name operation `op`;
    /// the output amount is left as is
    pub fn attach_name_operation(&self, raw: &[u8], output_index: usize, op: &NameOp) -> Result<Vec<u8>> {
        let mut tx = deserialize_transaction(raw)?;
        let output = tx.outputs.get_mut(output_index).ok_or_else(|| {
            ConsensusError::Wallet(format!("output index {} is out of range", output_index))
        })?;
        output.script_pubkey = build_name_script(&output.script_pubkey, op);
        Ok(serialize_transaction(&tx, true))
    }

    /// Sign every input of `raw` the wallet can
    pub fn sign_transaction(&self, raw: &[u8]) -> Result<SignedTransaction> {
        let mut tx = deserialize_transaction(raw)?;
        let spent = self.spent_outputs(&tx);
        let complete = self.wallet.sign_transaction(&mut tx, &spent)?;
        Ok(SignedTransaction { raw: serialize_transaction(&tx, true), complete })
    }

    /// Outputs spent by `tx`, confirmed or created by pool transactions
    fn spent_outputs(&self, tx: &Transaction) -> Vec<Option<UTXO>> {
        let height = self.chain.height() + 1;
        tx.inputs
            .iter()
            .map(|input| {
                self.chain
                    .utxo_set()
                    .get(&input.prevout)
                    .cloned()
                    .or_else(|| self.mempool.output(&input.prevout, height))
            })
            .collect()
    }

    /// SubmitTransaction: mempool admission of a raw transaction
    pub fn submit_transaction(&mut self, raw: &[u8], allow_high_fees: bool) -> Result<Hash> {
        let tx = deserialize_transaction(raw)?;
        self.accept_transaction(&tx, allow_high_fees)
    }

    fn accept_transaction(&mut self, tx: &Transaction, allow_high_fees: bool) -> Result<Hash> {
        let entry = accept_to_memory_pool(
            tx,
            self.chain.utxo_set(),
            self.chain.names(),
            &self.mempool,
            self.chain.height() + 1,
            self.chain.gate(),
            &self.verifier,
            &self.config.policy(allow_high_fees),
        )?;
        let txid = entry.txid;
        self.mempool.insert(entry);
        Ok(txid)
    }

    /// SubmitBlock: connect a raw block directly, bypassing the mempool
    ///
    /// Returns `None` when the block was connected, otherwise the reject
    /// reason.
    pub fn submit_block(&mut self, raw: &[u8]) -> Option<String> {
        let block = match deserialize_block(raw) {
            Ok(block) => block,
            Err(err) => return Some(format!("decode-failed: {}", err)),
        };
        let hash = block_hash(&block.header);
        let known = (0..=self.chain.height())
            .filter_map(|height| self.chain.header_at(height))
            .any(|header| block_hash(header) == hash);
        if known {
            return Some("duplicate".to_string());
        }

        match self.connect(&block) {
            Ok(()) => None,
            Err(err) => Some(err.reject_reason()),
        }
    }

    /// InvalidateTip: disconnect the tip block and return its transactions
    /// to the mempool
    ///
    /// The disconnected transactions are re-admitted ahead of the current
    /// pool contents; whatever no longer passes admission is dropped.
    /// Returns the hash of the disconnected block.
    pub fn invalidate_tip(&mut self) -> Result<Hash> {
        let block = self.chain.disconnect_tip()?;
        let hash = block_hash(&block.header);

        let pool = std::mem::take(&mut self.mempool);
        let readmit = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .chain(pool.entries().map(|entry| &entry.tx));
        let mut dropped = 0;
        for tx in readmit {
            if let Err(err) = self.accept_transaction(tx, true) {
                debug!("dropped {} after disconnect: {}", hash_to_hex(&txid(tx)), err);
                dropped += 1;
            }
        }

        info!(
            "invalidated block {}, tip now at height {} ({} transactions dropped)",
            hash_to_hex(&hash),
            self.chain.height(),
            dropped
        );
        Ok(hash)
    }

    fn connect(&mut self, block: &Block) -> Result<()> {
        self.chain.connect_block(block, &self.verifier)?;
        self.mempool.remove_for_block(block);
        Ok(())
    }

    /// MineBlocks: assemble, solve and connect `count` blocks
    ///
    /// Pool transactions are included in admission order. Before segwit
    /// activation transactions with witness data, and pool transactions
    /// spending them, stay in the pool.
    pub fn mine_blocks(&mut self, count: usize) -> Result<Vec<Hash>> {
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let height = self.chain.height() + 1;
            let witness_allowed = self.chain.gate().is_active(height);

            let mut fees: Amount = 0;
            let mut deferred: HashSet<Hash> = HashSet::new();
            let mut transactions: Vec<Transaction> = Vec::new();
            for entry in self.mempool.entries() {
                let waits_on_parent =
                    entry.tx.inputs.iter().any(|input| deferred.contains(&input.prevout.hash));
                if waits_on_parent || (!witness_allowed && entry.tx.has_witness()) {
                    deferred.insert(entry.txid);
                    continue;
                }
                fees += entry.fee;
                transactions.push(entry.tx.clone());
            }

            let coinbase = create_coinbase(
                height,
                BLOCK_SUBSIDY + fees,
                self.mining_destination.script_pubkey(),
            );
            let block = self.assembler.assemble(
                self.chain.tip_hash(),
                coinbase,
                self.next_block_template_time(),
                transactions,
            )?;
            let block = BlockAssembler::solve_in_background(block).join().map_err(|_| {
                ConsensusError::InvalidProofOfWork("miner thread panicked".to_string())
            })??;

            self.connect(&block)?;
            let hash = block_hash(&block.header);
            info!("mined block {} at height {}", hash_to_hex(&hash), height);
            hashes.push(hash);
        }
        Ok(hashes)
    }

    /// CheckNameDb: consistency of the name database with the UTXO set
    pub fn check_name_db(&self) -> bool {
        self.chain.check_name_db().is_ok()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot { chain: self.chain.snapshot(), wallet_keys: self.wallet.key_count() }
    }

    /// Write chain and wallet state as JSON; the mempool is not saved
    pub fn save_state(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(&self.snapshot())?;
        std::fs::write(path, json).with_context(|| format!("writing state to {}", path.display()))?;
        info!("saved state at height {} to {}", self.chain.height(), path.display());
        Ok(())
    }

    /// Restore a node saved with [`Node::save_state`] under `config`'s seed
    pub fn load_state(config: NodeConfig, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading state from {}", path.display()))?;
        let snapshot: NodeSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("parsing state from {}", path.display()))?;
        Ok(Self::from_snapshot(config, snapshot)?)
    }

    pub fn from_snapshot(config: NodeConfig, snapshot: NodeSnapshot) -> Result<Self> {
        config.validate()?;
        if snapshot.chain.deployment_height != config.segwit_activation_height {
            return Err(ConsensusError::Config(format!(
                "state was saved with activation height {}, configured {}",
                snapshot.chain.deployment_height, config.segwit_activation_height
            )));
        }
        let chain = ChainState::from_snapshot(snapshot.chain)?;
        let mut node = Self::with_chain(config, chain);
        node.wallet.ensure_keys(snapshot.wallet_keys);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_node(activation: Natural) -> Node {
        let config = NodeConfig { segwit_activation_height: activation, ..NodeConfig::default() };
        Node::new(config).unwrap()
    }

    #[test]
    fn test_mining_pays_wallet() {
        let mut node = create_test_node(432);
        let hashes = node.mine_blocks(3).unwrap();
        assert_eq!(hashes.len(), 3);
        assert_eq!(node.block_count(), 3);
        assert_eq!(node.best_block_hash(), hashes[2]);

        let (_, utxo) = node.find_spendable(BLOCK_SUBSIDY).unwrap();
        assert_eq!(utxo.value, BLOCK_SUBSIDY);
        assert_eq!(utxo.height, 1);
        assert!(node.find_spendable(BLOCK_SUBSIDY + 1).is_none());
    }

    #[test]
    fn test_register_and_show() {
        let mut node = create_test_node(432);
        node.mine_blocks(1).unwrap();
        let destination = node.get_new_address(AddressType::Bech32);

        let txid = node.register_name(b"d/test", b"{}", Some(destination)).unwrap();
        assert!(node.mempool().contains(&txid));
        assert!(matches!(node.show_name(b"d/test"), Err(ConsensusError::NameNotFound(_))));

        node.mine_blocks(1).unwrap();
        assert!(node.mempool().is_empty());
        let info = node.show_name(b"d/test").unwrap();
        assert_eq!(info.value, "{}");
        assert_eq!(info.address, Some(destination));
        assert_eq!(info.height, 2);
        assert_eq!(info.txid, txid);
        assert!(node.check_name_db());
    }

    #[test]
    fn test_register_without_funds() {
        let mut node = create_test_node(432);
        assert!(matches!(
            node.register_name(b"d/test", b"{}", None),
            Err(ConsensusError::Wallet(_))
        ));
    }

    #[test]
    fn test_register_invalid_name() {
        let mut node = create_test_node(432);
        node.mine_blocks(1).unwrap();
        assert!(matches!(
            node.register_name(b"no-namespace", b"{}", None),
            Err(ConsensusError::InvalidName(_))
        ));
        assert!(matches!(
            node.register_name(b"d/test", b"not json", None),
            Err(ConsensusError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_update_unknown_name() {
        let mut node = create_test_node(432);
        node.mine_blocks(1).unwrap();
        assert!(matches!(
            node.update_name(b"d/missing", b"{}", None),
            Err(ConsensusError::UnknownName { .. })
        ));
    }

    #[test]
    fn test_pending_spend_excluded_from_spendable() {
        let mut node = create_test_node(432);
        node.mine_blocks(1).unwrap();
        let (funding, _) = node.find_spendable(COIN).unwrap();
        node.register_name(b"d/test", b"{}", None).unwrap();
        assert!(node.mempool().is_spent(&funding));
        assert!(node.find_spendable(COIN).is_none());
    }

    #[test]
    fn test_attach_name_operation_bounds() {
        let mut node = create_test_node(432);
        let destination = node.get_new_address(AddressType::Legacy);
        let raw = node
            .build_raw_transaction(&[OutPoint::new([1; 32], 0)], &[(destination, COIN)])
            .unwrap();
        let op = NameOp::Update { name: b"d/a".to_vec(), value: b"{}".to_vec() };

        let named = node.attach_name_operation(&raw, 0, &op).unwrap();
        let tx = deserialize_transaction(&named).unwrap();
        assert_eq!(NameScript::parse(&tx.outputs[0].script_pubkey).op, Some(op.clone()));
        assert_eq!(tx.outputs[0].value, COIN);
        assert_eq!(Destination::from_script(&tx.outputs[0].script_pubkey), Some(destination));

        assert!(node.attach_name_operation(&raw, 1, &op).is_err());
    }

    #[test]
    fn test_build_raw_transaction_rejects_bad_amount() {
        let mut node = create_test_node(432);
        let destination = node.get_new_address(AddressType::Legacy);
        assert!(node.build_raw_transaction(&[], &[(destination, -1)]).is_err());
    }

    #[test]
    fn test_submit_block_garbage_and_duplicate() {
        let mut node = create_test_node(432);
        assert!(node.submit_block(&[0u8; 10]).is_some());

        node.mine_blocks(1).unwrap();
        let tip = node.chain().tip().clone();
        let block = Block {
            header: tip,
            transactions: vec![create_coinbase(1, BLOCK_SUBSIDY, vec![0x51])],
        };
        let raw = crate::serialization::serialize_block(&block, true);
        assert_eq!(node.submit_block(&raw), Some("duplicate".to_string()));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut node = create_test_node(432);
        node.mine_blocks(2).unwrap();
        let destination = node.get_new_address(AddressType::P2shSegwit);
        node.register_name(b"d/saved", b"{}", Some(destination)).unwrap();
        node.mine_blocks(1).unwrap();

        let path = std::env::temp_dir().join(format!("namechain-state-{}.json", std::process::id()));
        node.save_state(&path).unwrap();
        let restored = Node::load_state(node.config().clone(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(restored.chain(), node.chain());
        assert_eq!(restored.show_name(b"d/saved").unwrap().address, Some(destination));
        assert!(restored.wallet.is_mine(&destination.script_pubkey()));
    }

    #[test]
    fn test_snapshot_activation_mismatch() {
        let node = create_test_node(432);
        let config = NodeConfig { segwit_activation_height: 10, ..NodeConfig::default() };
        assert!(matches!(
            Node::from_snapshot(config, node.snapshot()),
            Err(ConsensusError::Config(_))
        ));
    }
}
