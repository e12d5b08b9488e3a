//! Name state machine
//!
//! Every live name is bound to exactly one unspent output. The database is
//! only mutated while connecting or disconnecting blocks; each mutation
//! yields a [`NameUndo`] record that reverts it.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::name_script::{NameOp, NameScript};
use crate::types::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current state of a registered name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: ByteString,
    pub value: ByteString,
    pub locking_script: ByteString,
    pub last_update_height: Natural,
    pub outpoint: OutPoint,
}

/// Reverts one name mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameUndo {
    /// The name did not exist before
    Registered { name: ByteString },
    /// The name held this state before
    Updated { previous: NameEntry },
}

/// Name effect of a validated transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMutation {
    pub op: NameOp,
    /// Index of the name output
    pub output: usize,
    /// Name output being spent, for updates
    pub spent: Option<OutPoint>,
}

/// Printable form of a name for errors and logs
pub fn display_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Where each live name is currently bound
///
/// Blocks see only confirmed names; the mempool layers pending operations
/// on top.
pub trait NameView {
    /// Output the name is bound to, `None` if it is not live
    fn binding(&self, name: &[u8]) -> Option<OutPoint>;
}

/// Name → NameEntry, at most one entry per name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameDb {
    entries: BTreeMap<ByteString, NameEntry>,
}

impl NameDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register: creates the entry bound to `outpoint`
    ///
    /// Fails with `DuplicateName` if the name is live.
    pub fn register(
        &mut self,
        name: &[u8],
        value: &[u8],
        locking_script: &[u8],
        outpoint: OutPoint,
        height: Natural,
    ) -> Result<NameEntry> {
        if self.entries.contains_key(name) {
            return Err(ConsensusError::DuplicateName { name: display_name(name) });
        }

        let entry = NameEntry {
            name: name.to_vec(),
            value: value.to_vec(),
            locking_script: locking_script.to_vec(),
            last_update_height: height,
            outpoint,
        };
        self.entries.insert(name.to_vec(), entry.clone());
        info!("registered name {} at height {}", display_name(name), height);
        Ok(entry)
    }

    /// Update: rebinds the entry from `spent` to `new_outpoint`
    ///
    /// Fails with `UnknownName` if the name is not live and with
    /// `WrongPrevout` if `spent` is not the output the entry is bound to.
    pub fn update(
        &mut self,
        name: &[u8],
        value: &[u8],
        locking_script: &[u8],
        spent: &OutPoint,
        new_outpoint: OutPoint,
        height: Natural,
    ) -> Result<NameEntry> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ConsensusError::UnknownName { name: display_name(name) })?;
        if entry.outpoint != *spent {
            return Err(ConsensusError::WrongPrevout { name: display_name(name) });
        }

        entry.value = value.to_vec();
        entry.locking_script = locking_script.to_vec();
        entry.last_update_height = height;
        entry.outpoint = new_outpoint;
        debug!("updated name {} at height {}", display_name(name), height);
        Ok(entry.clone())
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&NameEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NameEntry> {
        self.entries.values()
    }

    /// Insert an entry as-is, replacing any previous state (snapshot loading)
    pub fn insert(&mut self, entry: NameEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Apply the name effect of transaction `txid` and return its undo record
    pub fn apply(
        &mut self,
        mutation: &NameMutation,
        txid: Hash,
        locking_script: &[u8],
        height: Natural,
    ) -> Result<NameUndo> {
        let outpoint = OutPoint::new(txid, mutation.output as Natural);
        match (&mutation.op, &mutation.spent) {
            (NameOp::Register { name, value }, _) => {
                self.register(name, value, locking_script, outpoint, height)?;
                Ok(NameUndo::Registered { name: name.clone() })
            }
            (NameOp::Update { name, value }, Some(spent)) => {
                let previous = self
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| ConsensusError::UnknownName { name: display_name(name) })?;
                self.update(name, value, locking_script, spent, outpoint, height)?;
                Ok(NameUndo::Updated { previous })
            }
            (NameOp::Update { name, .. }, None) => Err(ConsensusError::NameTransaction(format!(
                "update of {} without a name input",
                display_name(name)
            ))),
        }
    }

    /// Revert a mutation previously returned by [`NameDb::apply`]
    pub fn undo(&mut self, undo: NameUndo) {
        match undo {
            NameUndo::Registered { name } => {
                debug!("unregistering name {}", display_name(&name));
                self.entries.remove(&name);
            }
            NameUndo::Updated { previous } => {
                debug!("restoring name {}", display_name(&previous.name));
                self.insert(previous);
            }
        }
    }
}

impl NameView for NameDb {
    fn binding(&self, name: &[u8]) -> Option<OutPoint> {
        self.lookup(name).map(|entry| entry.outpoint)
    }
}

/// IsNameValid: ℬ → {valid, invalid}
///
/// 1. 0 < |name| ≤ MAX_NAME_LENGTH
/// 2. name is UTF-8 without control characters
/// 3. name = ns "/" rest where ns is a non-empty run of [a-z]
pub fn check_name(name: &[u8]) -> Result<()> {
    let invalid = |reason: &str| {
        Err(ConsensusError::InvalidName(format!("{}: {}", display_name(name), reason)))
    };

    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return invalid("bad length");
    }
    let text = match std::str::from_utf8(name) {
        Ok(text) => text,
        Err(_) => return invalid("not valid UTF-8"),
    };
    if text.chars().any(char::is_control) {
        return invalid("contains control characters");
    }
    match text.split_once('/') {
        Some((namespace, _))
            if !namespace.is_empty() && namespace.bytes().all(|b| b.is_ascii_lowercase()) => {}
        _ => return invalid("missing namespace"),
    }
    Ok(())
}

/// IsValueValid: values are JSON objects of at most MAX_VALUE_LENGTH bytes
pub fn check_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(ConsensusError::InvalidValue(format!("value too long: {} bytes", value.len())));
    }
    match serde_json::from_slice::<serde_json::Value>(value) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(_) => Err(ConsensusError::InvalidValue("value is not a JSON object".to_string())),
        Err(e) => Err(ConsensusError::InvalidValue(format!("value is not valid JSON: {}", e))),
    }
}

/// CheckNameTransaction: 𝒯𝒳 × 𝒰𝒮 × NameDb → {valid, invalid} × NameMutation?
///
/// 1. At most one name input and at most one name output
/// 2. A name input requires a name output
/// 3. The name output locks at least NAME_LOCKED_AMOUNT
/// 4. Name and value are well-formed
/// 5. Register: no name input, name not live
/// 6. Update: spends the output the live entry is bound to, same name
pub fn check_name_transaction(
    tx: &Transaction,
    utxo_set: &UtxoSet,
    names: &dyn NameView,
) -> Result<Option<NameMutation>> {
    if tx.is_coinbase() {
        return Ok(None);
    }

    let mut name_input: Option<(OutPoint, NameOp)> = None;
    for input in &tx.inputs {
        let utxo = utxo_set.get(&input.prevout).ok_or_else(|| {
            ConsensusError::UtxoNotFound(format!("{:?}", input.prevout))
        })?;
        if let Some(op) = NameScript::parse(&utxo.script_pubkey).op {
            if name_input.is_some() {
                return Err(ConsensusError::NameTransaction("multiple name inputs".to_string()));
            }
            name_input = Some((input.prevout, op));
        }
    }

    let mut name_output: Option<(usize, NameOp)> = None;
    for (i, output) in tx.outputs.iter().enumerate() {
        if let Some(op) = NameScript::parse(&output.script_pubkey).op {
            if name_output.is_some() {
                return Err(ConsensusError::NameTransaction("multiple name outputs".to_string()));
            }
            if output.value < NAME_LOCKED_AMOUNT {
                return Err(ConsensusError::NameTransaction("greedy name".to_string()));
            }
            name_output = Some((i, op));
        }
    }

    let (output, op) = match name_output {
        Some(found) => found,
        None if name_input.is_some() => {
            return Err(ConsensusError::NameTransaction(
                "name input without name output".to_string(),
            ))
        }
        None => return Ok(None),
    };

    check_name(op.name())?;
    check_value(op.value())?;

    let spent = match &op {
        NameOp::Register { name, .. } => {
            if name_input.is_some() {
                return Err(ConsensusError::NameTransaction(
                    "registration spends a name input".to_string(),
                ));
            }
            if names.binding(name).is_some() {
                return Err(ConsensusError::DuplicateName { name: display_name(name) });
            }
            None
        }
        NameOp::Update { name, .. } => {
            let (prevout, input_op) = name_input.ok_or_else(|| {
                ConsensusError::NameTransaction("update without name input".to_string())
            })?;
            if input_op.name() != name.as_slice() {
                return Err(ConsensusError::NameTransaction(
                    "update changes the name".to_string(),
                ));
            }
            let bound = names
                .binding(name)
                .ok_or_else(|| ConsensusError::UnknownName { name: display_name(name) })?;
            if bound != prevout {
                return Err(ConsensusError::WrongPrevout { name: display_name(name) });
            }
            Some(prevout)
        }
    };

    Ok(Some(NameMutation { op, output, spent }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_script::build_name_script;
    use crate::script::p2pkh_script;

    fn create_test_outpoint(tag: u8) -> OutPoint {
        OutPoint::new([tag; 32], 0)
    }

    fn name_output(op: &NameOp, value: Amount) -> TransactionOutput {
        TransactionOutput {
            value,
            script_pubkey: build_name_script(&p2pkh_script(&[7; 20]), op),
        }
    }

    fn create_test_tx(prevouts: &[OutPoint], outputs: Vec<TransactionOutput>) -> Transaction {
        Transaction {
            version: 1,
            inputs: prevouts
                .iter()
                .map(|prevout| TransactionInput {
                    prevout: *prevout,
                    script_sig: vec![],
                    sequence: 0xffffffff,
                    witness: vec![],
                })
                .collect(),
            outputs,
            lock_time: 0,
        }
    }

    fn register_op(name: &str) -> NameOp {
        NameOp::Register { name: name.as_bytes().to_vec(), value: b"{}".to_vec() }
    }

    fn update_op(name: &str, value: &str) -> NameOp {
        NameOp::Update { name: name.as_bytes().to_vec(), value: value.as_bytes().to_vec() }
    }

    fn funding_utxos(outpoints: &[OutPoint]) -> UtxoSet {
        outpoints
            .iter()
            .map(|o| (*o, UTXO { value: COIN, script_pubkey: p2pkh_script(&[7; 20]), height: 1 }))
            .collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut db = NameDb::new();
        let entry = db.register(b"d/test", b"{}", &[0x51], create_test_outpoint(1), 1).unwrap();
        assert_eq!(db.lookup(b"d/test"), Some(&entry));
        assert_eq!(entry.last_update_height, 1);
        assert!(db.lookup(b"d/other").is_none());
    }

    #[test]
    fn test_register_duplicate() {
        let mut db = NameDb::new();
        db.register(b"d/test", b"{}", &[0x51], create_test_outpoint(1), 1).unwrap();
        let err = db.register(b"d/test", b"{}", &[0x51], create_test_outpoint(2), 2).unwrap_err();
        assert!(matches!(err, ConsensusError::DuplicateName { ref name } if name == "d/test"));
    }

    #[test]
    fn test_update_rebinds() {
        let mut db = NameDb::new();
        db.register(b"d/test", b"{}", &[0x51], create_test_outpoint(1), 1).unwrap();
        let entry = db
            .update(b"d/test", b"{\"a\":1}", &[0x52], &create_test_outpoint(1), create_test_outpoint(2), 5)
            .unwrap();
        assert_eq!(entry.outpoint, create_test_outpoint(2));
        assert_eq!(entry.value, b"{\"a\":1}".to_vec());
        assert_eq!(entry.locking_script, vec![0x52]);
        assert_eq!(entry.last_update_height, 5);
    }

    #[test]
    fn test_update_unknown_and_wrong_prevout() {
        let mut db = NameDb::new();
        let err = db
            .update(b"d/x", b"{}", &[], &create_test_outpoint(1), create_test_outpoint(2), 1)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownName { .. }));

        db.register(b"d/x", b"{}", &[0x51], create_test_outpoint(1), 1).unwrap();
        let err = db
            .update(b"d/x", b"{}", &[], &create_test_outpoint(9), create_test_outpoint(2), 1)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::WrongPrevout { .. }));
        assert_eq!(db.lookup(b"d/x").unwrap().outpoint, create_test_outpoint(1));
    }

    #[test]
    fn test_apply_and_undo() {
        let mut db = NameDb::new();
        let register = NameMutation { op: register_op("d/a"), output: 0, spent: None };
        let undo_register = db.apply(&register, [1; 32], &[0x51], 1).unwrap();

        let update = NameMutation {
            op: update_op("d/a", "{\"x\":2}"),
            output: 1,
            spent: Some(OutPoint::new([1; 32], 0)),
        };
        let undo_update = db.apply(&update, [2; 32], &[0x52], 2).unwrap();
        assert_eq!(db.lookup(b"d/a").unwrap().outpoint, OutPoint::new([2; 32], 1));

        db.undo(undo_update);
        assert_eq!(db.lookup(b"d/a").unwrap().value, b"{}".to_vec());
        assert_eq!(db.lookup(b"d/a").unwrap().outpoint, OutPoint::new([1; 32], 0));

        db.undo(undo_register);
        assert!(db.is_empty());
    }

    #[test]
    fn test_check_name() {
        assert!(check_name(b"d/test").is_ok());
        assert!(check_name(b"p/").is_ok());
        assert!(check_name(b"").is_err());
        assert!(check_name(b"test").is_err());
        assert!(check_name(b"/test").is_err());
        assert!(check_name(b"D/test").is_err());
        assert!(check_name(b"d/te\nst").is_err());
        assert!(check_name(&[b'd', b'/', 0xff]).is_err());
        let long = format!("d/{}", "a".repeat(MAX_NAME_LENGTH));
        assert!(check_name(long.as_bytes()).is_err());
    }

    #[test]
    fn test_check_value() {
        assert!(check_value(b"{}").is_ok());
        assert!(check_value(br#"{"value":"stolen"}"#).is_ok());
        assert!(check_value(b"[]").is_err());
        assert!(check_value(b"wrong value").is_err());
        let long = format!("{{\"a\":\"{}\"}}", "x".repeat(MAX_VALUE_LENGTH));
        assert!(check_value(long.as_bytes()).is_err());
    }

    #[test]
    fn test_check_name_transaction_plain() {
        let funding = create_test_outpoint(1);
        let tx = create_test_tx(
            &[funding],
            vec![TransactionOutput { value: 1000, script_pubkey: vec![0x51] }],
        );
        assert_eq!(check_name_transaction(&tx, &funding_utxos(&[funding]), &NameDb::new()).unwrap(), None);
    }

    #[test]
    fn test_check_name_transaction_register() {
        let funding = create_test_outpoint(1);
        let tx = create_test_tx(&[funding], vec![name_output(&register_op("d/a"), NAME_LOCKED_AMOUNT)]);
        let mutation = check_name_transaction(&tx, &funding_utxos(&[funding]), &NameDb::new())
            .unwrap()
            .unwrap();
        assert_eq!(mutation.output, 0);
        assert!(mutation.spent.is_none());
    }

    #[test]
    fn test_check_name_transaction_greedy() {
        let funding = create_test_outpoint(1);
        let tx = create_test_tx(&[funding], vec![name_output(&register_op("d/a"), NAME_LOCKED_AMOUNT - 1)]);
        let err = check_name_transaction(&tx, &funding_utxos(&[funding]), &NameDb::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::NameTransaction(ref r) if r == "greedy name"));
    }

    #[test]
    fn test_check_name_transaction_register_existing() {
        let funding = create_test_outpoint(1);
        let mut db = NameDb::new();
        db.register(b"d/a", b"{}", &[0x51], create_test_outpoint(5), 1).unwrap();
        let tx = create_test_tx(&[funding], vec![name_output(&register_op("d/a"), NAME_LOCKED_AMOUNT)]);
        let err = check_name_transaction(&tx, &funding_utxos(&[funding]), &db).unwrap_err();
        assert!(matches!(err, ConsensusError::DuplicateName { .. }));
    }

    #[test]
    fn test_check_name_transaction_update_requires_name_input() {
        let funding = create_test_outpoint(1);
        let tx = create_test_tx(&[funding], vec![name_output(&update_op("d/a", "{}"), NAME_LOCKED_AMOUNT)]);
        assert!(check_name_transaction(&tx, &funding_utxos(&[funding]), &NameDb::new()).is_err());
    }

    #[test]
    fn test_check_name_transaction_update_and_dropped_name() {
        let name_prevout = create_test_outpoint(2);
        let funding = create_test_outpoint(1);
        let mut utxos = funding_utxos(&[funding]);
        utxos.insert(
            name_prevout,
            UTXO {
                value: NAME_LOCKED_AMOUNT,
                script_pubkey: build_name_script(&p2pkh_script(&[7; 20]), &register_op("d/a")),
                height: 1,
            },
        );
        let mut db = NameDb::new();
        db.register(b"d/a", b"{}", &[0x51], name_prevout, 1).unwrap();

        let update = create_test_tx(
            &[name_prevout, funding],
            vec![name_output(&update_op("d/a", "{\"v\":1}"), NAME_LOCKED_AMOUNT)],
        );
        let mutation = check_name_transaction(&update, &utxos, &db).unwrap().unwrap();
        assert_eq!(mutation.spent, Some(name_prevout));

        let renamed = create_test_tx(
            &[name_prevout],
            vec![name_output(&update_op("d/b", "{}"), NAME_LOCKED_AMOUNT)],
        );
        assert!(check_name_transaction(&renamed, &utxos, &db).is_err());

        let dropped = create_test_tx(
            &[name_prevout],
            vec![TransactionOutput { value: 1000, script_pubkey: vec![0x51] }],
        );
        let err = check_name_transaction(&dropped, &utxos, &db).unwrap_err();
        assert!(matches!(err, ConsensusError::NameTransaction(_)));
    }

    #[test]
    fn test_check_name_transaction_wrong_prevout() {
        let name_prevout = create_test_outpoint(2);
        let mut utxos = UtxoSet::new();
        utxos.insert(
            name_prevout,
            UTXO {
                value: NAME_LOCKED_AMOUNT,
                script_pubkey: build_name_script(&p2pkh_script(&[7; 20]), &register_op("d/a")),
                height: 1,
            },
        );
        let mut db = NameDb::new();
        db.register(b"d/a", b"{}", &[0x51], create_test_outpoint(3), 1).unwrap();

        let tx = create_test_tx(
            &[name_prevout],
            vec![name_output(&update_op("d/a", "{}"), NAME_LOCKED_AMOUNT)],
        );
        let err = check_name_transaction(&tx, &utxos, &db).unwrap_err();
        assert!(matches!(err, ConsensusError::WrongPrevout { .. }));
    }
}
