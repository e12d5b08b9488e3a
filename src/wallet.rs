//! Deterministic key store and transaction signing
//!
//! Keys are derived as sha256(seed ‖ index) and never leave the process.
//! Only SIGHASH_ALL signatures over pay-to-pubkey-hash, native witness
//! key-hash and script-hash-wrapped witness key-hash outputs are produced.

use crate::address::{AddressType, Destination};
use crate::error::{ConsensusError, Result};
use crate::script::{
    hash160, legacy_signature_hash, p2pkh_script, push_data, sha256, witness_v0_signature_hash,
    OP_0, SIGHASH_ALL,
};
use crate::types::*;
use log::debug;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;

struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

pub struct Wallet {
    secp: Secp256k1<All>,
    seed: Hash,
    next_counter: u64,
    keys: Vec<KeyPair>,
    by_key_hash: HashMap<[u8; 20], usize>,
    /// script hash of a wrapped witness program → key hash
    by_script_hash: HashMap<[u8; 20], [u8; 20]>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").field("keys", &self.keys.len()).finish()
    }
}

/// Redeem script of a script-hash-wrapped witness key-hash output
fn wrapped_redeem_script(key_hash: &[u8; 20]) -> ByteString {
    let mut script = vec![OP_0];
    push_data(&mut script, key_hash);
    script
}

impl Wallet {
    pub fn new(seed: &[u8]) -> Self {
        Self {
            secp: Secp256k1::new(),
            seed: sha256(seed),
            next_counter: 0,
            keys: Vec::new(),
            by_key_hash: HashMap::new(),
            by_script_hash: HashMap::new(),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn derive_next(&mut self) -> [u8; 20] {
        let secret = loop {
            let mut material = self.seed.to_vec();
            material.extend_from_slice(&self.next_counter.to_le_bytes());
            self.next_counter += 1;
            // Out-of-range scalars are skipped
            if let Ok(secret) = SecretKey::from_slice(&sha256(&material)) {
                break secret;
            }
        };
        let public = PublicKey::from_secret_key(&self.secp, &secret);
        let key_hash = hash160(&public.serialize());

        let index = self.keys.len();
        self.keys.push(KeyPair { secret, public });
        self.by_key_hash.insert(key_hash, index);
        self.by_script_hash.insert(hash160(&wrapped_redeem_script(&key_hash)), key_hash);
        key_hash
    }

    /// Re-derive keys until `count` exist (used after loading state)
    pub fn ensure_keys(&mut self, count: usize) {
        while self.keys.len() < count {
            self.derive_next();
        }
    }

    pub fn get_new_address(&mut self, kind: AddressType) -> Destination {
        let key_hash = self.derive_next();
        let destination = match kind {
            AddressType::Legacy => Destination::PubKeyHash(key_hash),
            AddressType::Bech32 => Destination::WitnessV0KeyHash(key_hash),
            AddressType::P2shSegwit => {
                Destination::ScriptHash(hash160(&wrapped_redeem_script(&key_hash)))
            }
        };
        debug!("new {:?} address {}", kind, destination);
        destination
    }

    /// Key hash controlling `script_pubkey`, if the wallet owns it
    fn owning_key(&self, script_pubkey: &[u8]) -> Option<(Destination, [u8; 20])> {
        let destination = Destination::from_script(script_pubkey)?;
        let key_hash = match destination {
            Destination::PubKeyHash(hash) | Destination::WitnessV0KeyHash(hash) => hash,
            Destination::ScriptHash(hash) => *self.by_script_hash.get(&hash)?,
            Destination::WitnessV0ScriptHash(_) => return None,
        };
        self.by_key_hash.contains_key(&key_hash).then_some((destination, key_hash))
    }

    pub fn is_mine(&self, script_pubkey: &[u8]) -> bool {
        self.owning_key(script_pubkey).is_some()
    }

    fn sign_hash(&self, key: &KeyPair, sighash: &Hash) -> Result<ByteString> {
        let message = Message::from_digest_slice(sighash)
            .map_err(|e| ConsensusError::Wallet(e.to_string()))?;
        let mut signature = self.secp.sign_ecdsa(&message, &key.secret).serialize_der().to_vec();
        signature.push(SIGHASH_ALL);
        Ok(signature)
    }

    /// Sign every input whose spent output the wallet owns
    ///
    /// `spent_outputs[i]` is the output spent by input i, or `None` when it
    /// is unknown. Returns true when every input was signed.
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        spent_outputs: &[Option<UTXO>],
    ) -> Result<bool> {
        let mut complete = true;

        for index in 0..tx.inputs.len() {
            let spent = match spent_outputs.get(index).and_then(Option::as_ref) {
                Some(spent) => spent,
                None => {
                    complete = false;
                    continue;
                }
            };
            let (destination, key_hash) = match self.owning_key(&spent.script_pubkey) {
                Some(found) => found,
                None => {
                    complete = false;
                    continue;
                }
            };
            let key = self
                .by_key_hash
                .get(&key_hash)
                .and_then(|i| self.keys.get(*i))
                .ok_or_else(|| ConsensusError::Wallet("key vanished".to_string()))?;
            let pubkey = key.public.serialize().to_vec();

            match destination {
                Destination::PubKeyHash(_) => {
                    let sighash = legacy_signature_hash(tx, index, &spent.script_pubkey);
                    let signature = self.sign_hash(key, &sighash)?;
                    let mut script_sig = Vec::new();
                    push_data(&mut script_sig, &signature);
                    push_data(&mut script_sig, &pubkey);
                    tx.inputs[index].script_sig = script_sig;
                    tx.inputs[index].witness.clear();
                }
                Destination::WitnessV0KeyHash(_) | Destination::ScriptHash(_) => {
                    let script_code = p2pkh_script(&key_hash);
                    let sighash =
                        witness_v0_signature_hash(tx, index, &script_code, spent.value);
                    let signature = self.sign_hash(key, &sighash)?;
                    let script_sig = if matches!(destination, Destination::ScriptHash(_)) {
                        let mut script_sig = Vec::new();
                        push_data(&mut script_sig, &wrapped_redeem_script(&key_hash));
                        script_sig
                    } else {
                        Vec::new()
                    };
                    tx.inputs[index].script_sig = script_sig;
                    tx.inputs[index].witness = vec![signature, pubkey];
                }
                Destination::WitnessV0ScriptHash(_) => complete = false,
            }
        }

        Ok(complete)
    }
}
