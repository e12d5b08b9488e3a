//! Output destinations and their textual form
//!
//! Addresses are rendered as `<kind>:<hex payload>`, e.g. `wpkh:1a2b...`.

use crate::error::{ConsensusError, Result};
use crate::name_script::strip_name_prefix;
use crate::script::{is_p2sh, p2pkh_script, push_data, witness_program, OP_0, OP_EQUAL, OP_HASH160};
use crate::types::ByteString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address flavour requested from the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    Legacy,
    P2shSegwit,
    Bech32,
}

/// Locking-script template an output pays to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    PubKeyHash([u8; 20]),
    ScriptHash([u8; 20]),
    WitnessV0KeyHash([u8; 20]),
    WitnessV0ScriptHash([u8; 32]),
}

impl Destination {
    pub fn script_pubkey(&self) -> ByteString {
        match self {
            Destination::PubKeyHash(hash) => p2pkh_script(hash),
            Destination::ScriptHash(hash) => {
                let mut script = vec![OP_HASH160];
                push_data(&mut script, hash);
                script.push(OP_EQUAL);
                script
            }
            Destination::WitnessV0KeyHash(hash) => {
                let mut script = vec![OP_0];
                push_data(&mut script, hash);
                script
            }
            Destination::WitnessV0ScriptHash(hash) => {
                let mut script = vec![OP_0];
                push_data(&mut script, hash);
                script
            }
        }
    }

    /// Recognise the address part of `script`, ignoring any name prefix
    pub fn from_script(script: &[u8]) -> Option<Self> {
        let address = strip_name_prefix(script);

        if let Some((0, program)) = witness_program(address) {
            return match program.len() {
                20 => {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(program);
                    Some(Destination::WitnessV0KeyHash(hash))
                }
                32 => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(program);
                    Some(Destination::WitnessV0ScriptHash(hash))
                }
                _ => None,
            };
        }

        if is_p2sh(address) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&address[2..22]);
            return Some(Destination::ScriptHash(hash));
        }

        if address.len() == 25 && address == p2pkh_script(&address[3..23]).as_slice() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&address[3..23]);
            return Some(Destination::PubKeyHash(hash));
        }

        None
    }

    fn prefix(&self) -> &'static str {
        match self {
            Destination::PubKeyHash(_) => "pkh",
            Destination::ScriptHash(_) => "sh",
            Destination::WitnessV0KeyHash(_) => "wpkh",
            Destination::WitnessV0ScriptHash(_) => "wsh",
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Destination::PubKeyHash(hash)
            | Destination::ScriptHash(hash)
            | Destination::WitnessV0KeyHash(hash) => hash,
            Destination::WitnessV0ScriptHash(hash) => hash,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix(), hex::encode(self.payload()))
    }
}

impl FromStr for Destination {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        let (prefix, payload) = s
            .split_once(':')
            .ok_or_else(|| ConsensusError::Wallet(format!("malformed address {}", s)))?;
        let bytes = hex::decode(payload)
            .map_err(|e| ConsensusError::Wallet(format!("malformed address {}: {}", s, e)))?;

        let short = || -> Result<[u8; 20]> {
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ConsensusError::Wallet(format!("bad payload length in {}", s)))
        };

        match prefix {
            "pkh" => Ok(Destination::PubKeyHash(short()?)),
            "sh" => Ok(Destination::ScriptHash(short()?)),
            "wpkh" => Ok(Destination::WitnessV0KeyHash(short()?)),
            "wsh" => {
                let hash: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ConsensusError::Wallet(format!("bad payload length in {}", s)))?;
                Ok(Destination::WitnessV0ScriptHash(hash))
            }
            other => Err(ConsensusError::Wallet(format!("unknown address kind {}", other))),
        }
    }
}
