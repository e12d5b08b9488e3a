//! Script verification
//!
//! The interpreter covers the opcode subset used by standard output templates
//! (pay-to-pubkey-hash, pay-to-script-hash, witness v0 programs) and the
//! name-operation prefix. Spending rules are selected by verification flags:
//! consensus ("mandatory") flags at block acceptance, relay ("standard")
//! flags at mempool admission.

use crate::constants::*;
use crate::error::ScriptError;
use crate::name_script::strip_name_prefix;
use crate::serialization::{encode_varint, serialize_transaction, sha256d};
use crate::types::*;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// No extra checks
pub const SCRIPT_VERIFY_NONE: u32 = 0;
/// Evaluate pay-to-script-hash redeem scripts
pub const SCRIPT_VERIFY_P2SH: u32 = 1 << 0;
/// Evaluate witness programs instead of treating them as anyone-can-spend
pub const SCRIPT_VERIFY_WITNESS: u32 = 1 << 1;
/// Require exactly one stack element after evaluation
pub const SCRIPT_VERIFY_CLEANSTACK: u32 = 1 << 2;
/// Refuse witness versions reserved for future soft forks
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 3;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_2: u8 = 0x52;
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_3DUP: u8 = 0x6f;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;
pub const OP_SIZE: u8 = 0x82;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;

/// Only SIGHASH_ALL signatures are produced and accepted
pub const SIGHASH_ALL: u8 = 0x01;

/// Which signature-hash algorithm a script is evaluated under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    Base,
    WitnessV0,
}

/// Signature checking seam; the interpreter knows nothing about transactions
pub trait SignatureChecker {
    fn check_sig(
        &self,
        signature: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        sig_version: SigVersion,
    ) -> bool;
}

/// Checker that rejects every signature
pub struct NoSignatureChecker;

impl SignatureChecker for NoSignatureChecker {
    fn check_sig(&self, _: &[u8], _: &[u8], _: &[u8], _: SigVersion) -> bool {
        false
    }
}

/// Checks signatures against the spending transaction
pub struct TransactionSignatureChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub amount: Amount,
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize, amount: Amount) -> Self {
        Self { tx, input_index, amount }
    }
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_sig(
        &self,
        signature: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        sig_version: SigVersion,
    ) -> bool {
        let (hash_type, der) = match signature.split_last() {
            Some((hash_type, der)) => (*hash_type, der),
            None => return false,
        };
        if hash_type != SIGHASH_ALL {
            return false;
        }

        let sighash = match sig_version {
            SigVersion::Base => legacy_signature_hash(self.tx, self.input_index, script_code),
            SigVersion::WitnessV0 => {
                witness_v0_signature_hash(self.tx, self.input_index, script_code, self.amount)
            }
        };

        verify_signature(pubkey, der, &sighash)
    }
}

fn verify_signature(pubkey_bytes: &[u8], der: &[u8], sighash: &Hash) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(der) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(sighash) {
        Ok(message) => message,
        Err(_) => return false,
    };
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &pubkey)
        .is_ok()
}

/// Signature hash for scripts evaluated outside a witness
pub fn legacy_signature_hash(tx: &Transaction, input_index: usize, script_code: &[u8]) -> Hash {
    let mut copy = tx.without_witness();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        input.script_sig = if i == input_index { script_code.to_vec() } else { Vec::new() };
    }
    let mut data = serialize_transaction(&copy, false);
    data.extend_from_slice(&(SIGHASH_ALL as u32).to_le_bytes());
    sha256d(&data)
}

/// Signature hash for witness v0 scripts (commits to the spent amount)
pub fn witness_v0_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: Amount,
) -> Hash {
    let mut prevouts = Vec::new();
    let mut sequences = Vec::new();
    for input in &tx.inputs {
        prevouts.extend_from_slice(&input.prevout.hash);
        prevouts.extend_from_slice(&(input.prevout.index as u32).to_le_bytes());
        sequences.extend_from_slice(&(input.sequence as u32).to_le_bytes());
    }
    let mut outputs = Vec::new();
    for output in &tx.outputs {
        outputs.extend_from_slice(&(output.value as u64).to_le_bytes());
        outputs.extend_from_slice(&encode_varint(output.script_pubkey.len() as u64));
        outputs.extend_from_slice(&output.script_pubkey);
    }

    let input = &tx.inputs[input_index];
    let mut data = Vec::new();
    data.extend_from_slice(&(tx.version as u32).to_le_bytes());
    data.extend_from_slice(&sha256d(&prevouts));
    data.extend_from_slice(&sha256d(&sequences));
    data.extend_from_slice(&input.prevout.hash);
    data.extend_from_slice(&(input.prevout.index as u32).to_le_bytes());
    data.extend_from_slice(&encode_varint(script_code.len() as u64));
    data.extend_from_slice(script_code);
    data.extend_from_slice(&(amount as u64).to_le_bytes());
    data.extend_from_slice(&(input.sequence as u32).to_le_bytes());
    data.extend_from_slice(&sha256d(&outputs));
    data.extend_from_slice(&(tx.lock_time as u32).to_le_bytes());
    data.extend_from_slice(&(SIGHASH_ALL as u32).to_le_bytes());
    sha256d(&data)
}

/// Script-level verdict supplied to the acceptance pipeline
pub trait ScriptVerifier {
    fn verify(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        witness: &Witness,
        flags: u32,
        checker: &dyn SignatureChecker,
    ) -> ScriptResult<()>;
}

/// In-process interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl ScriptVerifier for Interpreter {
    fn verify(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        witness: &Witness,
        flags: u32,
        checker: &dyn SignatureChecker,
    ) -> ScriptResult<()> {
        verify_script(script_sig, script_pubkey, witness, flags, checker)
    }
}

/// Decode the operation at `pos`, returning the opcode and any pushed data
pub fn read_op<'a>(script: &'a [u8], pos: &mut usize) -> ScriptResult<(u8, Option<&'a [u8]>)> {
    let opcode = *script.get(*pos).ok_or(ScriptError::BadOpcode)?;
    *pos += 1;

    let len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => {
            let len = *script.get(*pos).ok_or(ScriptError::BadOpcode)? as usize;
            *pos += 1;
            len
        }
        OP_PUSHDATA2 => {
            let bytes = script.get(*pos..*pos + 2).ok_or(ScriptError::BadOpcode)?;
            *pos += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let bytes = script.get(*pos..*pos + 4).ok_or(ScriptError::BadOpcode)?;
            *pos += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        _ => return Ok((opcode, None)),
    };

    let data = script.get(*pos..*pos + len).ok_or(ScriptError::BadOpcode)?;
    *pos += len;
    Ok((opcode, Some(data)))
}

/// Encode a minimal data push
pub fn push_data(script: &mut ByteString, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        len @ 1..=0x4b => script.push(len as u8),
        len @ 0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
        }
        len @ 0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

pub fn is_push_only(script: &[u8]) -> bool {
    let mut pos = 0;
    while pos < script.len() {
        match read_op(script, &mut pos) {
            Ok((opcode, _)) if opcode <= OP_16 => {}
            _ => return false,
        }
    }
    true
}

/// Witness program: version opcode followed by one 2..=40 byte push
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Pay-to-pubkey-hash template, also the script code of a v0 key-hash program
pub fn p2pkh_script(hash: &[u8]) -> ByteString {
    let mut script = vec![OP_DUP, OP_HASH160];
    push_data(&mut script, hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd);
    out
}

pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Minimal little-endian script number for a non-negative value
///
/// Zero is the empty vector; a set sign bit on the top byte gets a zero
/// byte appended.
pub fn encode_script_num(value: u64) -> ByteString {
    let mut encoded = value.to_le_bytes().to_vec();
    while encoded.last() == Some(&0) {
        encoded.pop();
    }
    if encoded.last().map_or(false, |b| b & 0x80 != 0) {
        encoded.push(0);
    }
    encoded
}

fn cast_to_bool(value: &[u8]) -> bool {
    for (i, byte) in value.iter().enumerate() {
        if *byte != 0 {
            // Negative zero is false
            return !(i == value.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn pop(stack: &mut Vec<ByteString>) -> ScriptResult<ByteString> {
    stack.pop().ok_or(ScriptError::InvalidStackOperation)
}

fn require(stack: &[ByteString], n: usize) -> ScriptResult<()> {
    if stack.len() < n {
        return Err(ScriptError::InvalidStackOperation);
    }
    Ok(())
}

fn bool_item(value: bool) -> ByteString {
    if value {
        vec![1]
    } else {
        vec![]
    }
}

/// EvalScript: run `script` against `stack`
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    _flags: u32,
    checker: &dyn SignatureChecker,
    sig_version: SigVersion,
) -> ScriptResult<()> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut op_count = 0;
    let mut pos = 0;
    while pos < script.len() {
        let (opcode, data) = read_op(script, &mut pos)?;

        if let Some(data) = data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
        }

        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_SCRIPT_OPS {
                return Err(ScriptError::OpCount);
            }
        }

        execute_opcode(opcode, data, stack, script, checker, sig_version)?;

        if stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    Ok(())
}

fn execute_opcode(
    opcode: u8,
    data: Option<&[u8]>,
    stack: &mut Vec<ByteString>,
    script: &[u8],
    checker: &dyn SignatureChecker,
    sig_version: SigVersion,
) -> ScriptResult<()> {
    if let Some(data) = data {
        stack.push(data.to_vec());
        return Ok(());
    }

    match opcode {
        OP_0 => stack.push(vec![]),
        OP_1NEGATE => stack.push(vec![0x81]),
        OP_1..=OP_16 => stack.push(vec![opcode - (OP_1 - 1)]),
        OP_NOP => {}

        OP_VERIFY => {
            let item = pop(stack)?;
            if !cast_to_bool(&item) {
                return Err(ScriptError::Verify);
            }
        }

        OP_RETURN => return Err(ScriptError::OpReturn),

        OP_IFDUP => {
            require(stack, 1)?;
            let top = stack[stack.len() - 1].clone();
            if cast_to_bool(&top) {
                stack.push(top);
            }
        }

        OP_DEPTH => {
            let depth = encode_script_num(stack.len() as u64);
            stack.push(depth);
        }

        OP_DROP => {
            pop(stack)?;
        }

        OP_2DROP => {
            require(stack, 2)?;
            stack.truncate(stack.len() - 2);
        }

        OP_DUP => {
            require(stack, 1)?;
            let top = stack[stack.len() - 1].clone();
            stack.push(top);
        }

        OP_2DUP => {
            require(stack, 2)?;
            let second = stack[stack.len() - 2].clone();
            let top = stack[stack.len() - 1].clone();
            stack.push(second);
            stack.push(top);
        }

        OP_3DUP => {
            require(stack, 3)?;
            let len = stack.len();
            let items: Vec<ByteString> = stack[len - 3..].to_vec();
            stack.extend(items);
        }

        OP_2OVER => {
            require(stack, 4)?;
            let len = stack.len();
            let items: Vec<ByteString> = stack[len - 4..len - 2].to_vec();
            stack.extend(items);
        }

        OP_2SWAP => {
            require(stack, 4)?;
            let len = stack.len();
            stack.swap(len - 4, len - 2);
            stack.swap(len - 3, len - 1);
        }

        OP_NIP => {
            require(stack, 2)?;
            let len = stack.len();
            stack.remove(len - 2);
        }

        OP_OVER => {
            require(stack, 2)?;
            let second = stack[stack.len() - 2].clone();
            stack.push(second);
        }

        OP_ROT => {
            require(stack, 3)?;
            let len = stack.len();
            let third = stack.remove(len - 3);
            stack.push(third);
        }

        OP_SWAP => {
            require(stack, 2)?;
            let len = stack.len();
            stack.swap(len - 2, len - 1);
        }

        OP_TUCK => {
            require(stack, 2)?;
            let top = stack[stack.len() - 1].clone();
            let len = stack.len();
            stack.insert(len - 2, top);
        }

        OP_SIZE => {
            require(stack, 1)?;
            let size = encode_script_num(stack[stack.len() - 1].len() as u64);
            stack.push(size);
        }

        OP_EQUAL | OP_EQUALVERIFY => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            let equal = a == b;
            if opcode == OP_EQUALVERIFY {
                if !equal {
                    return Err(ScriptError::EqualVerify);
                }
            } else {
                stack.push(bool_item(equal));
            }
        }

        OP_SHA256 => {
            let item = pop(stack)?;
            stack.push(sha256(&item).to_vec());
        }

        OP_HASH160 => {
            let item = pop(stack)?;
            stack.push(hash160(&item).to_vec());
        }

        OP_HASH256 => {
            let item = pop(stack)?;
            stack.push(sha256d(&item).to_vec());
        }

        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            let pubkey = pop(stack)?;
            let signature = pop(stack)?;
            let valid = !signature.is_empty()
                && checker.check_sig(&signature, &pubkey, script, sig_version);
            if opcode == OP_CHECKSIGVERIFY {
                if !valid {
                    return Err(ScriptError::CheckSigVerify);
                }
            } else {
                stack.push(bool_item(valid));
            }
        }

        _ => return Err(ScriptError::BadOpcode),
    }

    Ok(())
}

fn verify_witness_program(
    witness: &Witness,
    version: u8,
    program: &[u8],
    flags: u32,
    checker: &dyn SignatureChecker,
) -> ScriptResult<()> {
    let (mut stack, script) = if version == 0 {
        match program.len() {
            32 => {
                let (script, rest) = witness
                    .split_last()
                    .ok_or(ScriptError::WitnessProgramWitnessEmpty)?;
                if sha256(script)[..] != program[..] {
                    return Err(ScriptError::WitnessProgramMismatch);
                }
                (rest.to_vec(), script.clone())
            }
            20 => {
                if witness.len() != 2 {
                    return Err(ScriptError::WitnessProgramMismatch);
                }
                (witness.clone(), p2pkh_script(program))
            }
            _ => return Err(ScriptError::WitnessProgramWrongLength),
        }
    } else if flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM != 0 {
        return Err(ScriptError::DiscourageUpgradableWitnessProgram);
    } else {
        // Unknown versions stay anyone-can-spend
        return Ok(());
    };

    if stack.iter().any(|item| item.len() > MAX_SCRIPT_ELEMENT_SIZE) {
        return Err(ScriptError::PushSize);
    }

    eval_script(&script, &mut stack, flags, checker, SigVersion::WitnessV0)?;

    // Witness scripts always require a clean stack
    if stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    if !cast_to_bool(&stack[0]) {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}

/// VerifyScript: scriptSig, scriptPubKey and witness under `flags`
///
/// A name-operation prefix on the scriptPubKey is executed like any other
/// script but ignored when detecting pay-to-script-hash and witness programs.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    witness: &Witness,
    flags: u32,
    checker: &dyn SignatureChecker,
) -> ScriptResult<()> {
    let address_script = strip_name_prefix(script_pubkey);

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, flags, checker, SigVersion::Base)?;
    let stack_copy = if flags & SCRIPT_VERIFY_P2SH != 0 { stack.clone() } else { Vec::new() };

    eval_script(script_pubkey, &mut stack, flags, checker, SigVersion::Base)?;
    match stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Err(ScriptError::EvalFalse),
    }

    let mut had_witness = false;
    if flags & SCRIPT_VERIFY_WITNESS != 0 {
        if let Some((version, program)) = witness_program(address_script) {
            had_witness = true;
            if !script_sig.is_empty() {
                return Err(ScriptError::WitnessMalleated);
            }
            verify_witness_program(witness, version, program, flags, checker)?;
            stack.truncate(1);
        }
    }

    if flags & SCRIPT_VERIFY_P2SH != 0 && is_p2sh(address_script) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }

        stack = stack_copy;
        let redeem_script = pop(&mut stack)?;
        eval_script(&redeem_script, &mut stack, flags, checker, SigVersion::Base)?;
        match stack.last() {
            Some(top) if cast_to_bool(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }

        if flags & SCRIPT_VERIFY_WITNESS != 0 {
            if let Some((version, program)) = witness_program(&redeem_script) {
                had_witness = true;
                let mut expected = Vec::new();
                push_data(&mut expected, &redeem_script);
                if script_sig != expected.as_slice() {
                    return Err(ScriptError::WitnessMalleatedP2sh);
                }
                verify_witness_program(witness, version, program, flags, checker)?;
                stack.truncate(1);
            }
        }
    }

    if flags & SCRIPT_VERIFY_CLEANSTACK != 0 && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    if flags & SCRIPT_VERIFY_WITNESS != 0 && !had_witness && !witness.is_empty() {
        return Err(ScriptError::WitnessUnexpected);
    }

    Ok(())
}
