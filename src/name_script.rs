//! Name-operation scripts
//!
//! A name output is an ordinary address script with a prefix:
//! `OP_NAME_REGISTER|OP_NAME_UPDATE <name> <value> OP_2DROP OP_DROP <address>`.
//! The prefix leaves the stack unchanged, so the address part alone decides
//! who can spend the output.

use crate::script::{push_data, read_op, OP_0, OP_1, OP_2, OP_2DROP, OP_DROP};
use crate::types::ByteString;
use serde::{Deserialize, Serialize};

pub const OP_NAME_REGISTER: u8 = OP_1;
pub const OP_NAME_UPDATE: u8 = OP_2;

/// Name operation carried by an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NameOp {
    #[serde(rename = "name_register")]
    Register { name: ByteString, value: ByteString },
    #[serde(rename = "name_update")]
    Update { name: ByteString, value: ByteString },
}

impl NameOp {
    pub fn name(&self) -> &[u8] {
        match self {
            NameOp::Register { name, .. } | NameOp::Update { name, .. } => name,
        }
    }

    pub fn value(&self) -> &[u8] {
        match self {
            NameOp::Register { value, .. } | NameOp::Update { value, .. } => value,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, NameOp::Register { .. })
    }

    fn opcode(&self) -> u8 {
        match self {
            NameOp::Register { .. } => OP_NAME_REGISTER,
            NameOp::Update { .. } => OP_NAME_UPDATE,
        }
    }
}

/// Parsed output script: optional name operation plus the address part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameScript<'a> {
    pub op: Option<NameOp>,
    pub address: &'a [u8],
}

impl<'a> NameScript<'a> {
    pub fn parse(script: &'a [u8]) -> Self {
        match parse_prefix(script) {
            Some((op, prefix_len)) => NameScript { op: Some(op), address: &script[prefix_len..] },
            None => NameScript { op: None, address: script },
        }
    }

    pub fn is_name_op(&self) -> bool {
        self.op.is_some()
    }
}

fn read_push(script: &[u8], pos: &mut usize) -> Option<ByteString> {
    match read_op(script, pos).ok()? {
        (OP_0, None) => Some(Vec::new()),
        (_, Some(data)) => Some(data.to_vec()),
        _ => None,
    }
}

fn parse_prefix(script: &[u8]) -> Option<(NameOp, usize)> {
    let mut pos = 0;
    let (opcode, _) = read_op(script, &mut pos).ok()?;
    if opcode != OP_NAME_REGISTER && opcode != OP_NAME_UPDATE {
        return None;
    }
    let name = read_push(script, &mut pos)?;
    let value = read_push(script, &mut pos)?;
    if read_op(script, &mut pos).ok()? != (OP_2DROP, None) {
        return None;
    }
    if read_op(script, &mut pos).ok()? != (OP_DROP, None) {
        return None;
    }

    let op = if opcode == OP_NAME_REGISTER {
        NameOp::Register { name, value }
    } else {
        NameOp::Update { name, value }
    };
    Some((op, pos))
}

/// Prefix `address` with `op`
pub fn build_name_script(address: &[u8], op: &NameOp) -> ByteString {
    let mut script = vec![op.opcode()];
    push_data(&mut script, op.name());
    push_data(&mut script, op.value());
    script.push(OP_2DROP);
    script.push(OP_DROP);
    script.extend_from_slice(address);
    script
}

/// Address part of a script, with any name prefix removed
pub fn strip_name_prefix(script: &[u8]) -> &[u8] {
    NameScript::parse(script).address
}
