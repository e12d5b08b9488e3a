//! Wire format for transactions and blocks
//!
//! Transactions use the legacy encoding, optionally extended with the segwit
//! marker/flag and one witness stack per input. Blocks are an 80-byte header
//! followed by their transactions. Whether witness data is written is a
//! parameter of the projection; the in-memory representation always carries it.

use crate::error::{ConsensusError, Result};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

/// Encode a number as a varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&encode_varint(bytes.len() as u64));
    out.extend_from_slice(bytes);
}

/// Serialize a transaction, with witness data only when requested and present
pub fn serialize_transaction(tx: &Transaction, with_witness: bool) -> Vec<u8> {
    let include_witness = with_witness && tx.has_witness();
    let mut data = Vec::new();

    data.extend_from_slice(&(tx.version as u32).to_le_bytes());
    if include_witness {
        // Marker and flag
        data.push(0x00);
        data.push(0x01);
    }

    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&(input.prevout.index as u32).to_le_bytes());
        write_bytes(&mut data, &input.script_sig);
        data.extend_from_slice(&(input.sequence as u32).to_le_bytes());
    }

    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&(output.value as u64).to_le_bytes());
        write_bytes(&mut data, &output.script_pubkey);
    }

    if include_witness {
        for input in &tx.inputs {
            data.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for element in &input.witness {
                write_bytes(&mut data, element);
            }
        }
    }

    data.extend_from_slice(&(tx.lock_time as u32).to_le_bytes());
    data
}

/// Serialize the 80-byte block header
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(80);
    bytes.extend_from_slice(&(header.version as u32).to_le_bytes());
    bytes.extend_from_slice(&header.prev_block_hash);
    bytes.extend_from_slice(&header.merkle_root);
    bytes.extend_from_slice(&(header.timestamp as u32).to_le_bytes());
    bytes.extend_from_slice(&(header.bits as u32).to_le_bytes());
    bytes.extend_from_slice(&(header.nonce as u32).to_le_bytes());
    bytes
}

/// Serialize a block; `with_witness = false` yields the form a legacy peer sees
pub fn serialize_block(block: &Block, with_witness: bool) -> Vec<u8> {
    let mut data = serialize_header(&block.header);
    data.extend_from_slice(&encode_varint(block.transactions.len() as u64));
    for tx in &block.transactions {
        data.extend_from_slice(&serialize_transaction(tx, with_witness));
    }
    data
}

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Transaction id: hash of the serialization without witness data
pub fn txid(tx: &Transaction) -> Hash {
    sha256d(&serialize_transaction(tx, false))
}

/// Witness transaction id: hash of the full serialization
pub fn wtxid(tx: &Transaction) -> Hash {
    sha256d(&serialize_transaction(tx, true))
}

pub fn block_hash(header: &BlockHeader) -> Hash {
    sha256d(&serialize_header(header))
}

/// Hex rendering in the usual byte-reversed order
pub fn hash_to_hex(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Byte cursor used by the decoders
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            ConsensusError::Serialization("length overflow".to_string())
        })?;
        if end > self.data.len() {
            return Err(ConsensusError::Serialization(format!(
                "unexpected end of data at offset {}",
                self.pos
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_hash(&mut self) -> Result<Hash> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        Ok(hash)
    }

    fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xfd => {
                let bytes = self.take(2)?;
                Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u64)
            }
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_varint()?;
        let remaining = (self.data.len() - self.pos) as u64;
        if len > remaining {
            return Err(ConsensusError::Serialization(format!(
                "declared length {} exceeds remaining {} bytes",
                len, remaining
            )));
        }
        Ok(len as usize)
    }

    fn read_bytes(&mut self) -> Result<ByteString> {
        let len = self.read_length()?;
        Ok(self.take(len)?.to_vec())
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn read_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let version = reader.read_u32()? as Natural;

    let mut segwit = false;
    if reader.peek() == Some(0x00) {
        reader.read_u8()?;
        let flag = reader.read_u8()?;
        if flag != 0x01 {
            return Err(ConsensusError::Serialization(format!(
                "unknown transaction flag {:#04x}",
                flag
            )));
        }
        segwit = true;
    }

    let input_count = reader.read_length()?;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let hash = reader.read_hash()?;
        let index = reader.read_u32()? as Natural;
        let script_sig = reader.read_bytes()?;
        let sequence = reader.read_u32()? as Natural;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
            witness: Vec::new(),
        });
    }

    let output_count = reader.read_length()?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = reader.read_u64()? as Amount;
        let script_pubkey = reader.read_bytes()?;
        outputs.push(TransactionOutput { value, script_pubkey });
    }

    if segwit {
        for input in &mut inputs {
            let items = reader.read_length()?;
            for _ in 0..items {
                input.witness.push(reader.read_bytes()?);
            }
        }
        if inputs.iter().all(|input| input.witness.is_empty()) {
            return Err(ConsensusError::Serialization(
                "superfluous witness record".to_string(),
            ));
        }
    }

    let lock_time = reader.read_u32()? as Natural;
    Ok(Transaction { version, inputs, outputs, lock_time })
}

fn read_header(reader: &mut Reader<'_>) -> Result<BlockHeader> {
    Ok(BlockHeader {
        version: reader.read_u32()? as i32 as Integer,
        prev_block_hash: reader.read_hash()?,
        merkle_root: reader.read_hash()?,
        timestamp: reader.read_u32()? as Natural,
        bits: reader.read_u32()? as Natural,
        nonce: reader.read_u32()? as Natural,
    })
}

/// Deserialize a transaction in either encoding
pub fn deserialize_transaction(data: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(data);
    let tx = read_transaction(&mut reader)?;
    if !reader.is_empty() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after transaction".to_string(),
        ));
    }
    Ok(tx)
}

/// Deserialize a block in either encoding
pub fn deserialize_block(data: &[u8]) -> Result<Block> {
    let mut reader = Reader::new(data);
    let header = read_header(&mut reader)?;
    let tx_count = reader.read_length()?;
    let mut transactions = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        transactions.push(read_transaction(&mut reader)?);
    }
    if !reader.is_empty() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after block".to_string(),
        ));
    }
    Ok(Block { header, transactions })
}
