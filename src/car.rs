//! CAR v1 framing.
//!
//! An archive is a length-prefixed DAG-CBOR header naming the root CIDs, followed by
//! length-prefixed blocks, each holding a binary CID and the bytes it addresses.
//! [`CarArchive::parse`] validates the framing of the whole buffer up front and indexes
//! every block by CID without copying.

use std::{collections::HashMap, io::Cursor};

use ciborium::value::Value;
use cid::Cid;
use log::debug;

use crate::error::{DecodeError, Result};

/// DAG-CBOR tag for a CID link.
pub const CID_TAG: u64 = 42;

const MAX_VARINT_LEN: usize = 10;

/// Decode an unsigned LEB128 varint from `buf` at `*pos`, advancing `*pos` past it.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let start = *pos;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        if *pos >= buf.len() {
            return Err(DecodeError::UnexpectedEof { offset: *pos });
        }
        if *pos - start >= MAX_VARINT_LEN {
            return Err(DecodeError::VarintOverflow { offset: start });
        }

        let byte = buf[*pos];
        *pos += 1;

        let payload = (byte & 0x7f) as u64;
        if shift == 63 && payload > 1 {
            return Err(DecodeError::VarintOverflow { offset: start });
        }
        result |= payload << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Append `value` to `buf` as an unsigned LEB128 varint.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// One block of the archive, borrowed from the caller's buffer.
#[derive(Clone, Copy, Debug)]
pub struct Block<'a> {
    pub cid: Cid,
    /// Bytes addressed by `cid`.
    pub data: &'a [u8],
    /// Length prefix, CID and data together.
    pub framed_len: usize,
}

#[derive(Debug)]
pub struct CarArchive<'a> {
    roots: Vec<Cid>,
    blocks: HashMap<Cid, Block<'a>>,
    first: Option<Cid>,
}

impl<'a> CarArchive<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let mut pos = 0;
        let roots = parse_header(buf, &mut pos)?;

        let mut blocks = HashMap::new();
        let mut first = None;

        while pos < buf.len() {
            let block = parse_block(buf, &mut pos)?;
            first.get_or_insert(block.cid);
            // Content addressed: a repeated CID carries the same bytes.
            blocks.entry(block.cid).or_insert(block);
        }

        debug!(
            "archive: {} roots, {} blocks, {} bytes",
            roots.len(),
            blocks.len(),
            buf.len()
        );

        Ok(Self {
            roots,
            blocks,
            first,
        })
    }

    /// The first root named by the header.
    pub fn root(&self) -> Cid {
        self.roots[0]
    }

    /// CID of the first block in archive order.
    pub fn first_block(&self) -> Option<Cid> {
        self.first
    }

    /// A block named by a link. A missing block is a dangling reference.
    pub fn require(&self, cid: &Cid) -> Result<&Block<'a>> {
        self.blocks.get(cid).ok_or(DecodeError::MissingBlock(*cid))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn parse_header(buf: &[u8], pos: &mut usize) -> Result<Vec<Cid>> {
    let len = decode_varint(buf, pos)?;
    let len = checked_len(buf, *pos, len)?;
    let header = &buf[*pos..*pos + len];
    *pos += len;

    let value = decode_cbor(header).map_err(DecodeError::InvalidHeader)?;

    match map_get(&value, "version").and_then(as_u64) {
        Some(1) => {}
        Some(v) => return Err(DecodeError::InvalidHeader(format!("unsupported version {}", v))),
        None => return Err(DecodeError::InvalidHeader("missing version".into())),
    }

    let roots = match map_get(&value, "roots") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| as_link(item).ok_or_else(|| DecodeError::InvalidHeader("root is not a CID link".into())))
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(DecodeError::InvalidHeader("missing roots".into())),
    };

    if roots.is_empty() {
        return Err(DecodeError::InvalidHeader("no roots".into()));
    }

    Ok(roots)
}

fn parse_block<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Block<'a>> {
    let offset = *pos;
    let len = decode_varint(buf, pos)?;
    let len = checked_len(buf, *pos, len)?;

    let body = &buf[*pos..*pos + len];
    let mut cursor = Cursor::new(body);
    let cid = Cid::read_bytes(&mut cursor).map_err(|e| DecodeError::InvalidCid {
        offset: *pos,
        reason: e.to_string(),
    })?;
    let cid_len = cursor.position() as usize;

    *pos += len;

    Ok(Block {
        cid,
        data: &body[cid_len..],
        framed_len: *pos - offset,
    })
}

fn checked_len(buf: &[u8], pos: usize, len: u64) -> Result<usize> {
    if len == 0 {
        return Err(DecodeError::InvalidBlockLength { offset: pos, len });
    }

    let available = buf.len() - pos;
    match usize::try_from(len) {
        Ok(len) if len <= available => Ok(len),
        Ok(len) => Err(DecodeError::TruncatedBlock {
            offset: pos,
            len,
            available,
        }),
        Err(_) => Err(DecodeError::InvalidBlockLength { offset: pos, len }),
    }
}

/// Decode one DAG-CBOR value.
pub fn decode_cbor(data: &[u8]) -> std::result::Result<Value, String> {
    ciborium::de::from_reader(data).map_err(|e| e.to_string())
}

/// Look up a text key in a CBOR map.
pub fn map_get<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
            Value::Text(k) if k == key => Some(v),
            _ => None,
        }),
        _ => None,
    }
}

/// Read a CID link (tag 42 over a byte string with a leading `0x00`).
pub fn as_link(value: &Value) -> Option<Cid> {
    match value {
        Value::Tag(CID_TAG, inner) => match inner.as_ref() {
            Value::Bytes(bytes) if bytes.first() == Some(&0) => Cid::try_from(&bytes[1..]).ok(),
            _ => None,
        },
        _ => None,
    }
}

pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(i) => u64::try_from(*i).ok(),
        _ => None,
    }
}
