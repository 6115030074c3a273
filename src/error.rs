use cid::Cid;
use thiserror::Error;

/// Structural failures while reading a block archive. Any of these abandons the import.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of archive at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("varint at offset {offset} is longer than 10 bytes")]
    VarintOverflow { offset: usize },

    #[error("invalid block length {len} at offset {offset}")]
    InvalidBlockLength { offset: usize, len: u64 },

    #[error("block at offset {offset} of {len} bytes runs past end of archive ({available} bytes left)")]
    TruncatedBlock {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("invalid CID at offset {offset}: {reason}")]
    InvalidCid { offset: usize, reason: String },

    #[error("invalid archive header: {0}")]
    InvalidHeader(String),

    #[error("invalid commit block {cid}: {reason}")]
    InvalidCommit { cid: Cid, reason: String },

    #[error("invalid tree node {cid}: {reason}")]
    InvalidNode { cid: Cid, reason: String },

    #[error("invalid storage key {key:?}")]
    InvalidKey { key: String },

    #[error("block {0} is referenced but not present in the archive")]
    MissingBlock(Cid),

    #[error("block {cid} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        cid: Cid,
        expected: String,
        actual: String,
    },

    #[error("block {cid} uses unsupported multihash code {code:#x}")]
    UnsupportedHash { cid: Cid, code: u64 },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// A record that could not be placed because its label is already taken at that level.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{collection}/{key} skipped: label {label:?} already used by a {existing} at that level")]
pub struct LabelCollision {
    pub collection: String,
    pub key: String,
    pub label: String,
    pub existing: NodeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Folder => write!(f, "folder"),
            NodeKind::File => write!(f, "file"),
        }
    }
}
