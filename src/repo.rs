//! Repository layer over a CAR archive: the signed commit and the key-value tree of records.
//!
//! Records are stored in a Merkle Search Tree keyed by `<collection>/<key>`. Each node is
//! `{l, e}` where `l` optionally links the subtree left of every entry and `e` is a list of
//! `{p, k, v, t}` entries: `p` bytes shared with the previous key, `k` the remaining key
//! bytes, `v` the record link and `t` the subtree right of the entry. [`Records`] walks the
//! tree in key order with an explicit stack and decodes one record per `next()`.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ciborium::value::Value;
use cid::Cid;
use log::warn;
use serde::Deserialize;

use crate::{
    car::{as_link, as_u64, decode_cbor, map_get, Block, CarArchive},
    error::{DecodeError, Result},
    hash,
};

/// One record from the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedRecord {
    pub collection: String,
    pub key: String,
    pub byte_size: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Which bytes count towards a record's size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeAccounting {
    /// Length prefix, CID and payload of the record's block.
    #[default]
    Framed,
    /// Encoded payload only.
    Payload,
}

impl SizeAccounting {
    pub fn size_of(self, block: &Block<'_>) -> u64 {
        match self {
            SizeAccounting::Framed => block.framed_len as u64,
            SizeAccounting::Payload => block.data.len() as u64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub size_accounting: SizeAccounting,
    pub verify_blocks: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub cid: Cid,
    pub did: String,
    pub version: u64,
    pub rev: Option<String>,
    /// Root of the key-value tree.
    pub data: Cid,
}

pub struct RepoReader<'a> {
    archive: CarArchive<'a>,
    commit: Commit,
    options: DecodeOptions,
}

impl<'a> RepoReader<'a> {
    pub fn from_bytes(buf: &'a [u8]) -> Result<Self> {
        Self::with_options(buf, DecodeOptions::default())
    }

    pub fn with_options(buf: &'a [u8], options: DecodeOptions) -> Result<Self> {
        let archive = CarArchive::parse(buf)?;
        let root = archive.root();
        if archive.first_block() != Some(root) {
            warn!("commit {} is not the first block of the archive", root);
        }
        let block = archive.require(&root)?;
        if options.verify_blocks {
            hash::verify(&block.cid, block.data)?;
        }
        let commit = parse_commit(root, block.data)?;

        Ok(Self {
            archive,
            commit,
            options,
        })
    }

    pub fn commit(&self) -> &Commit {
        &self.commit
    }

    pub fn archive(&self) -> &CarArchive<'a> {
        &self.archive
    }

    /// Records in key order. Single pass; stops after the first error.
    pub fn records(&self) -> Records<'_, 'a> {
        Records {
            archive: &self.archive,
            options: self.options,
            stack: vec![Step::Node(self.commit.data)],
            expanded: HashSet::new(),
            failed: false,
        }
    }
}

fn parse_commit(cid: Cid, data: &[u8]) -> Result<Commit> {
    let invalid = |reason: &str| DecodeError::InvalidCommit {
        cid,
        reason: reason.to_owned(),
    };

    let value = decode_cbor(data).map_err(|e| invalid(&e))?;

    let did = match map_get(&value, "did") {
        Some(Value::Text(did)) => did.clone(),
        _ => return Err(invalid("missing did")),
    };
    let data = map_get(&value, "data")
        .and_then(as_link)
        .ok_or_else(|| invalid("missing data link"))?;
    let version = map_get(&value, "version").and_then(as_u64).unwrap_or(0);
    let rev = match map_get(&value, "rev") {
        Some(Value::Text(rev)) => Some(rev.clone()),
        _ => None,
    };

    Ok(Commit {
        cid,
        did,
        version,
        rev,
        data,
    })
}

enum Step {
    Node(Cid),
    Entry { key: Vec<u8>, value: Cid },
}

struct Entry {
    key: Vec<u8>,
    value: Cid,
    right: Option<Cid>,
}

struct Node {
    left: Option<Cid>,
    entries: Vec<Entry>,
}

fn parse_node(cid: Cid, data: &[u8]) -> Result<Node> {
    let invalid = |reason: String| DecodeError::InvalidNode { cid, reason };

    let value = decode_cbor(data).map_err(invalid)?;
    let left = optional_link(map_get(&value, "l")).map_err(|_| invalid("bad left link".into()))?;

    let items = match map_get(&value, "e") {
        Some(Value::Array(items)) => items,
        _ => return Err(invalid("missing entries".into())),
    };

    let mut entries: Vec<Entry> = Vec::with_capacity(items.len());
    for item in items {
        let prefix = map_get(item, "p")
            .and_then(as_u64)
            .ok_or_else(|| invalid("entry without prefix length".into()))? as usize;
        let suffix = match map_get(item, "k") {
            Some(Value::Bytes(k)) => k,
            _ => return Err(invalid("entry without key".into())),
        };
        let value = map_get(item, "v")
            .and_then(as_link)
            .ok_or_else(|| invalid("entry without value link".into()))?;
        let right = optional_link(map_get(item, "t")).map_err(|_| invalid("bad subtree link".into()))?;

        let previous = entries.last().map(|e| e.key.as_slice()).unwrap_or_default();
        if prefix > previous.len() {
            return Err(invalid(format!(
                "prefix length {} exceeds previous key length {}",
                prefix,
                previous.len()
            )));
        }

        let mut key = previous[..prefix].to_vec();
        key.extend_from_slice(suffix);

        entries.push(Entry { key, value, right });
    }

    Ok(Node { left, entries })
}

fn optional_link(value: Option<&Value>) -> std::result::Result<Option<Cid>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_link(v).map(Some).ok_or(()),
    }
}

pub struct Records<'r, 'a> {
    archive: &'r CarArchive<'a>,
    options: DecodeOptions,
    stack: Vec<Step>,
    /// Nodes already walked. A node reached twice means the links loop.
    expanded: HashSet<Cid>,
    failed: bool,
}

impl Records<'_, '_> {
    fn block(&self, cid: &Cid) -> Result<&Block<'_>> {
        let block = self.archive.require(cid)?;
        if self.options.verify_blocks {
            hash::verify(&block.cid, block.data)?;
        }
        Ok(block)
    }

    fn expand(&mut self, cid: Cid) -> Result<()> {
        if !self.expanded.insert(cid) {
            return Err(DecodeError::InvalidNode {
                cid,
                reason: "cycle".into(),
            });
        }
        let node = parse_node(cid, self.block(&cid)?.data)?;

        for entry in node.entries.into_iter().rev() {
            if let Some(right) = entry.right {
                self.stack.push(Step::Node(right));
            }
            self.stack.push(Step::Entry {
                key: entry.key,
                value: entry.value,
            });
        }
        if let Some(left) = node.left {
            self.stack.push(Step::Node(left));
        }

        Ok(())
    }

    fn record(&self, key: Vec<u8>, value: Cid) -> Result<DecodedRecord> {
        let key = String::from_utf8(key).map_err(|e| DecodeError::InvalidKey {
            key: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })?;
        let Some((collection, rkey)) = key.split_once('/') else {
            return Err(DecodeError::InvalidKey { key: key.clone() });
        };

        let block = self.block(&value)?;

        Ok(DecodedRecord {
            collection: collection.to_owned(),
            key: rkey.to_owned(),
            byte_size: self.options.size_accounting.size_of(block),
            created_at: created_at(block.data),
        })
    }
}

impl Iterator for Records<'_, '_> {
    type Item = Result<DecodedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while let Some(step) = self.stack.pop() {
            let result = match step {
                Step::Node(cid) => match self.expand(cid) {
                    Ok(()) => continue,
                    Err(e) => Err(e),
                },
                Step::Entry { key, value } => self.record(key, value),
            };

            if result.is_err() {
                self.failed = true;
                self.stack.clear();
            }
            return Some(result);
        }

        None
    }
}

/// The record's `createdAt`, when it has one that parses as a timestamp.
pub fn created_at(payload: &[u8]) -> Option<DateTime<Utc>> {
    let value = decode_cbor(payload).ok()?;
    match map_get(&value, "createdAt") {
        Some(Value::Text(text)) => parse_timestamp(text),
        _ => None,
    }
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
