//! Assemble a repository archive from records.
//!
//! The output is a well-formed CAR v1: header, commit block, a single key-value node
//! holding every record key (prefix compressed, sorted), then the record blocks. Useful for
//! fixtures and for handing synthetic repositories to anything that reads real ones.

use std::collections::BTreeMap;

use anyhow::Result;
use ciborium::value::Value;
use cid::Cid;

use crate::{
    car::{encode_varint, CID_TAG},
    hash::{cid_for, HashAlgorithm, DAG_CBOR},
};

pub struct RepoBuilder {
    did: String,
    rev: Option<String>,
    hash: HashAlgorithm,
    records: BTreeMap<String, Value>,
}

impl RepoBuilder {
    pub fn new(did: &str) -> Self {
        Self {
            did: did.to_owned(),
            rev: None,
            hash: HashAlgorithm::default(),
            records: BTreeMap::new(),
        }
    }

    pub fn rev(mut self, rev: &str) -> Self {
        self.rev = Some(rev.to_owned());
        self
    }

    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Adds a record, replacing any earlier record with the same collection and key.
    pub fn record(mut self, collection: &str, key: &str, record: Value) -> Self {
        self.records.insert(format!("{}/{}", collection, key), record);
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let mut record_blocks = Vec::with_capacity(self.records.len());
        let mut entries = Vec::with_capacity(self.records.len());
        let mut previous: &[u8] = &[];

        for (key, record) in &self.records {
            let (cid, data) = encode_block(record, self.hash)?;
            let key = key.as_bytes();
            let prefix = common_prefix(previous, key);

            entries.push(text_map(vec![
                ("k", Value::Bytes(key[prefix..].to_vec())),
                ("p", Value::Integer((prefix as u64).into())),
                ("t", Value::Null),
                ("v", link(cid)),
            ]));
            record_blocks.push((cid, data));
            previous = key;
        }

        let node = text_map(vec![("e", Value::Array(entries)), ("l", Value::Null)]);
        let (node_cid, node_data) = encode_block(&node, self.hash)?;

        let commit = text_map(vec![
            ("did", Value::Text(self.did.clone())),
            ("rev", self.rev.clone().map(Value::Text).unwrap_or(Value::Null)),
            ("sig", Value::Bytes(vec![0; 64])),
            ("data", link(node_cid)),
            ("prev", Value::Null),
            ("version", Value::Integer(3.into())),
        ]);
        let (commit_cid, commit_data) = encode_block(&commit, self.hash)?;

        let mut blocks = vec![(commit_cid, commit_data), (node_cid, node_data)];
        blocks.extend(record_blocks);

        write_car(commit_cid, &blocks)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Encode `value` as DAG-CBOR and address it.
pub fn encode_block(value: &Value, hash: HashAlgorithm) -> Result<(Cid, Vec<u8>)> {
    let mut data = vec![];
    ciborium::ser::into_writer(value, &mut data)?;
    Ok((cid_for(DAG_CBOR, &data, hash), data))
}

/// Frame a header naming `root` and the given blocks, in order.
pub fn write_car(root: Cid, blocks: &[(Cid, Vec<u8>)]) -> Result<Vec<u8>> {
    let header = text_map(vec![
        ("roots", Value::Array(vec![link(root)])),
        ("version", Value::Integer(1.into())),
    ]);
    let mut header_bytes = vec![];
    ciborium::ser::into_writer(&header, &mut header_bytes)?;

    let mut out = vec![];
    encode_varint(header_bytes.len() as u64, &mut out);
    out.extend_from_slice(&header_bytes);

    for (cid, data) in blocks {
        let cid_bytes = cid.to_bytes();
        encode_varint((cid_bytes.len() + data.len()) as u64, &mut out);
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(data);
    }

    Ok(out)
}

/// DAG-CBOR link to `cid`.
pub fn link(cid: Cid) -> Value {
    let mut bytes = vec![0];
    bytes.extend_from_slice(&cid.to_bytes());
    Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)))
}

/// CBOR map with text keys, in the given order.
pub fn text_map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_owned()), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{car::CarArchive, repo::RepoReader};

    #[test]
    fn empty_repository() {
        let car = RepoBuilder::new("did:web:example.com").build().unwrap();

        let reader = RepoReader::from_bytes(&car).unwrap();
        assert_eq!(reader.commit().did, "did:web:example.com");
        assert_eq!(reader.commit().rev, None);
        assert_eq!(reader.records().count(), 0);
        // commit and the empty node
        assert_eq!(reader.archive().len(), 2);
    }

    #[test]
    fn commit_block_comes_first() {
        let car = RepoBuilder::new("did:web:example.com")
            .record("app.bsky.feed.post", "1", Value::Null)
            .build()
            .unwrap();

        let archive = CarArchive::parse(&car).unwrap();
        assert_eq!(archive.first_block(), Some(archive.root()));
    }

    #[test]
    fn keys_are_prefix_compressed() {
        let car = RepoBuilder::new("did:web:example.com")
            .record("app.bsky.feed.post", "aaa", Value::Null)
            .record("app.bsky.feed.post", "aab", Value::Bool(true))
            .build()
            .unwrap();

        let reader = RepoReader::from_bytes(&car).unwrap();
        let node = reader.archive().require(&reader.commit().data).unwrap();
        let value = crate::car::decode_cbor(node.data).unwrap();

        let entries = match crate::car::map_get(&value, "e") {
            Some(Value::Array(entries)) => entries.clone(),
            other => panic!("unexpected entries {:?}", other),
        };
        assert_eq!(crate::car::map_get(&entries[1], "p").and_then(crate::car::as_u64), Some(21));
        assert_eq!(
            crate::car::map_get(&entries[1], "k"),
            Some(&Value::Bytes(b"b".to_vec()))
        );
    }

    #[test]
    fn blake3_addressed_archive_verifies() {
        let car = RepoBuilder::new("did:web:example.com")
            .hash(HashAlgorithm::Blake3)
            .record("app.bsky.feed.post", "1", Value::Text("x".into()))
            .build()
            .unwrap();

        let reader = RepoReader::with_options(
            &car,
            crate::repo::DecodeOptions {
                verify_blocks: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(reader.records().filter(|r| r.is_ok()).count(), 1);
    }
}
