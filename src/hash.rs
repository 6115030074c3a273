use cid::Cid;
use log::debug;
use multihash::Multihash;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, Result};

/// Multicodec for DAG-CBOR blocks.
pub const DAG_CBOR: u64 = 0x71;

/// Multihash codes
pub const SHA2_256: u64 = 0x12;
pub const BLAKE3: u64 = 0x1e;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn code(self) -> u64 {
        match self {
            HashAlgorithm::Sha256 => SHA2_256,
            HashAlgorithm::Blake3 => BLAKE3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            SHA2_256 => Some(HashAlgorithm::Sha256),
            BLAKE3 => Some(HashAlgorithm::Blake3),
            _ => None,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }
}

/// CIDv1 addressing `data` under `codec`.
pub fn cid_for(codec: u64, data: &[u8], alg: HashAlgorithm) -> Cid {
    let digest = alg.digest(data);
    // Both digests are 32 bytes, well under the 64 byte multihash capacity.
    let mh = Multihash::<64>::wrap(alg.code(), &digest).expect("32 byte digest fits in Multihash<64>");
    Cid::new_v1(codec, mh)
}

/// Re-hash a block and check it against the digest its CID claims.
pub fn verify(cid: &Cid, data: &[u8]) -> Result<()> {
    let mh = cid.hash();
    let alg = HashAlgorithm::from_code(mh.code()).ok_or(DecodeError::UnsupportedHash {
        cid: *cid,
        code: mh.code(),
    })?;

    let actual = alg.digest(data);
    if actual != mh.digest() {
        return Err(DecodeError::DigestMismatch {
            cid: *cid,
            expected: hex::encode(mh.digest()),
            actual: hex::encode(actual),
        });
    }

    debug!("cid: {}, size: {}, verified", cid, data.len());

    Ok(())
}
