//! Content identifiers.
//!
//! A chorus CID is a CIDv1 over the raw codec with a SHA2-256 multihash,
//! rendered base32-lower. Equal byte streams always produce equal CIDs.
//! Legacy identifiers (46 chars, `Qm` prefix) are recognized on read but
//! never produced.

use std::io::Read;

use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Multicodec code for SHA2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Multicodec code for raw binary payloads.
const RAW_CODEC: u64 = 0x55;

fn wrap_digest(digest: &[u8]) -> Multihash<64> {
    Multihash::wrap(SHA2_256_CODE, digest).expect("sha-256 digest is 32 bytes")
}

/// Compute the CID of an in-memory byte slice.
pub fn compute_cid(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    Cid::new_v1(RAW_CODEC, wrap_digest(&digest)).to_string()
}

/// Compute the CID of a reader by streaming it through the hasher.
pub fn compute_cid_from_reader<R: Read>(mut reader: R) -> Result<String, AppError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(Cid::new_v1(RAW_CODEC, wrap_digest(&digest)).to_string())
}

/// Whether a string parses as any valid CID.
pub fn is_valid_cid(s: &str) -> bool {
    s.parse::<Cid>().is_ok()
}

/// Legacy identifiers from the v0 network: length 46, `Qm` prefix.
pub fn is_legacy_cid(s: &str) -> bool {
    s.len() == 46 && s.starts_with("Qm")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_is_deterministic_and_base32() {
        let a = compute_cid(b"hello chorus");
        let b = compute_cid(b"hello chorus");
        assert_eq!(a, b);
        assert!(a.starts_with('b'), "CIDv1 base32 starts with 'b': {a}");
        assert!(is_valid_cid(&a));
    }

    #[test]
    fn different_bytes_different_cid() {
        assert_ne!(compute_cid(b"a"), compute_cid(b"b"));
    }

    #[test]
    fn reader_matches_slice() {
        let data = vec![42u8; 200_000];
        let from_slice = compute_cid(&data);
        let from_reader = compute_cid_from_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(from_slice, from_reader);
    }

    #[test]
    fn legacy_detection() {
        assert!(is_legacy_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(!is_legacy_cid("Qmshort"));
        assert!(!is_legacy_cid(&compute_cid(b"x")));
    }
}
