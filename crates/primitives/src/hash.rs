//! Wrapper around the native content hash used for blocks and transactions.

use sha2::{Digest, Sha256};

/// Direct untagged SHA-256.
pub fn raw(buf: &[u8]) -> [u8; 32] {
    Sha256::digest(buf).into()
}

/// SHA-256 of `buf`, base64-encoded the way hashes appear in at-rest DTOs.
pub fn raw_b64(buf: &[u8]) -> String {
    crate::encode::b64(&raw(buf))
}

/// Hash of two concatenated inputs, used for chained digests.
pub fn chained(first: &[u8], second: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_matches_manual_concat() {
        let mut joined = b"abc".to_vec();
        joined.extend_from_slice(b"def");
        assert_eq!(chained(b"abc", b"def"), raw(&joined));
    }
}
