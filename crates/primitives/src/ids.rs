//! Identifier conventions: chain ids are opaque strings handed out at
//! registration, block ids are derived from wall-clock time so that every
//! level-1 chain produces at most one block per interval.

use uuid::Uuid;

/// Offset subtracted from unix time before block id derivation.
pub const EPOCH_OFFSET: u64 = 1_432_238_220;

/// Seconds covered by one level-1 block.
pub const BLOCK_INTERVAL_SECS: u64 = 5;

/// The block id owning the given unix timestamp.
pub fn block_id_at(unix_secs: u64) -> u64 {
    (unix_secs - EPOCH_OFFSET) / BLOCK_INTERVAL_SECS
}

/// Fresh v4 transaction id.
pub fn new_txn_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse a stringified block id. Block ids travel as strings in DTOs but are
/// ordered numerically.
pub fn parse_block_id(s: &str) -> Option<u64> {
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_advances_every_interval() {
        let base = EPOCH_OFFSET + 1000;
        assert_eq!(block_id_at(base), 200);
        assert_eq!(block_id_at(base + 4), 200);
        assert_eq!(block_id_at(base + 5), 201);
    }

    #[test]
    fn txn_ids_are_uuids() {
        let id = new_txn_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
