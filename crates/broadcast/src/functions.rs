//! Verification-state bookkeeping for the broadcast system.
//!
//! All state lives in the coordination store:
//! - `broadcast:in-flight` : sorted set of block id scored by next-check time
//! - `broadcast:block:<id>:state` : level currently accepting receipts (2-5)
//! - `broadcast:block:<id>:l<L>` : chain ids that returned a level-L receipt
//! - `broadcast:block:<id>:errors` : storage divergence counter
//! - `broadcast:claimcheck` : block id to claim-check json
//! - `broadcast:notifications` : storage keys pending notification fanout
//!
//! The coordination store can come to misrepresent what is actually durable:
//! a receipt recorded here whose artifact never landed in the object store.
//! After [`FAULT_TOLERATION`] read failures at one level the block is rolled
//! back a level and the phantom receipts dropped.

use std::{collections::HashSet, sync::Arc};

use dragonnet_common::{
    config::VerificationRequirements,
    errors::{DcResult, DragonNetError},
};
use dragonnet_coord::CoordStore;
use dragonnet_matchmaking::ClaimCheck;
use dragonnet_primitives::time;
use dragonnet_storage::dao::BlockDao;
use tracing::*;

pub const IN_FLIGHT_KEY: &str = "broadcast:in-flight";
pub const BROADCAST_BLOCK_PREFIX: &str = "broadcast:block";
pub const CLAIM_CHECK_KEY: &str = "broadcast:claimcheck";
pub const NOTIFICATIONS_KEY: &str = "broadcast:notifications";

/// Storage read failures tolerated at one level before rolling back.
pub const FAULT_TOLERATION: u64 = 10;

pub fn state_key(block_id: &str) -> String {
    format!("{BROADCAST_BLOCK_PREFIX}:{block_id}:state")
}

pub fn verifications_key(block_id: &str, level: i64) -> String {
    format!("{BROADCAST_BLOCK_PREFIX}:{block_id}:l{level}")
}

pub fn storage_error_key(block_id: &str) -> String {
    format!("{BROADCAST_BLOCK_PREFIX}:{block_id}:errors")
}

pub struct BroadcastFunctions {
    coord: Arc<CoordStore>,
    blocks: Arc<BlockDao>,
    requirements: VerificationRequirements,
}

impl BroadcastFunctions {
    pub fn new(
        coord: Arc<CoordStore>,
        blocks: Arc<BlockDao>,
        requirements: VerificationRequirements,
    ) -> Self {
        Self {
            coord,
            blocks,
            requirements,
        }
    }

    pub fn requirements(&self) -> &VerificationRequirements {
        &self.requirements
    }

    /// Start tracking a freshly finalized L1 block: accepting level 2,
    /// scheduled for an immediate broadcast pass.
    pub fn enqueue_block(&self, block_id: &str) -> DcResult<()> {
        if self.current_level(block_id).is_some() {
            return Err(DragonNetError::BadState(format!(
                "block {block_id} is already in the broadcast system"
            )));
        }
        let mut p = self.coord.pipeline();
        p.set(&state_key(block_id), "2");
        p.zadd(IN_FLIGHT_KEY, block_id, 0);
        Ok(())
    }

    /// The level this block currently accepts receipts from.
    pub fn current_level(&self, block_id: &str) -> Option<i64> {
        self.coord
            .get(&state_key(block_id))
            .and_then(|s| s.parse().ok())
    }

    pub fn is_accepting_from(&self, block_id: &str, level: i64) -> bool {
        self.current_level(block_id) == Some(level)
    }

    pub fn schedule(&self, block_id: &str, at: u64) {
        self.coord.zadd(IN_FLIGHT_KEY, block_id, at);
    }

    /// Blocks due for a broadcast pass right now, oldest first, with their
    /// schedule scores. Limited to 1000 per pass.
    pub fn blocks_to_process(&self) -> Vec<(String, u64)> {
        self.coord
            .zrange_by_score(IN_FLIGHT_KEY, 0, time::unix_now(), 1000)
    }

    pub fn verifications(&self, block_id: &str, level: i64) -> HashSet<String> {
        self.coord.smembers(&verifications_key(block_id, level))
    }

    /// Record a level-`level` receipt from `chain_id`. Promotes the block
    /// once quorum is met; at level 5 quorum the block leaves the broadcast
    /// system entirely. Idempotent on the receipt set.
    pub fn record_receipt(&self, block_id: &str, level: i64, chain_id: &str) -> DcResult<()> {
        let accepting = self.current_level(block_id).unwrap_or(-1);
        if accepting != level {
            return Err(DragonNetError::NotAcceptingVerifications {
                block_id: block_id.to_string(),
                accepting,
                got: level,
            });
        }

        let received = self
            .coord
            .sadd_card(&verifications_key(block_id, level), chain_id);
        if received >= self.requirements.needed(level) {
            if level >= 5 {
                self.remove(block_id);
            } else {
                self.promote(block_id, level + 1);
            }
        }
        Ok(())
    }

    /// Advance a block to the next accepting level and schedule it for an
    /// immediate broadcast pass.
    pub fn promote(&self, block_id: &str, next_level: i64) {
        info!(%block_id, %next_level, "promoting block");
        let mut p = self.coord.pipeline();
        p.del(&storage_error_key(block_id));
        p.set(&state_key(block_id), &next_level.to_string());
        p.zadd(IN_FLIGHT_KEY, block_id, 0);
    }

    /// Drop every trace of a block from the broadcast system.
    pub fn remove(&self, block_id: &str) {
        info!(%block_id, "removing block from the broadcast system");
        let mut p = self.coord.pipeline();
        p.zrem(IN_FLIGHT_KEY, block_id);
        p.del(&state_key(block_id));
        p.del(&storage_error_key(block_id));
        for level in 2..=5 {
            p.del(&verifications_key(block_id, level));
        }
        p.hdel(CLAIM_CHECK_KEY, block_id);
    }

    /// Count one coordination/storage divergence for `block_id` at its
    /// current level. Once the count reaches [`FAULT_TOLERATION`] the block
    /// is rolled back one level: receipts with no storage artifact are
    /// dropped and the error counter reset. Below level 3 there is nothing
    /// to roll back to.
    pub fn increment_storage_error(&self, block_id: &str, current_level: i64) -> DcResult<()> {
        if current_level <= 2 {
            return Ok(());
        }
        let error_key = storage_error_key(block_id);
        let count = self
            .coord
            .get(&error_key)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        if count < FAULT_TOLERATION {
            self.coord.set(&error_key, &count.to_string());
            return Ok(());
        }

        let previous_level = current_level - 1;
        warn!(%block_id, %current_level, "fault toleration exceeded, rolling back a level");

        let good = self
            .blocks
            .verification_chain_ids(block_id, previous_level)?;
        let recorded_key = verifications_key(block_id, previous_level);
        let recorded = self.coord.smembers(&recorded_key);

        let mut p = self.coord.pipeline();
        for phantom in recorded.difference(&good) {
            p.srem(&recorded_key, phantom);
        }
        p.del(&error_key);
        p.set(&state_key(block_id), &previous_level.to_string());
        Ok(())
    }

    // --- claim-check cache ---

    pub fn cached_claim(&self, block_id: &str) -> Option<ClaimCheck> {
        let raw = self.coord.hget(CLAIM_CHECK_KEY, block_id)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn cache_claim(&self, block_id: &str, claim: &ClaimCheck) {
        if let Ok(raw) = serde_json::to_string(claim) {
            self.coord.hset(CLAIM_CHECK_KEY, block_id, &raw);
        }
    }

    // --- notifications ---

    /// Queue a stored verification for the notification fanout worker.
    pub fn queue_notification(&self, storage_key: &str) {
        self.coord.sadd(NOTIFICATIONS_KEY, storage_key);
    }

    pub fn pop_notification(&self) -> Option<String> {
        self.coord.spop(NOTIFICATIONS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use dragonnet_storage::{MemoryIndexer, MemoryStore};
    use serde_json::json;

    use super::*;

    fn requirements() -> VerificationRequirements {
        VerificationRequirements {
            l2: 2,
            l3: 3,
            l4: 4,
            l5: 3,
        }
    }

    fn setup() -> (Arc<CoordStore>, Arc<BlockDao>, BroadcastFunctions) {
        let coord = Arc::new(CoordStore::new());
        let blocks = Arc::new(BlockDao::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryIndexer::new()),
        ));
        let functions = BroadcastFunctions::new(coord.clone(), blocks.clone(), requirements());
        (coord, blocks, functions)
    }

    #[test]
    fn enqueue_tracks_once() {
        let (coord, _, functions) = setup();
        functions.enqueue_block("b").unwrap();
        assert_eq!(functions.current_level("b"), Some(2));
        assert_eq!(coord.zscore(IN_FLIGHT_KEY, "b"), Some(0));

        assert!(matches!(
            functions.enqueue_block("b"),
            Err(DragonNetError::BadState(_))
        ));
    }

    #[test]
    fn quorum_promotes_and_reschedules_immediately() {
        let (coord, _, functions) = setup();
        functions.enqueue_block("b").unwrap();
        functions.schedule("b", 9999);

        functions.record_receipt("b", 2, "c1").unwrap();
        assert_eq!(functions.current_level("b"), Some(2));

        functions.record_receipt("b", 2, "c2").unwrap();
        assert_eq!(functions.current_level("b"), Some(3));
        assert_eq!(coord.zscore(IN_FLIGHT_KEY, "b"), Some(0));
    }

    #[test]
    fn receipts_are_idempotent_per_chain() {
        let (_, _, functions) = setup();
        functions.enqueue_block("b").unwrap();

        functions.record_receipt("b", 2, "c1").unwrap();
        functions.record_receipt("b", 2, "c1").unwrap();
        assert_eq!(functions.current_level("b"), Some(2));
        assert_eq!(functions.verifications("b", 2).len(), 1);
    }

    #[test]
    fn wrong_level_receipt_is_rejected() {
        let (_, _, functions) = setup();
        functions.enqueue_block("b").unwrap();

        let err = functions.record_receipt("b", 3, "c1").unwrap_err();
        assert!(matches!(
            err,
            DragonNetError::NotAcceptingVerifications { accepting: 2, got: 3, .. }
        ));
    }

    #[test]
    fn l5_quorum_removes_the_block() {
        let (coord, _, functions) = setup();
        functions.enqueue_block("b").unwrap();
        coord.set(&state_key("b"), "5");

        for chain in ["c1", "c2", "c3"] {
            functions.record_receipt("b", 5, chain).unwrap();
        }

        assert_eq!(functions.current_level("b"), None);
        assert_eq!(coord.zscore(IN_FLIGHT_KEY, "b"), None);
        for level in 2..=5 {
            assert_eq!(coord.scard(&verifications_key("b", level)), 0);
        }
        assert_eq!(coord.hget(CLAIM_CHECK_KEY, "b"), None);
    }

    #[test]
    fn storage_errors_roll_back_after_fault_toleration() {
        let (coord, blocks, functions) = setup();
        functions.enqueue_block("b").unwrap();
        coord.set(&state_key("b"), "3");

        // Two receipts recorded but only one artifact actually in storage.
        coord.sadd(&verifications_key("b", 2), "c1");
        coord.sadd(&verifications_key("b", 2), "c2");
        blocks
            .insert_verification("b", 2, "c1", &json!({"v": 1}))
            .unwrap();

        for _ in 0..9 {
            functions.increment_storage_error("b", 3).unwrap();
        }
        assert_eq!(functions.current_level("b"), Some(3));
        assert_eq!(coord.get(&storage_error_key("b")).as_deref(), Some("9"));

        functions.increment_storage_error("b", 3).unwrap();
        assert_eq!(functions.current_level("b"), Some(2));
        assert_eq!(coord.get(&storage_error_key("b")), None);
        assert_eq!(
            functions.verifications("b", 2),
            ["c1".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn storage_errors_below_level_three_are_ignored() {
        let (coord, _, functions) = setup();
        functions.enqueue_block("b").unwrap();
        for _ in 0..20 {
            functions.increment_storage_error("b", 2).unwrap();
        }
        assert_eq!(coord.get(&storage_error_key("b")), None);
        assert_eq!(functions.current_level("b"), Some(2));
    }
}
