//! Inbound work queues with crash recovery.
//!
//! Work is moved onto a per-level processing queue before it is acted on and
//! the processing queue is cleared only after every durable write of the
//! tick has completed. A crash in between leaves the items in place; the
//! next tick replays them instead of popping new work.

use std::sync::Arc;

use dragonnet_coord::CoordStore;

pub const INCOMING_TXN_KEY: &str = "mq:incoming-txn";
pub const INCOMING_BLOCK_KEY: &str = "mq:incoming-block";
pub const CONTRACT_INVOKE_KEY: &str = "mq:contract-invoke";

pub fn processing_key(level: i64) -> String {
    format!("mq:l{level}:processing")
}

pub struct WorkQueue {
    coord: Arc<CoordStore>,
    level: i64,
}

impl WorkQueue {
    pub fn new(coord: Arc<CoordStore>, level: i64) -> Self {
        Self { coord, level }
    }

    /// Webserver side: admit a transaction for the next L1 block.
    pub fn enqueue_transaction(&self, raw: &str) {
        self.coord.queue_push(INCOMING_TXN_KEY, raw);
    }

    /// Webserver side: enqueue a lower-level block for verification.
    pub fn enqueue_block(&self, raw: &str) {
        self.coord.queue_push(INCOMING_BLOCK_KEY, raw);
    }

    pub fn enqueue_contract_invocation(&self, raw: &str) {
        self.coord.queue_push(CONTRACT_INVOKE_KEY, raw);
    }

    /// L1: everything waiting for the next block, replaying an interrupted
    /// tick first if one exists.
    pub fn pop_transactions(&self) -> Vec<String> {
        let processing = processing_key(self.level);
        let recovered = self.coord.queue_items(&processing);
        if !recovered.is_empty() {
            return recovered;
        }
        while self
            .coord
            .queue_pop_to(INCOMING_TXN_KEY, &processing)
            .is_some()
        {}
        self.coord.queue_items(&processing)
    }

    /// L2+: one inbound block per tick, replaying an interrupted tick first.
    pub fn pop_inbound_block(&self) -> Option<String> {
        let processing = processing_key(self.level);
        if let Some(recovered) = self.coord.queue_items(&processing).into_iter().next() {
            return Some(recovered);
        }
        self.coord.queue_pop_to(INCOMING_BLOCK_KEY, &processing)
    }

    /// Durable writes finished; the tick's work is no longer replayable.
    pub fn clear_processing(&self) {
        self.coord.queue_clear(&processing_key(self.level));
    }

    /// Whether another tick's worth of work is already waiting.
    pub fn has_pending_work(&self) -> bool {
        let key = if self.level == 1 {
            INCOMING_TXN_KEY
        } else {
            INCOMING_BLOCK_KEY
        };
        self.coord.queue_len(key) > 0
    }
}
