//! Durable anchor-engine state under the `BROADCAST/` storage prefix.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_storage::{get_json_object, put_object_as_json, ObjectStore};
use serde_json::{json, Value};

pub const LAST_BLOCK_KEY: &str = "BROADCAST/LAST_BLOCK";
pub const LAST_CONFIRMED_BLOCK_KEY: &str = "BROADCAST/LAST_CONFIRMED_BLOCK";
pub const LAST_BROADCAST_TIME_KEY: &str = "BROADCAST/LAST_BROADCAST_TIME";
pub const LAST_WATCH_TIME_KEY: &str = "BROADCAST/LAST_WATCH_TIME";
pub const CURRENT_FUNDS_KEY: &str = "BROADCAST/CURRENT_FUNDS";

pub fn to_broadcast_prefix(l5_block_id: u64) -> String {
    format!("BROADCAST/TO_BROADCAST/{l5_block_id}/")
}

/// Storage accessors for the anchor pipeline's bookkeeping values.
pub struct AnchorState {
    store: Arc<dyn ObjectStore>,
}

impl AnchorState {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn get_u64(&self, key: &str) -> DcResult<Option<u64>> {
        if !self.store.exists(key)? {
            return Ok(None);
        }
        let bytes = self.store.get(key)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| DragonNetError::storage(format!("{key} holds non-utf8 bytes")))?;
        text.trim()
            .parse()
            .map(Some)
            .map_err(|e| DragonNetError::storage(format!("{key} holds a non-integer: {e}")))
    }

    fn put_u64(&self, key: &str, value: u64) -> DcResult<()> {
        self.store.put(key, value.to_string().as_bytes())
    }

    /// Most recently assembled L5 block id; zero on a chain that has never
    /// broadcast. A missing counter alongside existing blocks means the
    /// chain's state was corrupted, not freshly created.
    pub fn last_block_number(&self) -> DcResult<u64> {
        match self.get_u64(LAST_BLOCK_KEY)? {
            Some(n) => Ok(n),
            None => {
                if !self.store.list("BLOCK/")?.is_empty() {
                    return Err(DragonNetError::SanityCheck(
                        "blocks exist but the last-block counter is missing".to_string(),
                    ));
                }
                Ok(0)
            }
        }
    }

    pub fn set_last_block_number(&self, n: u64) -> DcResult<()> {
        self.put_u64(LAST_BLOCK_KEY, n)
    }

    /// `(block_id, proof)` of the most recent externally confirmed L5
    /// block; `(0, "")` before any confirmation.
    pub fn last_confirmed_block(&self) -> DcResult<(u64, String)> {
        if !self.store.exists(LAST_CONFIRMED_BLOCK_KEY)? {
            return Ok((0, String::new()));
        }
        let doc = get_json_object(self.store.as_ref(), LAST_CONFIRMED_BLOCK_KEY)?;
        let block_id = doc
            .get("block_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                DragonNetError::storage("last-confirmed record missing block_id".to_string())
            })?;
        let proof = doc
            .get("proof")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((block_id, proof))
    }

    pub fn set_last_confirmed_block(&self, block_id: &str, proof: &str) -> DcResult<()> {
        put_object_as_json(
            self.store.as_ref(),
            LAST_CONFIRMED_BLOCK_KEY,
            &json!({ "block_id": block_id, "proof": proof }),
        )
    }

    pub fn last_broadcast_time(&self) -> DcResult<Option<u64>> {
        self.get_u64(LAST_BROADCAST_TIME_KEY)
    }

    pub fn set_last_broadcast_time(&self, at: u64) -> DcResult<()> {
        self.put_u64(LAST_BROADCAST_TIME_KEY, at)
    }

    pub fn last_watch_time(&self) -> DcResult<Option<u64>> {
        self.get_u64(LAST_WATCH_TIME_KEY)
    }

    pub fn set_last_watch_time(&self, at: u64) -> DcResult<()> {
        self.put_u64(LAST_WATCH_TIME_KEY, at)
    }

    pub fn current_funds(&self) -> DcResult<u128> {
        if !self.store.exists(CURRENT_FUNDS_KEY)? {
            return Ok(0);
        }
        let bytes = self.store.get(CURRENT_FUNDS_KEY)?;
        String::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| {
                DragonNetError::storage("current-funds record is not an integer".to_string())
            })
    }

    pub fn set_current_funds(&self, funds: u128) -> DcResult<()> {
        self.store
            .put(CURRENT_FUNDS_KEY, funds.to_string().as_bytes())
    }

    /// Whether any L4 receipts are staged for the given L5 block.
    pub fn has_backlog(&self, l5_block_id: u64) -> DcResult<bool> {
        Ok(!self.store.list(&to_broadcast_prefix(l5_block_id))?.is_empty())
    }
}
