//! Pieces shared by the per-level actions: previous-block chaining with a
//! storage sanity check, and parsing of inbound broadcast DTOs.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_coord::CoordStore;
use dragonnet_state::Block;
use dragonnet_storage::dao::BlockDao;
use serde_json::Value;

fn last_block_key(level: i64) -> String {
    format!("l{level}:last-block")
}

/// Chain-local bookkeeping of the previously produced block, so each new
/// block can reference `prev_proof` and take the next id.
pub struct BlockChainer {
    coord: Arc<CoordStore>,
    blocks: Arc<BlockDao>,
    level: i64,
}

impl BlockChainer {
    pub fn new(coord: Arc<CoordStore>, blocks: Arc<BlockDao>, level: i64) -> Self {
        Self {
            coord,
            blocks,
            level,
        }
    }

    /// `(next_block_id, prev_proof)` for the next block at this level.
    pub fn next_block_info(&self) -> DcResult<(u64, String)> {
        Ok(match self.last_block()? {
            Some((block_id, proof)) => (block_id + 1, proof),
            None => (1, String::new()),
        })
    }

    /// The previously produced block's id and proof, if any. The recorded
    /// block must still verify against storage; a mismatch means the
    /// coordination store and storage diverged.
    pub fn last_block(&self) -> DcResult<Option<(u64, String)>> {
        let Some(raw) = self.coord.get(&last_block_key(self.level)) else {
            return Ok(None);
        };
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| DragonNetError::SanityCheck(format!("corrupt last-block record: {e}")))?;
        let block_id = parsed
            .get("block_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                DragonNetError::SanityCheck("last-block record missing block_id".to_string())
            })?;
        let proof = parsed
            .get("proof")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let stored = self.blocks.get_block(&block_id.to_string())?;
        if stored.proof() != proof {
            return Err(DragonNetError::SanityCheck(format!(
                "stored proof for block {block_id} does not match last-block record"
            )));
        }
        Ok(Some((block_id, proof)))
    }

    pub fn record_last_block(&self, block_id: &str, proof: &str) {
        let record = serde_json::json!({ "block_id": block_id, "proof": proof });
        self.coord
            .set(&last_block_key(self.level), &record.to_string());
    }
}

/// Pull the L1 block out of an inbound broadcast DTO.
pub fn l1_block_from_dto(dto: &Value) -> DcResult<(Block, Value)> {
    let l1_doc = dto
        .get("l1_block")
        .cloned()
        .ok_or_else(|| DragonNetError::Validation("broadcast dto missing l1_block".to_string()))?;
    let block = Block::new_from_at_rest(l1_doc.clone())?;
    if block.level() != 1 {
        return Err(DragonNetError::Validation(format!(
            "broadcast dto carried a level {} block where an L1 block was expected",
            block.level()
        )));
    }
    Ok((block, l1_doc))
}

/// The lower-level verification documents of an inbound broadcast DTO.
pub fn lower_blocks_from_dto(dto: &Value, field: &str) -> DcResult<Vec<Value>> {
    dto.get(field)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| DragonNetError::Validation(format!("broadcast dto missing {field}")))
}

#[cfg(test)]
mod tests {
    use dragonnet_common::config::ProofScheme;
    use dragonnet_state::{block::BlockProof, BlockHeader, L1Block};
    use dragonnet_storage::{MemoryIndexer, MemoryStore};

    use super::*;

    fn chainer() -> BlockChainer {
        let blocks = Arc::new(BlockDao::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryIndexer::new()),
        ));
        BlockChainer::new(Arc::new(CoordStore::new()), blocks, 2)
    }

    fn block(id: &str, proof: &str) -> Block {
        Block::L1(L1Block {
            header: BlockHeader {
                level: 1,
                dc_id: "chain".to_string(),
                block_id: id.to_string(),
                timestamp: "1".to_string(),
                prev_proof: String::new(),
            },
            transactions: vec![],
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: proof.to_string(),
                nonce: None,
            },
        })
    }

    #[test]
    fn fresh_chain_starts_at_block_one() {
        assert_eq!(chainer().next_block_info().unwrap(), (1, String::new()));
    }

    #[test]
    fn next_info_chains_from_recorded_block() {
        let chainer = chainer();
        chainer.blocks.insert_block(&block("7", "proof-7")).unwrap();
        chainer.record_last_block("7", "proof-7");

        assert_eq!(
            chainer.next_block_info().unwrap(),
            (8, "proof-7".to_string())
        );
    }

    #[test]
    fn divergent_storage_fails_the_sanity_check() {
        let chainer = chainer();
        chainer.blocks.insert_block(&block("7", "proof-7")).unwrap();
        chainer.record_last_block("7", "some-other-proof");

        assert!(matches!(
            chainer.next_block_info(),
            Err(DragonNetError::SanityCheck(_))
        ));
    }
}
