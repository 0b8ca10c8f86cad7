//! Block and verification artifacts under the `BLOCK/` prefix.
//!
//! A chain's own blocks live at `BLOCK/<block_id>`. Higher-level receipts
//! about an L1 block are stored beside it at
//! `BLOCK/<l1_block_id>-l<level>-<verifier_chain_id>`, which makes the
//! chain-ids-in-storage listing the broadcast rollback depends on a single
//! prefix scan.

use std::{collections::HashSet, sync::Arc};

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_state::Block;
use serde_json::{json, Value};

use crate::{
    index::BlockIndexer,
    object_store::{get_json_object, put_object_as_json, ObjectStore},
};

pub fn block_key(block_id: &str) -> String {
    format!("BLOCK/{block_id}")
}

pub fn verification_key(l1_block_id: &str, level: i64, chain_id: &str) -> String {
    format!("BLOCK/{l1_block_id}-l{level}-{chain_id}")
}

pub fn verification_prefix(l1_block_id: &str, level: i64) -> String {
    format!("BLOCK/{l1_block_id}-l{level}-")
}

pub struct BlockDao {
    store: Arc<dyn ObjectStore>,
    indexer: Arc<dyn BlockIndexer>,
}

impl BlockDao {
    pub fn new(store: Arc<dyn ObjectStore>, indexer: Arc<dyn BlockIndexer>) -> Self {
        Self { store, indexer }
    }

    pub fn insert_block(&self, block: &Block) -> DcResult<()> {
        put_object_as_json(
            self.store.as_ref(),
            &block_key(block.block_id()),
            &block.export_as_at_rest(),
        )?;
        self.indexer.index_block(block);
        Ok(())
    }

    pub fn get_block(&self, block_id: &str) -> DcResult<Block> {
        Block::new_from_at_rest(self.get_raw_block(block_id)?)
    }

    pub fn get_raw_block(&self, block_id: &str) -> DcResult<Value> {
        get_json_object(self.store.as_ref(), &block_key(block_id))
    }

    /// Store a higher-level receipt about one of our L1 blocks. Returns the
    /// storage key so the caller can queue a notification for it.
    pub fn insert_verification(
        &self,
        l1_block_id: &str,
        level: i64,
        chain_id: &str,
        doc: &Value,
    ) -> DcResult<String> {
        let key = verification_key(l1_block_id, level, chain_id);
        put_object_as_json(self.store.as_ref(), &key, doc)?;
        Ok(key)
    }

    pub fn get_verifications(&self, l1_block_id: &str, level: i64) -> DcResult<Vec<Value>> {
        let prefix = verification_prefix(l1_block_id, level);
        let mut docs = Vec::new();
        for key in self.store.list(&prefix)? {
            docs.push(get_json_object(self.store.as_ref(), &key)?);
        }
        Ok(docs)
    }

    /// The verifier chain ids that actually have an artifact in storage for
    /// this block and level, parsed from the key suffix.
    pub fn verification_chain_ids(
        &self,
        l1_block_id: &str,
        level: i64,
    ) -> DcResult<HashSet<String>> {
        let prefix = verification_prefix(l1_block_id, level);
        Ok(self
            .store
            .list(&prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// The body POSTed to a level-`level` chain asking it to verify the
    /// given L1 block: the block itself for L2, the block plus the receipts
    /// of the level below for L3 and up. A receipt recorded in the
    /// coordination store but missing here surfaces as the storage error the
    /// broadcast rollback counts.
    pub fn get_broadcast_dto(&self, level: i64, l1_block_id: &str) -> DcResult<Value> {
        let block = self.get_raw_block(l1_block_id)?;
        match level {
            2 => Ok(json!({ "version": "1", "l1_block": block })),
            3 => Ok(json!({
                "version": "1",
                "l1_block": block,
                "l2_blocks": self.require_verifications(l1_block_id, 2)?,
            })),
            4 => Ok(json!({
                "version": "1",
                "l1_block": block,
                "l3_blocks": self.require_verifications(l1_block_id, 3)?,
            })),
            5 => Ok(json!({
                "version": "1",
                "l1_block": block,
                "l4_blocks": self.require_verifications(l1_block_id, 4)?,
            })),
            other => Err(DragonNetError::InvalidNodeLevel(other)),
        }
    }

    fn require_verifications(&self, l1_block_id: &str, level: i64) -> DcResult<Vec<Value>> {
        let docs = self.get_verifications(l1_block_id, level)?;
        if docs.is_empty() {
            return Err(DragonNetError::storage(format!(
                "no level {level} verifications in storage for block {l1_block_id}"
            )));
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use dragonnet_common::config::ProofScheme;
    use dragonnet_state::{block::BlockProof, BlockHeader, L1Block};

    use super::*;
    use crate::{memory::MemoryStore, MemoryIndexer};

    fn dao() -> BlockDao {
        BlockDao::new(Arc::new(MemoryStore::new()), Arc::new(MemoryIndexer::new()))
    }

    fn l1_block(id: &str) -> Block {
        Block::L1(L1Block {
            header: BlockHeader {
                level: 1,
                dc_id: "us".to_string(),
                block_id: id.to_string(),
                timestamp: "1000".to_string(),
                prev_proof: String::new(),
            },
            transactions: vec![],
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: "cA==".to_string(),
                nonce: None,
            },
        })
    }

    #[test]
    fn insert_and_read_back() {
        let dao = dao();
        dao.insert_block(&l1_block("77")).unwrap();
        assert_eq!(dao.get_block("77").unwrap().block_id(), "77");
    }

    #[test]
    fn verification_chain_ids_parse_key_suffixes() {
        let dao = dao();
        dao.insert_verification("77", 2, "chain-a", &json!({"v": 1}))
            .unwrap();
        dao.insert_verification("77", 2, "chain-b", &json!({"v": 2}))
            .unwrap();
        dao.insert_verification("77", 3, "chain-c", &json!({"v": 3}))
            .unwrap();

        let ids = dao.verification_chain_ids("77", 2).unwrap();
        assert_eq!(
            ids,
            ["chain-a", "chain-b"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn broadcast_dto_requires_lower_level_artifacts() {
        let dao = dao();
        dao.insert_block(&l1_block("77")).unwrap();

        // L2 dto needs only the block.
        assert!(dao.get_broadcast_dto(2, "77").is_ok());

        // L3 dto needs stored L2 receipts.
        assert!(matches!(
            dao.get_broadcast_dto(3, "77"),
            Err(DragonNetError::Storage(_))
        ));
        dao.insert_verification("77", 2, "chain-a", &json!({"v": 1}))
            .unwrap();
        let dto = dao.get_broadcast_dto(3, "77").unwrap();
        assert_eq!(dto["l2_blocks"].as_array().unwrap().len(), 1);
    }
}
