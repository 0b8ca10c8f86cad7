//! Level 4: judge the L3 verifications of one L1 block and notarize the
//! verdicts upward.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_keys::ChainKeys;
use dragonnet_matchmaking::MatchmakingClient;
use dragonnet_primitives::time;
use dragonnet_state::{
    block::BlockProof, dto, Block, BlockHeader, L3Block, L3Validation, L4Block,
};
use dragonnet_storage::dao::BlockDao;
use serde_json::Value;
use tracing::*;

use crate::{
    dispatch::ReceiptDispatcher,
    queue::WorkQueue,
    runner::LevelActions,
    shared::{l1_block_from_dto, lower_blocks_from_dto, BlockChainer},
};

pub struct L4Actions {
    own_id: String,
    queue: WorkQueue,
    chainer: BlockChainer,
    blocks: Arc<BlockDao>,
    keys: Arc<ChainKeys>,
    matchmaking: Arc<dyn MatchmakingClient>,
    dispatcher: ReceiptDispatcher,
    pow_difficulty: u32,
}

impl L4Actions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_id: String,
        queue: WorkQueue,
        chainer: BlockChainer,
        blocks: Arc<BlockDao>,
        keys: Arc<ChainKeys>,
        matchmaking: Arc<dyn MatchmakingClient>,
        dispatcher: ReceiptDispatcher,
        pow_difficulty: u32,
    ) -> Self {
        Self {
            own_id,
            queue,
            chainer,
            blocks,
            keys,
            matchmaking,
            dispatcher,
            pow_difficulty,
        }
    }

    /// One verdict per distinct L3 block. Duplicates (same chain, block and
    /// proof) collapse to a single entry.
    async fn judge_l3_blocks(&self, docs: &[Value]) -> Vec<L3Validation> {
        let mut seen = HashSet::new();
        let mut validations = Vec::new();
        for doc in docs {
            let l3: L3Block = match Block::new_from_at_rest(doc.clone()) {
                Ok(Block::L3(l3)) => l3,
                Ok(other) => {
                    warn!(level = other.level(), "skipping non-L3 block in notarization input");
                    continue;
                }
                Err(e) => {
                    warn!(err = %e, "skipping malformed l3 block");
                    continue;
                }
            };
            if !seen.insert((
                l3.header.dc_id.clone(),
                l3.header.block_id.clone(),
                l3.proof.proof.clone(),
            )) {
                continue;
            }

            let valid = match self.matchmaking.get_registration(&l3.header.dc_id).await {
                Ok(registration) => ChainKeys::verify_block_proof(
                    &registration.public_key,
                    &l3.signing_bytes(),
                    &l3.proof,
                    self.pow_difficulty,
                ),
                Err(e) => {
                    warn!(l3_dc_id = %l3.header.dc_id, err = %e, "no registration for l3 chain");
                    false
                }
            };
            validations.push(L3Validation {
                l3_dc_id: l3.header.dc_id,
                l3_block_id: l3.header.block_id,
                l3_proof: l3.proof.proof,
                valid,
            });
        }
        validations
    }
}

#[async_trait]
impl LevelActions for L4Actions {
    fn level(&self) -> i64 {
        4
    }

    async fn execute(&self) -> DcResult<bool> {
        let Some(raw) = self.queue.pop_inbound_block() else {
            return Ok(false);
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|dto| {
                let (l1, _) = l1_block_from_dto(&dto).map_err(|e| e.to_string())?;
                let l3_docs = lower_blocks_from_dto(&dto, "l3_blocks").map_err(|e| e.to_string())?;
                Ok((l1, l3_docs))
            });
        let (l1, l3_docs) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(err = %e, "dropping malformed enqueued block");
                self.queue.clear_processing();
                return Ok(self.queue.has_pending_work());
            }
        };

        let l3_validations = self.judge_l3_blocks(&l3_docs).await;
        if l3_validations.is_empty() {
            warn!(l1_block_id = %l1.block_id(), "no l3 blocks to notarize, producing nothing");
            self.queue.clear_processing();
            return Ok(self.queue.has_pending_work());
        }
        debug!(l1_block_id = %l1.block_id(), count = l3_validations.len(), "notarizing level 3 validations");

        let (block_id, prev_proof) = self.chainer.next_block_info()?;
        let l1_dc_id = l1.dc_id().to_string();
        let mut block = L4Block {
            header: BlockHeader {
                level: 4,
                dc_id: self.own_id.clone(),
                block_id: block_id.to_string(),
                timestamp: time::unix_now_string(),
                prev_proof,
            },
            l1_dc_id: l1_dc_id.clone(),
            l1_block_id: l1.block_id().to_string(),
            l1_proof: l1.proof().to_string(),
            l3_validations,
            proof: BlockProof {
                scheme: self.keys.scheme(),
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = self.keys.seal_block(&block.signing_bytes()).map_err(|e| DragonNetError::BadState(format!("sealing block: {e}")))?;

        self.blocks.insert_block(&Block::L4(block.clone()))?;
        self.dispatcher
            .dispatch_receipt(&l1_dc_id, &dto::export_versioned(&block))
            .await?;
        self.chainer
            .record_last_block(&block.header.block_id, &block.proof.proof);
        self.queue.clear_processing();
        Ok(self.queue.has_pending_work())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use dragonnet_common::config::ProofScheme;
    use dragonnet_coord::CoordStore;
    use dragonnet_matchmaking::{fakes::FakeMatchmaking, Registration};
    use dragonnet_storage::{dao::ApiKeyDao, MemoryIndexer, MemoryStore};

    use super::*;

    fn l3_doc(keys: &ChainKeys, dc_id: &str) -> Value {
        let mut block = L3Block {
            header: BlockHeader {
                level: 3,
                dc_id: dc_id.to_string(),
                block_id: "9".to_string(),
                timestamp: "1000".to_string(),
                prev_proof: String::new(),
            },
            l1_dc_id: "l1-chain".to_string(),
            l1_block_id: "41".to_string(),
            l1_proof: "cHJvb2Y=".to_string(),
            l2_count: 2,
            ddss: 20.0,
            regions: BTreeSet::new(),
            clouds: BTreeSet::new(),
            l2_proofs: vec![],
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = keys.seal_block(&block.signing_bytes()).unwrap();
        dto::export_versioned(&block)
    }

    fn actions(matchmaking: Arc<FakeMatchmaking>) -> L4Actions {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), Arc::new(MemoryIndexer::new())));
        let dispatcher = ReceiptDispatcher::new(
            "l4-chain".to_string(),
            dragonnet_common::config::HashAlgorithm::Sha256,
            Arc::new(ApiKeyDao::new(store)),
            matchmaking.clone(),
        );
        L4Actions::new(
            "l4-chain".to_string(),
            WorkQueue::new(coord.clone(), 4),
            BlockChainer::new(coord, blocks.clone(), 4),
            blocks,
            Arc::new(ChainKeys::generate(
                "l4-chain".to_string(),
                ProofScheme::Trust,
                8,
            )),
            matchmaking,
            dispatcher,
            8,
        )
    }

    #[tokio::test]
    async fn duplicate_l3_blocks_collapse_to_one_verdict() {
        let matchmaking = Arc::new(FakeMatchmaking::new());
        let keys = ChainKeys::generate("l3-a".to_string(), ProofScheme::Trust, 8);
        matchmaking.insert_registration(
            "l3-a",
            Registration {
                public_key: keys.public_b64(),
                ..Default::default()
            },
        );

        let actions = actions(matchmaking);
        let doc = l3_doc(&keys, "l3-a");
        let verdicts = actions.judge_l3_blocks(&[doc.clone(), doc]).await;

        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].valid);
    }

    #[tokio::test]
    async fn unknown_chain_yields_an_invalid_verdict() {
        let matchmaking = Arc::new(FakeMatchmaking::new());
        let keys = ChainKeys::generate("l3-a".to_string(), ProofScheme::Trust, 8);

        let actions = actions(matchmaking);
        let verdicts = actions.judge_l3_blocks(&[l3_doc(&keys, "l3-a")]).await;
        assert_eq!(verdicts.len(), 1);
        assert!(!verdicts[0].valid);
    }
}
