//! Level 2: re-validate every stripped transaction of an inbound L1 block
//! under the producing chain's public key, then return a signed validation
//! block to the L1 chain as a receipt.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_keys::ChainKeys;
use dragonnet_matchmaking::MatchmakingClient;
use dragonnet_primitives::time;
use dragonnet_state::{block::BlockProof, dto, Block, BlockHeader, L1Block, L2Block};
use dragonnet_storage::dao::BlockDao;
use serde_json::Value;
use tracing::*;

use crate::{
    dispatch::ReceiptDispatcher,
    queue::WorkQueue,
    runner::LevelActions,
    shared::{l1_block_from_dto, BlockChainer},
};

pub struct L2Actions {
    own_id: String,
    queue: WorkQueue,
    chainer: BlockChainer,
    blocks: Arc<BlockDao>,
    keys: Arc<ChainKeys>,
    matchmaking: Arc<dyn MatchmakingClient>,
    dispatcher: ReceiptDispatcher,
    pow_difficulty: u32,
}

impl L2Actions {
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

    /// Per-transaction verdicts for the block. A missing registration or a
    /// failed block proof marks every transaction invalid.
    async fn validate_transactions(&self, l1: &L1Block) -> BTreeMap<String, bool> {
        let all_invalid = || {
            l1.transactions
                .iter()
                .map(|t| (t.header.txn_id.clone(), false))
                .collect()
        };

        let registration = match self.matchmaking.get_registration(&l1.header.dc_id).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(l1_dc_id = %l1.header.dc_id, err = %e, "no registration for l1 chain");
                return all_invalid();
            }
        };
        if !ChainKeys::verify_block_proof(
            &registration.public_key,
            &l1.signing_bytes(),
            &l1.proof,
            self.pow_difficulty,
        ) {
            warn!(l1_dc_id = %l1.header.dc_id, block_id = %l1.header.block_id, "l1 block proof failed verification");
            return all_invalid();
        }

        l1.transactions
            .iter()
            .map(|txn| {
                let valid =
                    ChainKeys::verify_stripped_transaction(&registration.public_key, txn);
                (txn.header.txn_id.clone(), valid)
            })
            .collect()
    }
}

#[async_trait]
impl LevelActions for L2Actions {
    fn level(&self) -> i64 {
        2
    }

    async fn execute(&self) -> DcResult<bool> {
        let Some(raw) = self.queue.pop_inbound_block() else {
            return Ok(false);
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|dto| l1_block_from_dto(&dto).map_err(|e| e.to_string()));
        let l1 = match parsed {
            Ok((Block::L1(l1), _)) => l1,
            Ok(_) => unreachable!("l1_block_from_dto only returns level 1 blocks"),
            Err(e) => {
                warn!(err = %e, "dropping malformed enqueued block");
                self.queue.clear_processing();
                return Ok(self.queue.has_pending_work());
            }
        };
        debug!(l1_dc_id = %l1.header.dc_id, l1_block_id = %l1.header.block_id, "validating level 1 block");

        let validations = self.validate_transactions(&l1).await;
        let current_ddss = self
            .matchmaking
            .get_registration(&self.own_id)
            .await
            .ok()
            .and_then(|r| r.ddss);

        let (block_id, prev_proof) = self.chainer.next_block_info()?;
        let mut block = L2Block {
            header: BlockHeader {
                level: 2,
                dc_id: self.own_id.clone(),
                block_id: block_id.to_string(),
                timestamp: time::unix_now_string(),
                prev_proof,
            },
            l1_dc_id: l1.header.dc_id.clone(),
            l1_block_id: l1.header.block_id.clone(),
            l1_proof: l1.proof.proof.clone(),
            current_ddss,
            validations,
            proof: BlockProof {
                scheme: self.keys.scheme(),
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = self.keys.seal_block(&block.signing_bytes()).map_err(|e| DragonNetError::BadState(format!("sealing block: {e}")))?;

        self.blocks.insert_block(&Block::L2(block.clone()))?;
        self.dispatcher
            .dispatch_receipt(&l1.header.dc_id, &dto::export_versioned(&block))
            .await?;
        self.chainer
            .record_last_block(&block.header.block_id, &block.proof.proof);
        self.queue.clear_processing();
        Ok(self.queue.has_pending_work())
    }
}

#[cfg(test)]
mod tests {
    use dragonnet_common::config::ProofScheme;
    use dragonnet_coord::CoordStore;
    use dragonnet_matchmaking::{fakes::FakeMatchmaking, Registration};
    use dragonnet_state::Transaction;
    use dragonnet_storage::{
        dao::ApiKeyDao, MemoryIndexer, MemoryStore,
    };
    use serde_json::json;

    use super::*;

    struct Harness {
        actions: L2Actions,
        l1_keys: Arc<ChainKeys>,
        matchmaking: Arc<FakeMatchmaking>,
    }

    fn harness() -> Harness {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), Arc::new(MemoryIndexer::new())));
        let matchmaking = Arc::new(FakeMatchmaking::new());
        let l1_keys = Arc::new(ChainKeys::generate(
            "l1-chain".to_string(),
            ProofScheme::Trust,
            8,
        ));
        matchmaking.insert_registration(
            "l1-chain",
            Registration {
                level: 1,
                public_key: l1_keys.public_b64(),
                ..Default::default()
            },
        );
        matchmaking.insert_registration(
            "l2-chain",
            Registration {
                level: 2,
                ddss: Some(42.0),
                ..Default::default()
            },
        );

        let dispatcher = ReceiptDispatcher::new(
            "l2-chain".to_string(),
            dragonnet_common::config::HashAlgorithm::Sha256,
            Arc::new(ApiKeyDao::new(store)),
            matchmaking.clone(),
        );
        let actions = L2Actions::new(
            "l2-chain".to_string(),
            WorkQueue::new(coord.clone(), 2),
            BlockChainer::new(coord, blocks.clone(), 2),
            blocks,
            Arc::new(ChainKeys::generate(
                "l2-chain".to_string(),
                ProofScheme::Trust,
                8,
            )),
            matchmaking.clone(),
            dispatcher,
            8,
        );
        Harness {
            actions,
            l1_keys,
            matchmaking,
        }
    }

    fn signed_l1_block(keys: &ChainKeys) -> L1Block {
        let mut txn = Transaction::admit(
            "ledger".to_string(),
            json!({"a": 1}),
            String::new(),
            None,
            "l1-chain".to_string(),
        );
        txn.header.block_id = Some("41".to_string());
        keys.sign_transaction(&mut txn);

        let mut block = L1Block {
            header: BlockHeader {
                level: 1,
                dc_id: "l1-chain".to_string(),
                block_id: "41".to_string(),
                timestamp: "1000".to_string(),
                prev_proof: String::new(),
            },
            transactions: vec![txn.strip().unwrap()],
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = keys.seal_block(&block.signing_bytes()).unwrap();
        block
    }

    #[tokio::test]
    async fn valid_l1_block_validates_each_transaction() {
        let h = harness();
        let l1 = signed_l1_block(&h.l1_keys);
        let txn_id = l1.transactions[0].header.txn_id.clone();
        let validations = h.actions.validate_transactions(&l1).await;
        assert_eq!(validations.get(&txn_id), Some(&true));
    }

    #[tokio::test]
    async fn bad_block_proof_invalidates_every_transaction() {
        let h = harness();
        let mut l1 = signed_l1_block(&h.l1_keys);
        l1.header.timestamp = "9999".to_string();
        let validations = h.actions.validate_transactions(&l1).await;
        assert!(validations.values().all(|v| !v));
    }

    #[tokio::test]
    async fn missing_registration_invalidates_every_transaction() {
        let h = harness();
        let mut l1 = signed_l1_block(&h.l1_keys);
        l1.header.dc_id = "unknown-chain".to_string();
        let validations = h.actions.validate_transactions(&l1).await;
        assert!(validations.values().all(|v| !v));
        let _ = h.matchmaking;
    }

    #[tokio::test]
    async fn malformed_dto_is_dropped_not_fatal() {
        let h = harness();
        h.actions.queue.enqueue_block("not json");
        assert!(!h.actions.execute().await.unwrap());
    }
}
