//! Level 3: aggregate the L2 validations of one L1 block into a single
//! diversity-scored verification block.

use std::{
    collections::BTreeSet,
    sync::Arc,
};

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_keys::ChainKeys;
use dragonnet_matchmaking::MatchmakingClient;
use dragonnet_primitives::time;
use dragonnet_state::{
    block::BlockProof, dto, Block, BlockHeader, L2Block, L3Block, ProofRef,
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

pub struct L3Actions {
    own_id: String,
    queue: WorkQueue,
    chainer: BlockChainer,
    blocks: Arc<BlockDao>,
    keys: Arc<ChainKeys>,
    matchmaking: Arc<dyn MatchmakingClient>,
    dispatcher: ReceiptDispatcher,
    pow_difficulty: u32,
}

/// Accumulated result of verifying the inbound L2 set.
#[derive(Default)]
struct L2Aggregate {
    count: usize,
    ddss: f64,
    regions: BTreeSet<String>,
    clouds: BTreeSet<String>,
    proofs: Vec<ProofRef>,
}

impl L3Actions {
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

    /// Verify each L2 block under its chain's key; verified blocks
    /// contribute their chain's region, cloud and diversity score.
    async fn aggregate_l2_blocks(&self, docs: &[Value]) -> L2Aggregate {
        let mut agg = L2Aggregate::default();
        for doc in docs {
            let l2: L2Block = match Block::new_from_at_rest(doc.clone()) {
                Ok(Block::L2(l2)) => l2,
                Ok(other) => {
                    warn!(level = other.level(), "skipping non-L2 block in aggregation input");
                    continue;
                }
                Err(e) => {
                    warn!(err = %e, "skipping malformed l2 block");
                    continue;
                }
            };
            let registration = match self.matchmaking.get_registration(&l2.header.dc_id).await {
                Ok(registration) => registration,
                Err(e) => {
                    warn!(l2_dc_id = %l2.header.dc_id, err = %e, "no registration for l2 chain");
                    continue;
                }
            };
            if !ChainKeys::verify_block_proof(
                &registration.public_key,
                &l2.signing_bytes(),
                &l2.proof,
                self.pow_difficulty,
            ) {
                warn!(l2_dc_id = %l2.header.dc_id, block_id = %l2.header.block_id, "l2 block proof failed verification");
                continue;
            }

            agg.count += 1;
            agg.ddss += l2
                .current_ddss
                .or(registration.ddss)
                .unwrap_or_default();
            if let Some(region) = registration.region {
                agg.regions.insert(region);
            }
            if let Some(cloud) = registration.cloud {
                agg.clouds.insert(cloud);
            }
            agg.proofs.push(ProofRef {
                dc_id: l2.header.dc_id.clone(),
                block_id: l2.header.block_id.clone(),
                proof: l2.proof.proof.clone(),
            });
        }
        agg
    }
}

#[async_trait]
impl LevelActions for L3Actions {
    fn level(&self) -> i64 {
        3
    }

    async fn execute(&self) -> DcResult<bool> {
        let Some(raw) = self.queue.pop_inbound_block() else {
            return Ok(false);
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|dto| {
                let (l1, _) = l1_block_from_dto(&dto).map_err(|e| e.to_string())?;
                let l2_docs = lower_blocks_from_dto(&dto, "l2_blocks").map_err(|e| e.to_string())?;
                Ok((l1, l2_docs))
            });
        let (l1, l2_docs) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(err = %e, "dropping malformed enqueued block");
                self.queue.clear_processing();
                return Ok(self.queue.has_pending_work());
            }
        };

        let agg = self.aggregate_l2_blocks(&l2_docs).await;
        if agg.count == 0 {
            warn!(l1_block_id = %l1.block_id(), "no verifiable l2 blocks, producing nothing");
            self.queue.clear_processing();
            return Ok(self.queue.has_pending_work());
        }
        debug!(l1_block_id = %l1.block_id(), l2_count = agg.count, "aggregating level 2 validations");

        let (block_id, prev_proof) = self.chainer.next_block_info()?;
        let mut block = L3Block {
            header: BlockHeader {
                level: 3,
                dc_id: self.own_id.clone(),
                block_id: block_id.to_string(),
                timestamp: time::unix_now_string(),
                prev_proof,
            },
            l1_dc_id: l1.dc_id().to_string(),
            l1_block_id: l1.block_id().to_string(),
            l1_proof: l1.proof().to_string(),
            l2_count: agg.count,
            ddss: agg.ddss,
            regions: agg.regions,
            clouds: agg.clouds,
            l2_proofs: agg.proofs,
            proof: BlockProof {
                scheme: self.keys.scheme(),
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = self.keys.seal_block(&block.signing_bytes()).map_err(|e| DragonNetError::BadState(format!("sealing block: {e}")))?;

        self.blocks.insert_block(&Block::L3(block.clone()))?;
        self.dispatcher
            .dispatch_receipt(&block.l1_dc_id.clone(), &dto::export_versioned(&block))
            .await?;
        self.chainer
            .record_last_block(&block.header.block_id, &block.proof.proof);
        self.queue.clear_processing();
        Ok(self.queue.has_pending_work())
    }
}
