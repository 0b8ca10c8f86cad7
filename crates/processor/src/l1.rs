//! Level 1: drain admitted transactions into a new signed block every
//! interval, persist both transaction forms, hand the block to the
//! broadcast system and fire registered callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_keys::ChainKeys;
use dragonnet_primitives::{ids, time};
use dragonnet_state::{block::BlockProof, Block, BlockHeader, L1Block, Transaction};
use dragonnet_storage::dao::{BlockDao, TransactionDao, TransactionTypeDao};
use serde_json::json;
use tracing::*;

use crate::{
    callback::CallbackRegistry, queue::WorkQueue, runner::LevelActions, shared::BlockChainer,
};
use dragonnet_broadcast::BroadcastFunctions;

pub struct L1Actions {
    own_id: String,
    queue: WorkQueue,
    chainer: BlockChainer,
    blocks: Arc<BlockDao>,
    transactions: Arc<TransactionDao>,
    transaction_types: Arc<TransactionTypeDao>,
    keys: Arc<ChainKeys>,
    broadcast: Arc<BroadcastFunctions>,
    broadcast_enabled: bool,
    callbacks: CallbackRegistry,
}

impl L1Actions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_id: String,
        queue: WorkQueue,
        chainer: BlockChainer,
        blocks: Arc<BlockDao>,
        transactions: Arc<TransactionDao>,
        transaction_types: Arc<TransactionTypeDao>,
        keys: Arc<ChainKeys>,
        broadcast: Arc<BroadcastFunctions>,
        broadcast_enabled: bool,
        callbacks: CallbackRegistry,
    ) -> Self {
        Self {
            own_id,
            queue,
            chainer,
            blocks,
            transactions,
            transaction_types,
            keys,
            broadcast,
            broadcast_enabled,
            callbacks,
        }
    }

    /// Assign the block id, route contract invocations and sign every
    /// admitted transaction. Unparseable queue entries are dropped.
    fn process_transactions(&self, raw_txns: &[String], block_id: &str) -> Vec<Transaction> {
        let mut signed = Vec::new();
        for raw in raw_txns {
            let mut txn: Transaction = match serde_json::from_str(raw) {
                Ok(txn) => txn,
                Err(e) => {
                    warn!(err = %e, "dropping unparseable queued transaction");
                    continue;
                }
            };
            txn.header.block_id = Some(block_id.to_string());

            if let Ok(txn_type) = self.transaction_types.get(&txn.header.txn_type) {
                if let Some(contract_id) = txn_type.contract_id {
                    let invocation = json!({
                        "contract_id": contract_id,
                        "txn_type": txn.header.txn_type,
                        "txn_id": txn.header.txn_id,
                        "payload": txn.payload,
                    });
                    self.queue.enqueue_contract_invocation(&invocation.to_string());
                }
            }

            self.keys.sign_transaction(&mut txn);
            signed.push(txn);
        }
        signed
    }
}

#[async_trait]
impl LevelActions for L1Actions {
    fn level(&self) -> i64 {
        1
    }

    async fn execute(&self) -> DcResult<bool> {
        let raw_txns = self.queue.pop_transactions();
        if raw_txns.is_empty() {
            return Ok(false);
        }

        let now = time::unix_now();
        let interval_id = ids::block_id_at(now);
        let (block_id, prev_proof) = match self.chainer.last_block()? {
            // Block ids must stay strictly monotonic even when two ticks
            // land inside one interval.
            Some((last_id, proof)) => (interval_id.max(last_id + 1), proof),
            None => (interval_id, String::new()),
        };
        let block_id = block_id.to_string();

        let full_txns = self.process_transactions(&raw_txns, &block_id);
        if full_txns.is_empty() {
            self.queue.clear_processing();
            return Ok(self.queue.has_pending_work());
        }
        debug!(%block_id, count = full_txns.len(), "creating level 1 block");

        let stripped = full_txns
            .iter()
            .filter_map(Transaction::strip)
            .collect::<Vec<_>>();
        let mut block = L1Block {
            header: BlockHeader {
                level: 1,
                dc_id: self.own_id.clone(),
                block_id: block_id.clone(),
                timestamp: now.to_string(),
                prev_proof,
            },
            transactions: stripped,
            proof: BlockProof {
                scheme: self.keys.scheme(),
                proof: String::new(),
                nonce: None,
            },
        };
        block.proof = self.keys.seal_block(&block.signing_bytes()).map_err(|e| DragonNetError::BadState(format!("sealing block: {e}")))?;

        self.blocks.insert_block(&Block::L1(block.clone()))?;
        self.transactions
            .store_transaction_bundle(&block_id, &full_txns)?;
        if self.broadcast_enabled {
            if let Err(e) = self.broadcast.enqueue_block(&block_id) {
                warn!(%block_id, err = %e, "block not entered into the broadcast system");
            }
        }
        self.chainer
            .record_last_block(&block_id, &block.proof.proof);

        for txn in &full_txns {
            let callback_key = txn
                .header
                .invoker
                .as_deref()
                .unwrap_or(&txn.header.txn_id);
            self.callbacks.fire_if_exists(callback_key, txn).await;
        }

        self.queue.clear_processing();
        Ok(self.queue.has_pending_work())
    }
}

#[cfg(test)]
mod tests {
    use dragonnet_common::config::{ProofScheme, VerificationRequirements};
    use dragonnet_coord::CoordStore;
    use dragonnet_storage::{MemoryIndexer, MemoryStore};
    use serde_json::json;

    use super::*;

    struct Harness {
        coord: Arc<CoordStore>,
        actions: L1Actions,
        broadcast: Arc<BroadcastFunctions>,
    }

    fn harness() -> Harness {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(MemoryIndexer::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), indexer.clone()));
        let broadcast = Arc::new(BroadcastFunctions::new(
            coord.clone(),
            blocks.clone(),
            VerificationRequirements::default(),
        ));
        let actions = L1Actions::new(
            "l1-chain".to_string(),
            WorkQueue::new(coord.clone(), 1),
            BlockChainer::new(coord.clone(), blocks.clone(), 1),
            blocks,
            Arc::new(TransactionDao::new(store.clone(), indexer)),
            Arc::new(TransactionTypeDao::new(store)),
            Arc::new(ChainKeys::generate(
                "l1-chain".to_string(),
                ProofScheme::Trust,
                8,
            )),
            broadcast.clone(),
            true,
            CallbackRegistry::new(coord.clone()),
        );
        Harness {
            coord,
            actions,
            broadcast,
        }
    }

    fn admit(h: &Harness, payload: serde_json::Value) -> Transaction {
        let txn = Transaction::admit(
            "ledger".to_string(),
            payload,
            String::new(),
            None,
            "l1-chain".to_string(),
        );
        h.actions
            .queue
            .enqueue_transaction(&serde_json::to_string(&txn).unwrap());
        txn
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let h = harness();
        assert!(!h.actions.execute().await.unwrap());
    }

    #[tokio::test]
    async fn tick_builds_signs_and_broadcasts_a_block() {
        let h = harness();
        let admitted = admit(&h, json!({"a": 1}));

        assert!(!h.actions.execute().await.unwrap());

        let (block_id, _) = h.actions.chainer.last_block().unwrap().unwrap();
        let block = h.actions.blocks.get_block(&block_id.to_string()).unwrap();
        let Block::L1(l1) = &block else {
            panic!("expected an L1 block")
        };
        assert_eq!(l1.transactions.len(), 1);
        assert_eq!(
            l1.transactions[0].header.block_id.as_deref(),
            Some(block_id.to_string().as_str())
        );

        // Broadcast state initialized and scheduled immediately.
        assert_eq!(
            h.broadcast.current_level(&block_id.to_string()),
            Some(2)
        );
        assert_eq!(
            h.coord
                .zscore(dragonnet_broadcast::functions::IN_FLIGHT_KEY, &block_id.to_string()),
            Some(0)
        );

        // Full form stored and findable by txn id.
        let stored = h
            .actions
            .transactions
            .get_transaction(&admitted.header.txn_id)
            .unwrap();
        assert_eq!(stored.payload, json!({"a": 1}));
        assert!(stored.signature.is_some());
    }

    #[tokio::test]
    async fn block_ids_stay_monotonic_within_one_interval() {
        let h = harness();
        admit(&h, json!({"n": 1}));
        h.actions.execute().await.unwrap();
        let (first, _) = h.actions.chainer.last_block().unwrap().unwrap();

        admit(&h, json!({"n": 2}));
        h.actions.execute().await.unwrap();
        let (second, _) = h.actions.chainer.last_block().unwrap().unwrap();

        assert!(second > first);
    }
}
