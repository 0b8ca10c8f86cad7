//! The anchor pipeline itself: stage, fund, assemble, anchor, confirm,
//! finalize.

use std::sync::Arc;

use async_trait::async_trait;
use dragonnet_broadcast::BroadcastFunctions;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_interchain::InterchainClient;
use dragonnet_keys::ChainKeys;
use dragonnet_matchmaking::MatchmakingClient;
use dragonnet_primitives::time;
use dragonnet_processor::{LevelActions, WorkQueue};
use dragonnet_state::{Block, BlockHeader, L4Block, L4Projection, L5Block};
use dragonnet_storage::{dao::blocks::block_key, dao::BlockDao, ObjectStore};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::*;

use crate::state::{to_broadcast_prefix, AnchorState};

/// Seconds between balance re-polls while unfunded.
const WATCH_INTERVAL_SECS: u64 = 600;

pub struct AnchorEngine {
    own_id: String,
    broadcast_interval_hours: f64,
    keys: Arc<ChainKeys>,
    queue: WorkQueue,
    store: Arc<dyn ObjectStore>,
    blocks: Arc<BlockDao>,
    state: AnchorState,
    interchain: Arc<dyn InterchainClient>,
    matchmaking: Arc<dyn MatchmakingClient>,
    functions: Arc<BroadcastFunctions>,
    /// Last funded flag reported to matchmaking; transitions report once.
    reported_funded: Mutex<Option<bool>>,
}

impl AnchorEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_id: String,
        broadcast_interval_hours: f64,
        keys: Arc<ChainKeys>,
        queue: WorkQueue,
        store: Arc<dyn ObjectStore>,
        blocks: Arc<BlockDao>,
        interchain: Arc<dyn InterchainClient>,
        matchmaking: Arc<dyn MatchmakingClient>,
        functions: Arc<BroadcastFunctions>,
    ) -> Self {
        Self {
            own_id,
            broadcast_interval_hours,
            keys,
            queue,
            store: store.clone(),
            blocks,
            state: AnchorState::new(store),
            interchain,
            matchmaking,
            functions,
            reported_funded: Mutex::new(None),
        }
    }

    /// Drain the inbound queue, staging every carried L4 block under the
    /// next L5 block's `TO_BROADCAST` prefix. Blocks that fail validation
    /// are staged with `is_invalid` set rather than dropped.
    fn store_inbound_l4_blocks(&self) -> DcResult<()> {
        let next_id = self.state.last_block_number()? + 1;
        while let Some(raw) = self.queue.pop_inbound_block() {
            match serde_json::from_str::<Value>(&raw) {
                Ok(dto) => {
                    let docs = dto
                        .get("l4_blocks")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for doc in docs {
                        if let Err(e) = self.stage_l4_block(next_id, &doc) {
                            warn!(err = %e, "skipping unstageable l4 block");
                        }
                    }
                }
                Err(e) => {
                    warn!(err = %e, "dropping unparseable enqueued document");
                }
            }
            self.queue.clear_processing();
        }
        Ok(())
    }

    fn stage_l4_block(&self, next_id: u64, doc: &Value) -> DcResult<()> {
        let projection = match Block::new_from_at_rest(doc.clone()) {
            Ok(Block::L4(l4)) => projection_from(&l4, None),
            _ => {
                // Schema-invalid receipts are recorded as such; the L5 block
                // carries the verdict upward instead of hiding it.
                let header = doc.get("header").cloned().unwrap_or(Value::Null);
                L4Projection {
                    l1_dc_id: str_or_unknown(doc, "l1_dc_id"),
                    l1_block_id: str_or_unknown(doc, "l1_block_id"),
                    l4_dc_id: str_or_unknown(&header, "dc_id"),
                    l4_block_id: str_or_unknown(&header, "block_id"),
                    l4_proof: doc
                        .get("proof")
                        .and_then(|p| p.get("proof"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    is_invalid: Some(true),
                }
            }
        };

        let key = format!(
            "{}L4-{}-{}-{}-{}.json",
            to_broadcast_prefix(next_id),
            projection.l1_dc_id,
            projection.l1_block_id,
            projection.l4_dc_id,
            projection.l4_block_id,
        );
        let body = serde_json::to_vec(&projection)
            .map_err(|e| DragonNetError::storage(format!("encoding staged l4 block: {e}")))?;
        self.store.put(&key, &body)
    }

    fn pending_l4_projections(&self, l5_block_id: u64) -> DcResult<Vec<L4Projection>> {
        let mut projections = Vec::new();
        for key in self.store.list(&to_broadcast_prefix(l5_block_id))? {
            let bytes = self.store.get(&key)?;
            match serde_json::from_slice(&bytes) {
                Ok(projection) => projections.push(projection),
                Err(e) => warn!(%key, err = %e, "staged l4 projection unreadable"),
            }
        }
        Ok(projections)
    }

    async fn report_funded(&self, funded: bool) {
        let already_reported = {
            let mut reported = self.reported_funded.lock();
            if *reported == Some(funded) {
                true
            } else {
                *reported = Some(funded);
                false
            }
        };
        if already_reported {
            return;
        }
        if let Err(e) = self.matchmaking.update_funded_flag(funded).await {
            warn!(err = %e, "could not update funded flag with matchmaking");
        }
    }

    /// Whether the wallet can cover the next anchor. While short, the
    /// balance is re-polled on the watch cadence and the funded flag kept
    /// current with matchmaking.
    async fn has_funds_for_transaction(&self) -> DcResult<bool> {
        let fee = self.interchain.get_transaction_fee_estimate().await?;
        let funds = self.state.current_funds()?;
        if funds >= fee.max(1) {
            self.report_funded(true).await;
            return Ok(true);
        }

        self.report_funded(false).await;
        let balance = self.watch_for_funds().await?;
        if balance >= fee.max(1) {
            self.report_funded(true).await;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_time_to_watch(&self) -> DcResult<bool> {
        Ok(match self.state.last_watch_time()? {
            Some(last) => time::unix_now().saturating_sub(last) >= WATCH_INTERVAL_SECS,
            None => true,
        })
    }

    /// Re-poll the wallet balance on the watch cadence. Returns the updated
    /// funds snapshot.
    async fn watch_for_funds(&self) -> DcResult<u128> {
        if !self.is_time_to_watch()? {
            return self.state.current_funds();
        }
        let balance = self.interchain.check_balance().await?;
        info!(%balance, "polled anchor wallet balance");
        self.state.set_current_funds(balance)?;
        self.state.set_last_watch_time(time::unix_now())?;
        Ok(balance)
    }

    fn should_broadcast(&self, next_id: u64) -> DcResult<bool> {
        let Some(last_broadcast) = self.state.last_broadcast_time()? else {
            // Never broadcast before: start the clock now.
            self.state.set_last_broadcast_time(time::unix_now())?;
            return Ok(false);
        };
        let interval_secs = (self.broadcast_interval_hours * 3600.0) as u64;
        if time::unix_now().saturating_sub(last_broadcast) < interval_secs {
            return Ok(false);
        }
        self.state.has_backlog(next_id)
    }

    fn create_block(&self, block_id: u64) -> DcResult<L5Block> {
        let (_, prev_proof) = self.state.last_confirmed_block()?;
        Ok(L5Block {
            header: BlockHeader {
                level: 5,
                dc_id: self.own_id.clone(),
                block_id: block_id.to_string(),
                timestamp: time::unix_now_string(),
                prev_proof,
            },
            l4_blocks: self.pending_l4_projections(block_id)?,
            transaction_hash: vec![],
            block_last_sent_at: None,
            network: Some(self.interchain.get_network_string()),
            proof: None,
        })
    }

    async fn broadcast_to_public_chain(&self, block: &mut L5Block) -> DcResult<()> {
        let hash = self
            .keys
            .hash_block_for_public_broadcast(&block.signing_bytes());
        let txn_hash = self
            .interchain
            .publish_l5_hash_to_public_network(&hash)
            .await?;
        info!(block_id = %block.header.block_id, %txn_hash, "anchored block hash");
        block.transaction_hash.push(txn_hash);
        block.block_last_sent_at = Some(self.interchain.get_current_block().await?);
        Ok(())
    }

    fn persist_new_block(&self, block: &L5Block) -> DcResult<()> {
        let block_id: u64 = block.header.block_id.parse().map_err(|_| {
            DragonNetError::SanityCheck("l5 block id is not numeric".to_string())
        })?;
        self.blocks.insert_block(&Block::L5(block.clone()))?;
        self.state.set_last_block_number(block_id)?;
        self.store.delete_prefix(&to_broadcast_prefix(block_id))?;
        self.state.set_last_broadcast_time(time::unix_now())
    }

    /// Walk every broadcast-but-unconfirmed L5 block, oldest first. A
    /// confirmed hash finalizes the block; a dropped hash is removed; an
    /// empty hash list or a stale send triggers a rebroadcast.
    async fn check_confirmations(&self) -> DcResult<()> {
        let (last_confirmed, _) = self.state.last_confirmed_block()?;
        let last_block = self.state.last_block_number()?;

        for block_id in (last_confirmed + 1)..=last_block {
            let block = self.blocks.get_block(&block_id.to_string())?;
            let Block::L5(mut block) = block else {
                return Err(DragonNetError::SanityCheck(format!(
                    "block {block_id} in the l5 range is not an l5 block"
                )));
            };

            let mut confirmed_hash = None;
            let mut remaining = Vec::new();
            for hash in block.transaction_hash.clone() {
                if confirmed_hash.is_some() {
                    remaining.push(hash);
                    continue;
                }
                match self.interchain.is_transaction_confirmed(&hash).await {
                    Ok(true) => confirmed_hash = Some(hash),
                    Ok(false) => remaining.push(hash),
                    Err(DragonNetError::RpcTransactionNotFound(_)) => {
                        warn!(%block_id, %hash, "anchor transaction dropped by the network");
                    }
                    Err(e) => {
                        warn!(%block_id, %hash, err = %e, "confirmation poll failed");
                        remaining.push(hash);
                    }
                }
            }

            if let Some(hash) = confirmed_hash {
                self.finalize_block(block, &hash)?;
                continue;
            }

            block.transaction_hash = remaining;
            let needs_rebroadcast = block.transaction_hash.is_empty()
                || self
                    .interchain
                    .should_retry_broadcast(block.block_last_sent_at.unwrap_or(0))
                    .await?;
            if needs_rebroadcast {
                info!(%block_id, "rebroadcasting unconfirmed anchor");
                self.broadcast_to_public_chain(&mut block).await?;
            }
            self.blocks.insert_block(&Block::L5(block))?;
        }
        Ok(())
    }

    /// Sign the confirmed block into the chain: its proof chains from the
    /// previous confirmed block and only the confirming hash is kept.
    fn finalize_block(&self, mut block: L5Block, confirmed_hash: &str) -> DcResult<()> {
        let (_, prev_proof) = self.state.last_confirmed_block()?;
        block.header.prev_proof = prev_proof;
        let proof = self.keys.seal_block(&block.signing_bytes()).map_err(|e| DragonNetError::BadState(format!("sealing block: {e}")))?;
        block.transaction_hash = vec![confirmed_hash.to_string()];
        block.proof = Some(proof.clone());

        info!(block_id = %block.header.block_id, "finalizing externally confirmed block");
        self.blocks.insert_block(&Block::L5(block.clone()))?;
        self.state
            .set_last_confirmed_block(&block.header.block_id, &proof.proof)?;
        self.functions
            .queue_notification(&block_key(&block.header.block_id));

        // The finalized block's own receipt travels through the broadcast
        // system like any other verification artifact.
        Ok(())
    }
}

fn projection_from(l4: &L4Block, is_invalid: Option<bool>) -> L4Projection {
    L4Projection {
        l1_dc_id: l4.l1_dc_id.clone(),
        l1_block_id: l4.l1_block_id.clone(),
        l4_dc_id: l4.header.dc_id.clone(),
        l4_block_id: l4.header.block_id.clone(),
        l4_proof: l4.proof.proof.clone(),
        is_invalid,
    }
}

fn str_or_unknown(doc: &Value, field: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl LevelActions for AnchorEngine {
    fn level(&self) -> i64 {
        5
    }

    async fn execute(&self) -> DcResult<bool> {
        self.store_inbound_l4_blocks()?;

        // Funding only gates the next broadcast; anchors already on the
        // wire are still polled below.
        if self.has_funds_for_transaction().await? {
            let next_id = self.state.last_block_number()? + 1;
            if self.should_broadcast(next_id)? {
                let mut block = self.create_block(next_id)?;
                self.broadcast_to_public_chain(&mut block).await?;
                self.persist_new_block(&block)?;
            }
        }

        self.check_confirmations().await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use dragonnet_common::config::{ProofScheme, VerificationRequirements};
    use dragonnet_coord::CoordStore;
    use dragonnet_matchmaking::fakes::FakeMatchmaking;
    use dragonnet_state::{block::BlockProof, dto};
    use dragonnet_storage::{MemoryIndexer, MemoryStore};
    use serde_json::{json, Value};

    use super::*;
    use crate::state::{AnchorState, LAST_BROADCAST_TIME_KEY};

    #[derive(Clone, Copy)]
    enum Confirmation {
        Confirmed,
        Pending,
        NotFound,
    }

    #[derive(Default)]
    struct FakeInterchain {
        fee: u128,
        publish_queue: Mutex<VecDeque<String>>,
        published: Mutex<Vec<String>>,
        current_block: Mutex<u64>,
        balance: Mutex<u128>,
        confirmations: Mutex<HashMap<String, Confirmation>>,
        retry: Mutex<bool>,
    }

    impl FakeInterchain {
        fn set_confirmation(&self, hash: &str, outcome: Confirmation) {
            self.confirmations.lock().insert(hash.to_string(), outcome);
        }
    }

    #[async_trait]
    impl InterchainClient for FakeInterchain {
        fn blockchain(&self) -> &'static str {
            "ethereum"
        }

        fn name(&self) -> &str {
            "fake"
        }

        fn get_network_string(&self) -> String {
            "ETH_MAINNET".to_string()
        }

        fn get_private_key(&self) -> String {
            String::new()
        }

        fn wallet_address(&self) -> String {
            "0xfake".to_string()
        }

        fn export_as_at_rest(&self) -> Value {
            json!({"version": "1", "blockchain": "ethereum", "name": "fake"})
        }

        async fn ping(&self) -> DcResult<()> {
            Ok(())
        }

        async fn sign_transaction(&self, _raw: Value) -> DcResult<String> {
            Ok("signed".to_string())
        }

        async fn publish_l5_hash_to_public_network(&self, hash: &str) -> DcResult<String> {
            self.published.lock().push(hash.to_string());
            self.publish_queue
                .lock()
                .pop_front()
                .ok_or_else(|| DragonNetError::Rpc("no publish result queued".to_string()))
        }

        async fn is_transaction_confirmed(&self, hash: &str) -> DcResult<bool> {
            match self.confirmations.lock().get(hash) {
                Some(Confirmation::Confirmed) => Ok(true),
                Some(Confirmation::Pending) => Ok(false),
                Some(Confirmation::NotFound) | None => {
                    Err(DragonNetError::RpcTransactionNotFound(hash.to_string()))
                }
            }
        }

        async fn check_balance(&self) -> DcResult<u128> {
            Ok(*self.balance.lock())
        }

        async fn get_transaction_fee_estimate(&self) -> DcResult<u128> {
            Ok(self.fee)
        }

        async fn get_current_block(&self) -> DcResult<u64> {
            Ok(*self.current_block.lock())
        }

        async fn should_retry_broadcast(&self, _last_sent_block: u64) -> DcResult<bool> {
            Ok(*self.retry.lock())
        }
    }

    struct Harness {
        engine: AnchorEngine,
        interchain: Arc<FakeInterchain>,
        matchmaking: Arc<FakeMatchmaking>,
        store: Arc<MemoryStore>,
        state: AnchorState,
        functions: Arc<BroadcastFunctions>,
    }

    fn harness() -> Harness {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), Arc::new(MemoryIndexer::new())));
        let functions = Arc::new(BroadcastFunctions::new(
            coord.clone(),
            blocks.clone(),
            VerificationRequirements::default(),
        ));
        let interchain = Arc::new(FakeInterchain {
            fee: 100,
            current_block: Mutex::new(8754),
            ..Default::default()
        });
        let matchmaking = Arc::new(FakeMatchmaking::new());
        let engine = AnchorEngine::new(
            "l5-chain".to_string(),
            1.0,
            Arc::new(ChainKeys::generate(
                "l5-chain".to_string(),
                ProofScheme::Trust,
                8,
            )),
            WorkQueue::new(coord, 5),
            store.clone(),
            blocks,
            interchain.clone(),
            matchmaking.clone(),
            functions.clone(),
        );
        Harness {
            engine,
            interchain,
            matchmaking,
            store: store.clone(),
            state: AnchorState::new(store),
            functions,
        }
    }

    fn l4_doc() -> Value {
        let block = L4Block {
            header: BlockHeader {
                level: 4,
                dc_id: "l4-chain".to_string(),
                block_id: "17".to_string(),
                timestamp: "1000".to_string(),
                prev_proof: String::new(),
            },
            l1_dc_id: "l1-chain".to_string(),
            l1_block_id: "41".to_string(),
            l1_proof: "cHJvb2Y=".to_string(),
            l3_validations: vec![],
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: "c2ln".to_string(),
                nonce: None,
            },
        };
        dto::export_versioned(&block)
    }

    fn fund_and_make_due(h: &Harness) {
        h.state.set_current_funds(1_000_000).unwrap();
        h.state
            .set_last_broadcast_time(time::unix_now() - 2 * 3600)
            .unwrap();
    }

    #[tokio::test]
    async fn staged_backlog_is_anchored_into_an_l5_block() {
        let h = harness();
        fund_and_make_due(&h);
        h.engine
            .queue
            .enqueue_block(&json!({"l4_blocks": [l4_doc()]}).to_string());
        h.interchain
            .publish_queue
            .lock()
            .push_back("0xT1".to_string());
        h.interchain.set_confirmation("0xT1", Confirmation::Pending);

        h.engine.execute().await.unwrap();

        assert_eq!(h.state.last_block_number().unwrap(), 1);
        let Block::L5(block) = h.engine.blocks.get_block("1").unwrap() else {
            panic!("expected an l5 block")
        };
        assert_eq!(block.transaction_hash, vec!["0xT1".to_string()]);
        assert_eq!(block.block_last_sent_at, Some(8754));
        assert_eq!(block.l4_blocks.len(), 1);
        assert_eq!(block.l4_blocks[0].l4_dc_id, "l4-chain");
        assert!(block.proof.is_none());
        assert!(h.store.list(&to_broadcast_prefix(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_hash_rebroadcasts_then_finalizes_on_confirmation() {
        let h = harness();
        fund_and_make_due(&h);
        h.engine
            .queue
            .enqueue_block(&json!({"l4_blocks": [l4_doc()]}).to_string());
        h.interchain
            .publish_queue
            .lock()
            .push_back("0xT1".to_string());
        h.interchain.set_confirmation("0xT1", Confirmation::Pending);
        h.engine.execute().await.unwrap();

        // The network dropped T1: the hash list empties and the anchor is
        // re-sent in the same pass.
        h.interchain.set_confirmation("0xT1", Confirmation::NotFound);
        h.interchain
            .publish_queue
            .lock()
            .push_back("0xT2".to_string());
        h.interchain.set_confirmation("0xT2", Confirmation::Pending);
        h.engine.execute().await.unwrap();

        let Block::L5(block) = h.engine.blocks.get_block("1").unwrap() else {
            panic!("expected an l5 block")
        };
        assert_eq!(block.transaction_hash, vec!["0xT2".to_string()]);

        // T2 confirms: the block finalizes with a proof and becomes the
        // last confirmed block.
        h.interchain.set_confirmation("0xT2", Confirmation::Confirmed);
        h.engine.execute().await.unwrap();

        let Block::L5(block) = h.engine.blocks.get_block("1").unwrap() else {
            panic!("expected an l5 block")
        };
        assert!(block.proof.is_some());
        assert_eq!(block.transaction_hash, vec!["0xT2".to_string()]);
        let (confirmed_id, proof) = h.state.last_confirmed_block().unwrap();
        assert_eq!(confirmed_id, 1);
        assert_eq!(proof, block.proof.unwrap().proof);
        assert_eq!(h.functions.pop_notification().as_deref(), Some("BLOCK/1"));
    }

    #[tokio::test]
    async fn no_backlog_means_no_broadcast() {
        let h = harness();
        fund_and_make_due(&h);
        h.engine.execute().await.unwrap();
        assert_eq!(h.state.last_block_number().unwrap(), 0);
    }

    #[tokio::test]
    async fn first_run_starts_the_interval_clock_instead_of_broadcasting() {
        let h = harness();
        h.state.set_current_funds(1_000_000).unwrap();
        h.engine
            .queue
            .enqueue_block(&json!({"l4_blocks": [l4_doc()]}).to_string());

        h.engine.execute().await.unwrap();
        assert_eq!(h.state.last_block_number().unwrap(), 0);
        assert!(h.store.exists(LAST_BROADCAST_TIME_KEY).unwrap());
    }

    #[tokio::test]
    async fn pending_anchor_finalizes_even_while_out_of_funds() {
        let h = harness();
        fund_and_make_due(&h);
        h.engine
            .queue
            .enqueue_block(&json!({"l4_blocks": [l4_doc()]}).to_string());
        h.interchain
            .publish_queue
            .lock()
            .push_back("0xT1".to_string());
        h.interchain.set_confirmation("0xT1", Confirmation::Pending);
        h.engine.execute().await.unwrap();

        // The wallet empties after the anchor went out; the next tick takes
        // the unfunded path yet must still poll and finalize it.
        h.state.set_current_funds(0).unwrap();
        h.interchain.set_confirmation("0xT1", Confirmation::Confirmed);
        h.engine.execute().await.unwrap();

        assert_eq!(h.matchmaking.funded_updates(), vec![true, false]);
        let (confirmed_id, _) = h.state.last_confirmed_block().unwrap();
        assert_eq!(confirmed_id, 1);
        let Block::L5(block) = h.engine.blocks.get_block("1").unwrap() else {
            panic!("expected an l5 block")
        };
        assert!(block.proof.is_some());
    }

    #[tokio::test]
    async fn unfunded_engine_watches_and_reports_once() {
        let h = harness();
        *h.interchain.balance.lock() = 0;

        h.engine.execute().await.unwrap();
        h.engine.execute().await.unwrap();

        // Balance recovers; next watch is not due yet so the engine stays
        // parked without broadcasting.
        assert_eq!(h.state.current_funds().unwrap(), 0);
        assert!(h.state.last_watch_time().unwrap().is_some());
    }
}
