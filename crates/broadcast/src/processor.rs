//! The broadcast scheduler loop: pulls due blocks off the in-flight set,
//! reconciles each against its matchmaking claim, asks unresponsive chains
//! to be replaced, and POSTs signed enqueue requests to every selected chain
//! that has not yet returned a receipt.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use dragonnet_common::{
    config::HashAlgorithm,
    errors::{DcResult, DragonNetError},
};
use dragonnet_keys::auth;
use dragonnet_matchmaking::{ClaimCheck, MatchmakingClient};
use dragonnet_primitives::time;
use dragonnet_storage::dao::{ApiKeyDao, BlockDao};
use dragonnet_tasks::ShutdownGuard;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::*;

use crate::functions::BroadcastFunctions;

/// Seconds before a contacted chain is considered unresponsive and the block
/// is due another pass.
pub const BROADCAST_RECEIPT_WAIT_TIME: u64 = 30;

/// Deadline handed to L2-L4 chains for processing an enqueued block.
const ENQUEUE_DEADLINE_SECS: u64 = 30;

/// Fallback L5 deadline when a chain's registration is malformed.
const L5_DEADLINE_FALLBACK_SECS: u64 = 43_200;

/// How long the whole processor sleeps when matchmaking reports we cannot
/// fund further claim checks.
const INSUFFICIENT_FUNDS_SLEEP: Duration = Duration::from_secs(30 * 60);

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BroadcastProcessor {
    own_id: String,
    hash_algorithm: HashAlgorithm,
    functions: Arc<BroadcastFunctions>,
    blocks: Arc<BlockDao>,
    api_keys: Arc<ApiKeyDao>,
    matchmaking: Arc<dyn MatchmakingClient>,
    http: reqwest::Client,
    /// Per-L5-chain deadline seconds, derived once from its registration.
    l5_deadlines: Arc<Mutex<HashMap<String, u64>>>,
}

impl BroadcastProcessor {
    pub fn new(
        own_id: String,
        hash_algorithm: HashAlgorithm,
        functions: Arc<BroadcastFunctions>,
        blocks: Arc<BlockDao>,
        api_keys: Arc<ApiKeyDao>,
        matchmaking: Arc<dyn MatchmakingClient>,
    ) -> Self {
        Self {
            own_id,
            hash_algorithm,
            functions,
            blocks,
            api_keys,
            matchmaking,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible"),
            l5_deadlines: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Main loop. Runs until shutdown; an `InsufficientFunds` from
    /// matchmaking pauses the whole processor for half an hour.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownGuard) -> anyhow::Result<()> {
        info!("starting broadcast processor");
        let interval = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for_shutdown() => {
                    info!("broadcast processor shutting down");
                    return Ok(());
                }
            }

            match self.process_due().await {
                Ok(()) => {}
                Err(DragonNetError::InsufficientFunds) => {
                    warn!("matchmaking reports insufficient funds, pausing broadcasts");
                    tokio::select! {
                        _ = tokio::time::sleep(INSUFFICIENT_FUNDS_SLEEP) => {}
                        _ = shutdown.wait_for_shutdown() => return Ok(()),
                    }
                }
                Err(e) => {
                    error!(err = %e, "broadcast pass failed");
                }
            }
        }
    }

    /// One pass over every due block. Per-block failures are logged and the
    /// block stays scheduled; outbound requests from the whole pass are
    /// awaited as one group with per-request isolation.
    pub async fn process_due(&self) -> DcResult<()> {
        let due = self.functions.blocks_to_process();
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "processing due blocks");

        let mut outbound: Vec<JoinHandle<()>> = Vec::new();
        for (block_id, score) in due {
            match self.process_block(&block_id, score, &mut outbound).await {
                Ok(()) => {}
                // Halt the batch; nothing can be claimed until refunded.
                Err(DragonNetError::InsufficientFunds) => {
                    join_all(outbound).await;
                    return Err(DragonNetError::InsufficientFunds);
                }
                Err(e) => {
                    error!(%block_id, err = %e, "failed processing block for broadcast");
                }
            }
        }

        join_all(outbound).await;
        Ok(())
    }

    async fn process_block(
        &self,
        block_id: &str,
        score: u64,
        outbound: &mut Vec<JoinHandle<()>>,
    ) -> DcResult<()> {
        let Some(level) = self.functions.current_level(block_id) else {
            warn!(%block_id, "in-flight block has no state, dropping");
            self.functions.remove(block_id);
            return Ok(());
        };

        let claim = self.get_or_create_claim(block_id).await?;
        let mut expected = claim.chain_id_set(level);
        let mut received = HashSet::new();

        // A score of zero means this block has never been broadcast at this
        // level; everyone expected is still uncontacted. Otherwise reconcile
        // against the receipts that arrived while we waited.
        if score != 0 {
            received = self.functions.verifications(block_id, level);
            let needed = self.functions.requirements().needed(level);

            if received.len() >= needed {
                if level >= 5 {
                    self.functions.remove(block_id);
                } else {
                    // Receipt recording normally promotes; this pass catches
                    // a quorum that landed without tripping promotion.
                    self.functions.promote(block_id, level + 1);
                }
                return Ok(());
            }

            let needed_more = needed - received.len();
            let unresponsive: Vec<String> = expected
                .difference(&received)
                .take(needed_more)
                .cloned()
                .collect();
            for chain_id in unresponsive {
                match self
                    .matchmaking
                    .overwrite_no_response_node(block_id, level, &chain_id)
                    .await
                {
                    Ok(updated) => {
                        self.functions.cache_claim(block_id, &updated);
                        expected = updated.chain_id_set(level);
                    }
                    Err(e) => {
                        warn!(%block_id, %chain_id, err = %e, "could not replace unresponsive chain");
                    }
                }
            }
        }

        let targets: HashSet<String> = expected.difference(&received).cloned().collect();
        match self.make_broadcast_futures(block_id, level, &targets, outbound) {
            Some(created) if created > 0 => {
                self.functions
                    .schedule(block_id, time::unix_now() + BROADCAST_RECEIPT_WAIT_TIME);
            }
            Some(_) => {}
            // The broadcast DTO could not be built from storage; the error
            // was counted and the block stays on its current schedule.
            None => {}
        }
        Ok(())
    }

    async fn get_or_create_claim(&self, block_id: &str) -> DcResult<ClaimCheck> {
        if let Some(cached) = self.functions.cached_claim(block_id) {
            return Ok(cached);
        }
        let claim = self
            .matchmaking
            .get_or_create_claim_check(block_id, self.functions.requirements())
            .await?;
        self.functions.cache_claim(block_id, &claim);
        Ok(claim)
    }

    /// Spawn one signed `/v1/enqueue` POST per target chain. Returns the
    /// number spawned, or `None` when the broadcast DTO itself could not be
    /// read back from storage (which counts a storage error).
    fn make_broadcast_futures(
        &self,
        block_id: &str,
        level: i64,
        targets: &HashSet<String>,
        outbound: &mut Vec<JoinHandle<()>>,
    ) -> Option<usize> {
        if targets.is_empty() {
            return Some(0);
        }

        let dto = match self.blocks.get_broadcast_dto(level, block_id) {
            Ok(dto) => dto,
            Err(e) => {
                warn!(%block_id, %level, err = %e, "could not build broadcast dto");
                if let Err(e) = self.functions.increment_storage_error(block_id, level) {
                    error!(%block_id, err = %e, "failed recording storage error");
                }
                return None;
            }
        };
        let body = dto.to_string().into_bytes();

        let mut created = 0;
        for chain_id in targets {
            match self.spawn_enqueue(block_id, level, chain_id, body.clone()) {
                Ok(handle) => {
                    outbound.push(handle);
                    created += 1;
                }
                Err(e) => {
                    warn!(%block_id, %chain_id, err = %e, "skipping chain for this pass");
                }
            }
        }
        Some(created)
    }

    fn spawn_enqueue(
        &self,
        block_id: &str,
        level: i64,
        chain_id: &str,
        body: Vec<u8>,
    ) -> DcResult<JoinHandle<()>> {
        let shared_key = self.api_keys.get_api_key(chain_id, true)?;
        let secret = shared_key.secret_bytes()?;

        let headers = auth::generate_authenticated_request(
            self.hash_algorithm,
            &self.own_id,
            &secret,
            "POST",
            chain_id,
            "/v1/enqueue",
            "application/json",
            &body,
        );

        let http = self.http.clone();
        let matchmaking = self.matchmaking.clone();
        let deadlines = self.l5_deadlines.clone();
        let block_id = block_id.to_string();
        let chain_id = chain_id.to_string();
        Ok(tokio::spawn(async move {
            let address = match matchmaking.get_address(&chain_id).await {
                Ok(address) => address,
                Err(e) => {
                    warn!(%block_id, %chain_id, err = %e, "could not resolve chain address");
                    return;
                }
            };
            let deadline = if level >= 5 {
                l5_deadline(matchmaking.as_ref(), &deadlines, &chain_id).await
            } else {
                ENQUEUE_DEADLINE_SECS
            };

            let url = format!("{}/v1/enqueue", address.trim_end_matches('/'));
            let mut req = http.post(&url).body(body);
            for (name, value) in headers {
                req = req.header(name, value);
            }
            req = req.header("deadline", deadline.to_string());

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%block_id, %chain_id, "enqueue accepted");
                }
                Ok(resp) => {
                    warn!(%block_id, %chain_id, status = %resp.status(), "enqueue rejected");
                }
                Err(e) => {
                    warn!(%block_id, %chain_id, err = %e, "enqueue request failed");
                }
            }
        }))
    }

}

/// L5 chains hold enqueued work across whole anchor intervals, so their
/// deadline is derived from the registered broadcast interval:
/// `(600*6*3) + interval_hours*3600` seconds. Cached per chain for the
/// process lifetime; a malformed registration falls back to 12 hours.
async fn l5_deadline(
    matchmaking: &dyn MatchmakingClient,
    cache: &Mutex<HashMap<String, u64>>,
    chain_id: &str,
) -> u64 {
    if let Some(cached) = cache.lock().get(chain_id) {
        return *cached;
    }
    let deadline = match matchmaking.get_registration(chain_id).await {
        Ok(registration) => registration
            .broadcast_interval
            .map(|hours| (600 * 6 * 3) as f64 + hours * 3600.0)
            .map(|secs| secs as u64)
            .unwrap_or(L5_DEADLINE_FALLBACK_SECS),
        Err(e) => {
            warn!(%chain_id, err = %e, "could not derive l5 deadline from registration");
            L5_DEADLINE_FALLBACK_SECS
        }
    };
    cache.lock().insert(chain_id.to_string(), deadline);
    deadline
}

#[cfg(test)]
mod tests {
    use dragonnet_common::config::{ProofScheme, VerificationRequirements};
    use dragonnet_coord::CoordStore;
    use dragonnet_matchmaking::fakes::FakeMatchmaking;
    use dragonnet_state::{block::BlockProof, Block, BlockHeader, L1Block};
    use dragonnet_storage::{
        dao::{ApiKey, ApiKeyDao},
        MemoryIndexer, MemoryStore,
    };

    use super::*;
    use crate::functions::{self, IN_FLIGHT_KEY};

    struct Harness {
        coord: Arc<CoordStore>,
        matchmaking: Arc<FakeMatchmaking>,
        processor: BroadcastProcessor,
    }

    fn harness() -> Harness {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), Arc::new(MemoryIndexer::new())));
        let api_keys = Arc::new(ApiKeyDao::new(store));
        let matchmaking = Arc::new(FakeMatchmaking::new());
        let functions = Arc::new(BroadcastFunctions::new(
            coord.clone(),
            blocks.clone(),
            VerificationRequirements {
                l2: 2,
                l3: 2,
                l4: 2,
                l5: 1,
            },
        ));
        let processor = BroadcastProcessor::new(
            "self-chain".to_string(),
            HashAlgorithm::Sha256,
            functions,
            blocks,
            api_keys.clone(),
            matchmaking.clone(),
        );

        for chain in ["c1", "c2", "c3"] {
            api_keys
                .save_api_key(&ApiKey::new_interchain(chain.to_string(), "c2VjcmV0".to_string()))
                .unwrap();
            matchmaking.insert_registration(
                chain,
                dragonnet_matchmaking::Registration {
                    level: 2,
                    url: "http://127.0.0.1:1".to_string(),
                    ..Default::default()
                },
            );
        }
        Harness {
            coord,
            matchmaking,
            processor,
        }
    }

    fn insert_l1_block(processor: &BroadcastProcessor, id: &str) {
        processor
            .blocks
            .insert_block(&Block::L1(L1Block {
                header: BlockHeader {
                    level: 1,
                    dc_id: "self-chain".to_string(),
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
            }))
            .unwrap();
    }

    #[tokio::test]
    async fn new_block_is_broadcast_and_rescheduled() {
        let h = harness();
        insert_l1_block(&h.processor, "b1");
        h.processor.functions.enqueue_block("b1").unwrap();
        h.matchmaking.seed_claim("b1", 2, &["c1", "c2"]);

        h.processor.process_due().await.unwrap();

        let score = h.coord.zscore(IN_FLIGHT_KEY, "b1").unwrap();
        assert!(score >= time::unix_now() + BROADCAST_RECEIPT_WAIT_TIME - 1);
        assert!(h.matchmaking.no_response_reports().is_empty());
    }

    #[tokio::test]
    async fn waiting_block_reports_unresponsive_chains() {
        let h = harness();
        insert_l1_block(&h.processor, "b1");
        h.processor.functions.enqueue_block("b1").unwrap();
        h.matchmaking.seed_claim("b1", 2, &["c1", "c2"]);
        h.matchmaking.push_replacement("c3");
        h.matchmaking.push_replacement("c3");

        // One receipt arrived; schedule score marks a prior pass.
        h.processor.functions.record_receipt("b1", 2, "c1").unwrap();
        h.processor.functions.schedule("b1", 1);

        h.processor.process_due().await.unwrap();

        let reports = h.matchmaking.no_response_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "b1");
        assert_eq!(reports[0].1, 2);
    }

    #[tokio::test]
    async fn waiting_block_with_quorum_promotes() {
        let h = harness();
        h.processor.functions.enqueue_block("b1").unwrap();
        h.matchmaking.seed_claim("b1", 2, &["c1", "c2"]);
        h.coord
            .set(&functions::state_key("b1"), "2");
        h.coord.sadd(&functions::verifications_key("b1", 2), "c1");
        h.coord.sadd(&functions::verifications_key("b1", 2), "c2");
        h.processor.functions.schedule("b1", 1);

        h.processor.process_due().await.unwrap();

        assert_eq!(h.processor.functions.current_level("b1"), Some(3));
        assert_eq!(h.coord.zscore(IN_FLIGHT_KEY, "b1"), Some(0));
    }

    #[tokio::test]
    async fn insufficient_funds_halts_the_batch() {
        let h = harness();
        h.processor.functions.enqueue_block("b1").unwrap();
        h.matchmaking.set_insufficient_funds(true);

        assert!(matches!(
            h.processor.process_due().await,
            Err(DragonNetError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn untracked_due_block_is_dropped() {
        let h = harness();
        h.coord.zadd(IN_FLIGHT_KEY, "ghost", 0);

        h.processor.process_due().await.unwrap();
        assert_eq!(h.coord.zscore(IN_FLIGHT_KEY, "ghost"), None);
    }
}
