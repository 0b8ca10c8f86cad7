use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dragonnet_tasks::ShutdownGuard;
use tower_http::trace::TraceLayer;
use tracing::*;

use crate::{
    routes::{
        blocks::{get_block_v1, get_verifications_v1},
        dragonnet::{enqueue_v1, get_claim_v1, receipt_v1},
        interchain_auth::interchain_auth_v1,
        misc::{health, status_v1},
        transactions::{create_transaction_bulk_v1, create_transaction_v1, get_transaction_v1},
    },
    state::AppState,
};

/// Level-dependent route table: L1 receives receipts and serves claims,
/// everyone else receives enqueued work.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status_v1))
        .route("/v1/interchain-auth-register", post(interchain_auth_v1))
        .route("/v1/block/:block_id", get(get_block_v1))
        .route("/v1/verifications/:block_id", get(get_verifications_v1));

    if state.config.level == 1 {
        router = router
            .route("/v1/receipt", post(receipt_v1))
            .route("/v1/claim/:block_id", get(get_claim_v1))
            .route("/v1/transaction", post(create_transaction_v1))
            .route("/v1/transaction_bulk", post(create_transaction_bulk_v1))
            .route("/v1/transaction/:txn_id", get(get_transaction_v1));
    } else {
        router = router.route("/v1/enqueue", post(enqueue_v1));
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_webserver(state: Arc<AppState>, shutdown: ShutdownGuard) -> anyhow::Result<()> {
    let port = state.config.web_port;
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(%port, "webserver listening");

    let mut shutdown = shutdown;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use dragonnet_broadcast::BroadcastFunctions;
    use dragonnet_common::config::{
        HashAlgorithm, NodeConfig, ProofScheme, StorageKind, VerificationRequirements,
    };
    use dragonnet_coord::CoordStore;
    use dragonnet_keys::auth::generate_authenticated_request;
    use dragonnet_processor::{callback::CallbackRegistry, WorkQueue};
    use dragonnet_state::{
        block::BlockProof, dto, BlockHeader, L2Block,
    };
    use dragonnet_storage::{
        dao::{ApiKey, ApiKeyDao, BlockDao, TransactionDao, TransactionTypeDao, TransactionTypeModel},
        MemoryIndexer, MemoryStore,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    const SECRET_B64: &str = "c2hhcmVkLXNlY3JldA==";

    fn config(level: i64) -> NodeConfig {
        NodeConfig {
            level,
            internal_id: "l1-chain".to_string(),
            name: "test-chain".to_string(),
            endpoint: "http://localhost".to_string(),
            web_port: 0,
            proof_scheme: ProofScheme::Trust,
            pow_difficulty: 8,
            hash_algorithm: HashAlgorithm::Sha256,
            broadcast_enabled: true,
            broadcast_interval_hours: 2.0,
            storage_kind: StorageKind::Memory,
            storage_location: String::new(),
            matchmaking_endpoint: String::new(),
            rate_limit: 0,
            requirements: VerificationRequirements {
                l2: 1,
                l3: 1,
                l4: 1,
                l5: 1,
            },
            verification_notifications: BTreeMap::new(),
        }
    }

    fn app_state(level: i64) -> Arc<AppState> {
        let coord = Arc::new(CoordStore::new());
        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(MemoryIndexer::new());
        let blocks = Arc::new(BlockDao::new(store.clone(), indexer.clone()));
        let config = config(level);
        let functions = Arc::new(BroadcastFunctions::new(
            coord.clone(),
            blocks.clone(),
            config.requirements,
        ));
        let api_keys = Arc::new(ApiKeyDao::new(store.clone()));
        api_keys
            .save_api_key(&ApiKey::new_interchain(
                "l2-chain".to_string(),
                SECRET_B64.to_string(),
            ))
            .unwrap();

        Arc::new(AppState {
            queue: Arc::new(WorkQueue::new(coord.clone(), config.level)),
            callbacks: Arc::new(CallbackRegistry::new(coord.clone())),
            transactions: Arc::new(TransactionDao::new(store.clone(), indexer)),
            transaction_types: Arc::new(TransactionTypeDao::new(store.clone())),
            default_interchain: None,
            config,
            coord,
            store,
            blocks,
            api_keys,
            functions,
        })
    }

    fn l2_receipt_body() -> Vec<u8> {
        let block = L2Block {
            header: BlockHeader {
                level: 2,
                dc_id: "l2-chain".to_string(),
                block_id: "5".to_string(),
                timestamp: "1000".to_string(),
                prev_proof: String::new(),
            },
            l1_dc_id: "l1-chain".to_string(),
            l1_block_id: "41".to_string(),
            l1_proof: "cHJvb2Y=".to_string(),
            current_ddss: None,
            validations: BTreeMap::new(),
            proof: BlockProof {
                scheme: ProofScheme::Trust,
                proof: "c2ln".to_string(),
                nonce: None,
            },
        };
        dto::export_versioned(&block).to_string().into_bytes()
    }

    fn signed_request(path: &str, body: Vec<u8>) -> Request<Body> {
        let headers = generate_authenticated_request(
            HashAlgorithm::Sha256,
            "l2-chain",
            &dragonnet_primitives::encode::b64_decode(SECRET_B64).unwrap(),
            "POST",
            "l1-chain",
            path,
            "application/json",
            &body,
        );
        let mut builder = Request::builder().method("POST").uri(path);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.header("deadline", "30").body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let router = build_router(app_state(1));
        let resp = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn authenticated_receipt_updates_state_and_replay_is_rejected() {
        let state = app_state(1);
        state.functions.enqueue_block("41").unwrap();
        let router = build_router(state.clone());

        // Sign once and send the byte-identical request twice: the replay
        // must carry the same signature to exercise the cache.
        let body = l2_receipt_body();
        let headers = generate_authenticated_request(
            HashAlgorithm::Sha256,
            "l2-chain",
            &dragonnet_primitives::encode::b64_decode(SECRET_B64).unwrap(),
            "POST",
            "l1-chain",
            "/v1/receipt",
            "application/json",
            &body,
        );
        let build = |body: Vec<u8>| {
            let mut builder = Request::builder().method("POST").uri("/v1/receipt");
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder.body(Body::from(body)).unwrap()
        };

        let resp = router.clone().oneshot(build(body.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Quorum of one promoted the block to level 3.
        assert_eq!(state.functions.current_level("41"), Some(3));
        assert_eq!(state.functions.verifications("41", 2).len(), 1);

        let resp = router.oneshot(build(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn receipt_for_wrong_level_is_precondition_failed() {
        let state = app_state(1);
        state.functions.enqueue_block("41").unwrap();
        state.coord.set("broadcast:block:41:state", "3");
        let router = build_router(state);

        let resp = router
            .oneshot(signed_request("/v1/receipt", l2_receipt_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn unsigned_requests_are_unauthorized() {
        let router = build_router(app_state(1));
        let resp = router
            .oneshot(
                Request::post("/v1/receipt")
                    .body(Body::from(l2_receipt_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn enqueue_requires_a_deadline_and_queues_work() {
        let state = app_state(2);
        let router = build_router(state.clone());

        let body = serde_json::json!({ "l1_block": { "fake": true } })
            .to_string()
            .into_bytes();
        let resp = router
            .oneshot(signed_request("/v1/enqueue", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.queue.has_pending_work());
    }

    #[tokio::test]
    async fn interchain_auth_registration_is_open() {
        let state = app_state(2);
        let router = build_router(state.clone());

        let resp = router
            .oneshot(
                Request::post("/v1/interchain-auth-register")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"dcid": "peer", "key": "a2V5"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(state.api_keys.get_api_key("peer", true).is_ok());
    }

    #[tokio::test]
    async fn transaction_admission_validates_the_type() {
        let state = app_state(1);
        state
            .api_keys
            .save_api_key(&ApiKey {
                key_id: "user-key".to_string(),
                key: SECRET_B64.to_string(),
                registration_time: 0,
                nickname: String::new(),
                root: true,
                interchain: false,
                permissions_document:
                    dragonnet_storage::dao::PermissionsDocument::default_allow_all(),
            })
            .unwrap();
        state
            .transaction_types
            .register(&TransactionTypeModel {
                txn_type: "ledger".to_string(),
                custom_indexes: Value::Null,
                contract_id: None,
            })
            .unwrap();
        let router = build_router(state.clone());

        let ok_body = serde_json::json!({"txn_type": "ledger", "payload": {"a": 1}})
            .to_string()
            .into_bytes();
        let resp = router
            .clone()
            .oneshot(user_signed_request("/v1/transaction", ok_body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(state.queue.has_pending_work());

        let bad_body = serde_json::json!({"txn_type": "ghost", "payload": {}})
            .to_string()
            .into_bytes();
        let resp = router
            .oneshot(user_signed_request("/v1/transaction", bad_body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    fn user_signed_request(path: &str, body: Vec<u8>) -> Request<Body> {
        let headers = generate_authenticated_request(
            HashAlgorithm::Sha256,
            "user-key",
            &dragonnet_primitives::encode::b64_decode(SECRET_B64).unwrap(),
            "POST",
            "l1-chain",
            path,
            "application/json",
            &body,
        );
        let mut builder = Request::builder().method("POST").uri(path);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body)).unwrap()
    }
}
