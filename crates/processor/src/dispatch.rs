//! Upward receipt dispatch: a higher-level chain returns its signed
//! verification block to the L1 chain that requested it.

use std::{sync::Arc, time::Duration};

use dragonnet_common::{config::HashAlgorithm, errors::DcResult};
use dragonnet_keys::auth;
use dragonnet_matchmaking::MatchmakingClient;
use dragonnet_storage::dao::ApiKeyDao;
use serde_json::Value;
use tracing::*;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ReceiptDispatcher {
    own_id: String,
    hash_algorithm: HashAlgorithm,
    api_keys: Arc<ApiKeyDao>,
    matchmaking: Arc<dyn MatchmakingClient>,
    http: reqwest::Client,
}

impl ReceiptDispatcher {
    pub fn new(
        own_id: String,
        hash_algorithm: HashAlgorithm,
        api_keys: Arc<ApiKeyDao>,
        matchmaking: Arc<dyn MatchmakingClient>,
    ) -> Self {
        Self {
            own_id,
            hash_algorithm,
            api_keys,
            matchmaking,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible"),
        }
    }

    /// POST our verification block to the originating L1 chain's
    /// `/v1/receipt`. Failures are surfaced to the caller so the tick is
    /// retried with the processing queue intact.
    pub async fn dispatch_receipt(&self, l1_dc_id: &str, block_doc: &Value) -> DcResult<()> {
        let shared_key = self.api_keys.get_api_key(l1_dc_id, true)?;
        let secret = shared_key.secret_bytes()?;
        let body = block_doc.to_string().into_bytes();

        let headers = auth::generate_authenticated_request(
            self.hash_algorithm,
            &self.own_id,
            &secret,
            "POST",
            l1_dc_id,
            "/v1/receipt",
            "application/json",
            &body,
        );

        let address = self.matchmaking.get_address(l1_dc_id).await?;
        let url = format!("{}/v1/receipt", address.trim_end_matches('/'));
        let mut req = self.http.post(&url).body(body);
        for (name, value) in headers {
            req = req.header(name, value);
        }

        let resp = req.send().await.map_err(|e| {
            dragonnet_common::errors::DragonNetError::Api(format!("receipt dispatch: {e}"))
        })?;
        if !resp.status().is_success() {
            warn!(%l1_dc_id, status = %resp.status(), "receipt rejected by l1 chain");
        }
        Ok(())
    }
}
