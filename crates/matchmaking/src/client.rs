use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use dragonnet_common::{
    config::VerificationRequirements,
    errors::{DcResult, DragonNetError},
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::json;
use tracing::*;

use crate::types::{ClaimCheck, Registration};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait MatchmakingClient: Send + Sync + 'static {
    async fn get_registration(&self, dc_id: &str) -> DcResult<Registration>;

    /// The claim check for one of our L1 blocks, created on first request
    /// with the given per-level requirements.
    async fn get_or_create_claim_check(
        &self,
        block_id: &str,
        requirements: &VerificationRequirements,
    ) -> DcResult<ClaimCheck>;

    /// Report a selected chain as non-responsive; matchmaking re-selects and
    /// returns the updated claim.
    async fn overwrite_no_response_node(
        &self,
        block_id: &str,
        level: i64,
        chain_id: &str,
    ) -> DcResult<ClaimCheck>;

    /// L5 only: flip our funded flag.
    async fn update_funded_flag(&self, funded: bool) -> DcResult<()>;

    /// Resolve a chain id to its reachable base URL.
    async fn get_address(&self, dc_id: &str) -> DcResult<String> {
        Ok(self.get_registration(dc_id).await?.url)
    }
}

/// HTTP client against the real service. Registrations are cached for the
/// process lifetime; they only change when a chain re-registers, and a stale
/// URL surfaces as an unreachable peer which the broadcast retry loop
/// already tolerates.
pub struct HttpMatchmaking {
    base_url: String,
    own_id: String,
    client: reqwest::Client,
    registration_cache: Mutex<HashMap<String, Registration>>,
}

impl HttpMatchmaking {
    pub fn new(base_url: String, own_id: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction is infallible");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            own_id,
            client,
            registration_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn parse_claim(&self, resp: reqwest::Response) -> DcResult<ClaimCheck> {
        match resp.status() {
            StatusCode::PAYMENT_REQUIRED => Err(DragonNetError::InsufficientFunds),
            status if status.is_success() => resp
                .json()
                .await
                .map_err(|e| DragonNetError::Matchmaking(format!("malformed claim check: {e}"))),
            status => Err(DragonNetError::Matchmaking(format!(
                "claim check request failed with {status}"
            ))),
        }
    }
}

#[async_trait]
impl MatchmakingClient for HttpMatchmaking {
    async fn get_registration(&self, dc_id: &str) -> DcResult<Registration> {
        if let Some(cached) = self.registration_cache.lock().get(dc_id) {
            return Ok(cached.clone());
        }

        let url = format!("{}/registration/{dc_id}", self.base_url);
        let registration: Registration = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DragonNetError::Matchmaking(format!("fetching registration: {e}")))?
            .error_for_status()
            .map_err(|e| DragonNetError::Matchmaking(format!("registration lookup: {e}")))?
            .json()
            .await
            .map_err(|e| DragonNetError::Matchmaking(format!("malformed registration: {e}")))?;

        self.registration_cache
            .lock()
            .insert(dc_id.to_string(), registration.clone());
        Ok(registration)
    }

    async fn get_or_create_claim_check(
        &self,
        block_id: &str,
        requirements: &VerificationRequirements,
    ) -> DcResult<ClaimCheck> {
        let url = format!("{}/claim-check", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "dcId": self.own_id,
                "blockId": block_id,
                "nodesRequired": {
                    "l2": requirements.l2,
                    "l3": requirements.l3,
                    "l4": requirements.l4,
                    "l5": requirements.l5,
                },
            }))
            .send()
            .await
            .map_err(|e| DragonNetError::Matchmaking(format!("requesting claim check: {e}")))?;
        self.parse_claim(resp).await
    }

    async fn overwrite_no_response_node(
        &self,
        block_id: &str,
        level: i64,
        chain_id: &str,
    ) -> DcResult<ClaimCheck> {
        debug!(%block_id, %level, %chain_id, "reporting non-responsive node");
        let url = format!("{}/claim-check/{block_id}/no-response", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "dcId": self.own_id,
                "level": level,
                "chainId": chain_id,
            }))
            .send()
            .await
            .map_err(|e| DragonNetError::Matchmaking(format!("reporting no-response: {e}")))?;
        self.parse_claim(resp).await
    }

    async fn update_funded_flag(&self, funded: bool) -> DcResult<()> {
        let url = format!("{}/registration/{}/funded", self.base_url, self.own_id);
        self.client
            .patch(&url)
            .json(&json!({ "funded": funded }))
            .send()
            .await
            .map_err(|e| DragonNetError::Matchmaking(format!("updating funded flag: {e}")))?
            .error_for_status()
            .map_err(|e| DragonNetError::Matchmaking(format!("updating funded flag: {e}")))?;
        Ok(())
    }
}
