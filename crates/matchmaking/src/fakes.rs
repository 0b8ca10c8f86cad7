//! In-memory matchmaking used by processor and broadcast tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dragonnet_common::{
    config::VerificationRequirements,
    errors::{DcResult, DragonNetError},
};
use parking_lot::Mutex;
use serde_json::json;

use crate::{
    client::MatchmakingClient,
    types::{ClaimCheck, ClaimMetadata},
    Registration,
};

#[derive(Default)]
struct FakeState {
    registrations: HashMap<String, Registration>,
    claims: HashMap<String, ClaimCheck>,
    /// Chain ids handed out as replacements, in order.
    replacements: VecDeque<String>,
    no_response_reports: Vec<(String, i64, String)>,
    funded_updates: Vec<bool>,
    insufficient_funds: bool,
}

#[derive(Default)]
pub struct FakeMatchmaking {
    state: Mutex<FakeState>,
}

impl FakeMatchmaking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_registration(&self, dc_id: &str, registration: Registration) {
        self.state
            .lock()
            .registrations
            .insert(dc_id.to_string(), registration);
    }

    /// Seed a claim selecting `chains` at `level` for `block_id`.
    pub fn seed_claim(&self, block_id: &str, level: i64, chains: &[&str]) {
        let mut state = self.state.lock();
        let claim = state
            .claims
            .entry(block_id.to_string())
            .or_insert_with(|| ClaimCheck {
                metadata: ClaimMetadata {
                    dc_id: "fake-matchmaking".to_string(),
                },
                validations: Default::default(),
            });
        let entry = claim.validations.entry(format!("l{level}")).or_default();
        for chain in chains {
            entry.insert(chain.to_string(), json!({}));
        }
    }

    pub fn push_replacement(&self, chain_id: &str) {
        self.state
            .lock()
            .replacements
            .push_back(chain_id.to_string());
    }

    pub fn set_insufficient_funds(&self, broke: bool) {
        self.state.lock().insufficient_funds = broke;
    }

    pub fn no_response_reports(&self) -> Vec<(String, i64, String)> {
        self.state.lock().no_response_reports.clone()
    }

    pub fn funded_updates(&self) -> Vec<bool> {
        self.state.lock().funded_updates.clone()
    }
}

#[async_trait]
impl MatchmakingClient for FakeMatchmaking {
    async fn get_registration(&self, dc_id: &str) -> DcResult<Registration> {
        self.state
            .lock()
            .registrations
            .get(dc_id)
            .cloned()
            .ok_or_else(|| DragonNetError::Matchmaking(format!("unknown chain {dc_id}")))
    }

    async fn get_or_create_claim_check(
        &self,
        block_id: &str,
        _requirements: &VerificationRequirements,
    ) -> DcResult<ClaimCheck> {
        let state = self.state.lock();
        if state.insufficient_funds {
            return Err(DragonNetError::InsufficientFunds);
        }
        state
            .claims
            .get(block_id)
            .cloned()
            .ok_or_else(|| DragonNetError::Matchmaking(format!("no claim for {block_id}")))
    }

    async fn overwrite_no_response_node(
        &self,
        block_id: &str,
        level: i64,
        chain_id: &str,
    ) -> DcResult<ClaimCheck> {
        let mut state = self.state.lock();
        state
            .no_response_reports
            .push((block_id.to_string(), level, chain_id.to_string()));

        let replacement = state.replacements.pop_front();
        let claim = state
            .claims
            .get_mut(block_id)
            .ok_or_else(|| DragonNetError::Matchmaking(format!("no claim for {block_id}")))?;
        if let Some(chains) = claim.validations.get_mut(&format!("l{level}")) {
            chains.remove(chain_id);
            if let Some(replacement) = replacement {
                chains.insert(replacement, json!({}));
            }
        }
        Ok(claim.clone())
    }

    async fn update_funded_flag(&self, funded: bool) -> DcResult<()> {
        self.state.lock().funded_updates.push(funded);
        Ok(())
    }
}
