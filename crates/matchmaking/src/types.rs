use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chain's matchmaking registration. Fields beyond `url` and `level` are
/// only present where the registering chain reports them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registration {
    pub level: i64,
    pub url: String,
    /// Base64 secp256k1 public key blocks from this chain verify under.
    pub public_key: String,
    pub region: Option<String>,
    pub cloud: Option<String>,
    /// Diversity-duration-storage score.
    pub ddss: Option<f64>,
    /// L5 only: which public network this chain anchors to.
    pub network: Option<String>,
    /// L5 only: hours between anchor broadcasts.
    pub broadcast_interval: Option<f64>,
    pub funded: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMetadata {
    pub dc_id: String,
}

/// Matchmaking's binding of one L1 block to the higher-level chains selected
/// to verify it: `validations["l2".."l5"]` maps chain id to claim metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub metadata: ClaimMetadata,
    pub validations: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ClaimCheck {
    /// The chain ids selected at `level`.
    pub fn chain_id_set(&self, level: i64) -> HashSet<String> {
        self.validations
            .get(&format!("l{level}"))
            .map(|chains| chains.keys().cloned().collect())
            .unwrap_or_default()
    }
}
