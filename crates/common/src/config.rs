//! Per-process node configuration, parsed from the environment once at
//! startup and handed to constructors. Nothing in the node reads env vars
//! after this point.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::env::{env_opt, parse_env_or};

/// Block sealing scheme for produced blocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofScheme {
    Trust,
    Work,
}

impl FromStr for ProofScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trust" => Ok(Self::Trust),
            "work" => Ok(Self::Work),
            other => Err(format!("unknown proof scheme {other}")),
        }
    }
}

impl fmt::Display for ProofScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trust => write!(f, "trust"),
            Self::Work => write!(f, "work"),
        }
    }
}

/// Hash algorithms accepted on the authenticated wire (§request signing) and
/// used for content digests in auth headers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha256,
    Sha3_256,
    Blake2b512,
}

impl HashAlgorithm {
    /// Token as it appears inside the `DC1-HMAC-<HASH>` authorization header.
    pub fn wire_token(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha3_256 => "SHA3-256",
            Self::Blake2b512 => "BLAKE2b512",
        }
    }

    pub fn from_wire_token(s: &str) -> Option<Self> {
        match s {
            "SHA256" => Some(Self::Sha256),
            "SHA3-256" => Some(Self::Sha3_256),
            "BLAKE2b512" => Some(Self::Blake2b512),
            _ => None,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha3-256" | "sha3_256" => Ok(Self::Sha3_256),
            "blake2b512" => Ok(Self::Blake2b512),
            other => Err(format!("unknown hash algorithm {other}")),
        }
    }
}

/// How many distinct higher-level receipts promote a block past each level.
/// Configuration, not protocol: matchmaking claims are requested with these
/// numbers and the broadcast processor enforces them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequirements {
    pub l2: usize,
    pub l3: usize,
    pub l4: usize,
    pub l5: usize,
}

impl VerificationRequirements {
    pub fn needed(&self, level: i64) -> usize {
        match level {
            2 => self.l2,
            3 => self.l3,
            4 => self.l4,
            5 => self.l5,
            _ => 0,
        }
    }
}

impl Default for VerificationRequirements {
    fn default() -> Self {
        Self {
            l2: 3,
            l3: 2,
            l4: 2,
            l5: 1,
        }
    }
}

/// Storage backend selection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StorageKind {
    Memory,
    Disk,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "disk" | "local" => Ok(Self::Disk),
            other => Err(format!("unknown storage type {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// This chain's role in the verification hierarchy, 1..=5.
    pub level: i64,

    /// Public chain id of this node.
    pub internal_id: String,

    /// Human-readable chain name.
    pub name: String,

    /// Publicly reachable URL of this node.
    pub endpoint: String,

    /// Port the ingress webserver listens on.
    pub web_port: u16,

    pub proof_scheme: ProofScheme,

    /// Leading zero bits required of a `work` proof.
    pub pow_difficulty: u32,

    pub hash_algorithm: HashAlgorithm,

    /// Whether the L2->L5 verification cascade runs for our L1 blocks.
    pub broadcast_enabled: bool,

    /// Hours between L5 anchor broadcasts.
    pub broadcast_interval_hours: f64,

    pub storage_kind: StorageKind,
    pub storage_location: String,

    pub matchmaking_endpoint: String,

    /// Requests per minute per api key. 0 disables limiting.
    pub rate_limit: u32,

    pub requirements: VerificationRequirements,

    /// Verification notification fanout targets: key "all" plus "l2".."l5".
    pub verification_notifications: BTreeMap<String, Vec<String>>,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let mut verification_notifications = BTreeMap::new();
        for key in ["all", "l2", "l3", "l4", "l5"] {
            let var = format!(
                "VERIFICATION_NOTIFICATION_{}",
                key.to_ascii_uppercase()
            );
            if let Some(urls) = env_opt(&var) {
                verification_notifications.insert(
                    key.to_string(),
                    urls.split(',').map(|s| s.trim().to_string()).collect(),
                );
            }
        }

        Self {
            level: parse_env_or("LEVEL", 1),
            internal_id: env_opt("INTERNAL_ID").unwrap_or_default(),
            name: env_opt("DRAGONCHAIN_NAME").unwrap_or_default(),
            endpoint: env_opt("DRAGONCHAIN_ENDPOINT").unwrap_or_default(),
            web_port: parse_env_or("WEB_PORT", 8080),
            proof_scheme: parse_env_or("PROOF_SCHEME", ProofScheme::Trust),
            pow_difficulty: parse_env_or("POW_DIFFICULTY", 8),
            hash_algorithm: parse_env_or("HASH", HashAlgorithm::Blake2b512),
            broadcast_enabled: parse_env_or("BROADCAST", true),
            broadcast_interval_hours: parse_env_or("BROADCAST_INTERVAL", 2.0),
            storage_kind: parse_env_or("STORAGE_TYPE", StorageKind::Memory),
            storage_location: env_opt("STORAGE_LOCATION")
                .unwrap_or_else(|| "./dragonnet-data".to_string()),
            matchmaking_endpoint: env_opt("MATCHMAKING_ENDPOINT")
                .unwrap_or_else(|| "https://matchmaking.api.dragonchain.com".to_string()),
            rate_limit: parse_env_or("RATE_LIMIT", 0),
            requirements: VerificationRequirements::default(),
            verification_notifications,
        }
    }
}
