//! Block types for levels 1 through 5.
//!
//! Every block carries a common header and a proof envelope. Proofs are
//! computed over the block's canonical signing bytes: the JSON serialization
//! of everything except the proof envelope itself and, for L5, the fields
//! mutated after anchoring (`transaction_hash`, `block_last_sent_at`).

use std::collections::{BTreeMap, BTreeSet};

use dragonnet_common::{
    config::ProofScheme,
    errors::{DcResult, DragonNetError},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{dto, transaction::StrippedTransaction};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Role of the producing chain, 1..=5.
    pub level: i64,
    pub dc_id: String,
    pub block_id: String,
    pub timestamp: String,
    /// Proof of the previous block on this chain; empty for the first block.
    #[serde(default)]
    pub prev_proof: String,
}

/// Seal over a block's canonical bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockProof {
    pub scheme: ProofScheme,
    /// Base64 signature (`trust`) or signature-and-nonce digest (`work`).
    pub proof: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

/// Reference to a block on another chain by its proof.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProofRef {
    pub dc_id: String,
    pub block_id: String,
    pub proof: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L1Block {
    pub header: BlockHeader,
    pub transactions: Vec<StrippedTransaction>,
    pub proof: BlockProof,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L2Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: String,
    pub l1_proof: String,
    /// This chain's diversity score at validation time, from matchmaking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ddss: Option<f64>,
    /// Per-transaction re-validation outcome, keyed by txn id.
    pub validations: BTreeMap<String, bool>,
    pub proof: BlockProof,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L3Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: String,
    pub l1_proof: String,
    /// Count of L2 blocks aggregated here.
    pub l2_count: usize,
    /// Summed diversity score of the verified L2 chains.
    pub ddss: f64,
    pub regions: BTreeSet<String>,
    pub clouds: BTreeSet<String>,
    pub l2_proofs: Vec<ProofRef>,
    pub proof: BlockProof,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct L3Validation {
    pub l3_dc_id: String,
    pub l3_block_id: String,
    pub l3_proof: String,
    pub valid: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L4Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: String,
    pub l1_proof: String,
    pub l3_validations: Vec<L3Validation>,
    pub proof: BlockProof,
}

/// One pending L4 receipt staged into an L5 block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct L4Projection {
    pub l1_dc_id: String,
    pub l1_block_id: String,
    pub l4_dc_id: String,
    pub l4_block_id: String,
    pub l4_proof: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_invalid: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct L5Block {
    pub header: BlockHeader,
    pub l4_blocks: Vec<L4Projection>,
    /// Every interchain transaction hash this block was anchored under, in
    /// publication order. Reduced to the confirming hash at finalization.
    #[serde(default)]
    pub transaction_hash: Vec<String>,
    /// External-chain height observed when the anchor was last sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_last_sent_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Absent until the anchor is confirmed and the block finalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<BlockProof>,
}

// Signable views. Field sets must stay in sync with the structs above,
// minus the non-canonical fields.

#[derive(Serialize)]
struct SignableL1<'a> {
    header: &'a BlockHeader,
    transactions: &'a [StrippedTransaction],
}

#[derive(Serialize)]
struct SignableL2<'a> {
    header: &'a BlockHeader,
    l1_dc_id: &'a str,
    l1_block_id: &'a str,
    l1_proof: &'a str,
    current_ddss: &'a Option<f64>,
    validations: &'a BTreeMap<String, bool>,
}

#[derive(Serialize)]
struct SignableL3<'a> {
    header: &'a BlockHeader,
    l1_dc_id: &'a str,
    l1_block_id: &'a str,
    l1_proof: &'a str,
    l2_count: usize,
    ddss: f64,
    regions: &'a BTreeSet<String>,
    clouds: &'a BTreeSet<String>,
    l2_proofs: &'a [ProofRef],
}

#[derive(Serialize)]
struct SignableL4<'a> {
    header: &'a BlockHeader,
    l1_dc_id: &'a str,
    l1_block_id: &'a str,
    l1_proof: &'a str,
    l3_validations: &'a [L3Validation],
}

#[derive(Serialize)]
struct SignableL5<'a> {
    header: &'a BlockHeader,
    l4_blocks: &'a [L4Projection],
    network: &'a Option<String>,
}

impl L1Block {
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableL1 {
            header: &self.header,
            transactions: &self.transactions,
        })
        .expect("signable serialization is infallible")
    }
}

impl L2Block {
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableL2 {
            header: &self.header,
            l1_dc_id: &self.l1_dc_id,
            l1_block_id: &self.l1_block_id,
            l1_proof: &self.l1_proof,
            current_ddss: &self.current_ddss,
            validations: &self.validations,
        })
        .expect("signable serialization is infallible")
    }
}

impl L3Block {
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableL3 {
            header: &self.header,
            l1_dc_id: &self.l1_dc_id,
            l1_block_id: &self.l1_block_id,
            l1_proof: &self.l1_proof,
            l2_count: self.l2_count,
            ddss: self.ddss,
            regions: &self.regions,
            clouds: &self.clouds,
            l2_proofs: &self.l2_proofs,
        })
        .expect("signable serialization is infallible")
    }
}

impl L4Block {
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableL4 {
            header: &self.header,
            l1_dc_id: &self.l1_dc_id,
            l1_block_id: &self.l1_block_id,
            l1_proof: &self.l1_proof,
            l3_validations: &self.l3_validations,
        })
        .expect("signable serialization is infallible")
    }
}

impl L5Block {
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableL5 {
            header: &self.header,
            l4_blocks: &self.l4_blocks,
            network: &self.network,
        })
        .expect("signable serialization is infallible")
    }
}

/// A block of any level, as read back from storage or received on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    L1(L1Block),
    L2(L2Block),
    L3(L3Block),
    L4(L4Block),
    L5(L5Block),
}

impl Block {
    pub fn level(&self) -> i64 {
        self.header().level
    }

    pub fn header(&self) -> &BlockHeader {
        match self {
            Block::L1(b) => &b.header,
            Block::L2(b) => &b.header,
            Block::L3(b) => &b.header,
            Block::L4(b) => &b.header,
            Block::L5(b) => &b.header,
        }
    }

    pub fn block_id(&self) -> &str {
        &self.header().block_id
    }

    pub fn dc_id(&self) -> &str {
        &self.header().dc_id
    }

    /// The proof string of the sealed block; empty for an unsealed L5.
    pub fn proof(&self) -> &str {
        match self {
            Block::L1(b) => &b.proof.proof,
            Block::L2(b) => &b.proof.proof,
            Block::L3(b) => &b.proof.proof,
            Block::L4(b) => &b.proof.proof,
            Block::L5(b) => b.proof.as_ref().map(|p| p.proof.as_str()).unwrap_or(""),
        }
    }

    pub fn export_as_at_rest(&self) -> Value {
        match self {
            Block::L1(b) => dto::export_versioned(b),
            Block::L2(b) => dto::export_versioned(b),
            Block::L3(b) => dto::export_versioned(b),
            Block::L4(b) => dto::export_versioned(b),
            Block::L5(b) => dto::export_versioned(b),
        }
    }

    /// Parse an at-rest block, dispatching on `header.level`.
    pub fn new_from_at_rest(v: Value) -> DcResult<Self> {
        let level = v
            .get("header")
            .and_then(|h| h.get("level"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DragonNetError::Validation("block document missing header.level".to_string())
            })?;
        match level {
            1 => Ok(Block::L1(dto::import_versioned(v)?)),
            2 => Ok(Block::L2(dto::import_versioned(v)?)),
            3 => Ok(Block::L3(dto::import_versioned(v)?)),
            4 => Ok(Block::L4(dto::import_versioned(v)?)),
            5 => Ok(Block::L5(dto::import_versioned(v)?)),
            other => Err(DragonNetError::InvalidNodeLevel(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(level: i64) -> BlockHeader {
        BlockHeader {
            level,
            dc_id: "chain".to_string(),
            block_id: "42".to_string(),
            timestamp: "1000".to_string(),
            prev_proof: String::new(),
        }
    }

    fn proof() -> BlockProof {
        BlockProof {
            scheme: ProofScheme::Trust,
            proof: "c2ln".to_string(),
            nonce: None,
        }
    }

    #[test]
    fn at_rest_round_trip_preserves_block() {
        let block = Block::L2(L2Block {
            header: header(2),
            l1_dc_id: "l1".to_string(),
            l1_block_id: "41".to_string(),
            l1_proof: "cHJvb2Y=".to_string(),
            current_ddss: Some(12.5),
            validations: [("txn-1".to_string(), true)].into_iter().collect(),
            proof: proof(),
        });

        let restored = Block::new_from_at_rest(block.export_as_at_rest()).unwrap();
        assert_eq!(restored, block);
    }

    #[test]
    fn at_rest_rejects_unknown_version() {
        let block = Block::L1(L1Block {
            header: header(1),
            transactions: vec![],
            proof: proof(),
        });
        let mut doc = block.export_as_at_rest();
        doc["version"] = Value::String("9".to_string());
        assert!(Block::new_from_at_rest(doc).is_err());
    }

    #[test]
    fn signing_bytes_exclude_the_proof() {
        let mut a = L1Block {
            header: header(1),
            transactions: vec![],
            proof: proof(),
        };
        let before = a.signing_bytes();
        a.proof.proof = "different".to_string();
        assert_eq!(a.signing_bytes(), before);

        a.header.block_id = "43".to_string();
        assert_ne!(a.signing_bytes(), before);
    }

    #[test]
    fn l5_signing_bytes_ignore_anchor_bookkeeping() {
        let mut b = L5Block {
            header: header(5),
            l4_blocks: vec![],
            transaction_hash: vec![],
            block_last_sent_at: None,
            network: Some("BTC_MAINNET".to_string()),
            proof: None,
        };
        let before = b.signing_bytes();
        b.transaction_hash.push("0xabc".to_string());
        b.block_last_sent_at = Some(8754);
        assert_eq!(b.signing_bytes(), before);
    }
}
