//! Business transactions as submitted at L1 and as they travel upward.
//!
//! A transaction exists in two parallel forms: the full form keeps the
//! opaque payload for local storage and queries; the stripped form replaces
//! the payload with its hash and is what blocks commit to and higher levels
//! re-validate. The full hash binds the two: it covers the canonical header
//! bytes chained with the payload hash, so either form proves membership.

use dragonnet_primitives::{encode, hash, ids, time};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub txn_type: String,
    pub dc_id: String,
    pub txn_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoker: Option<String>,
}

/// Full-form transaction (payload included).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub header: TransactionHeader,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Cross-level form: payload replaced by its hash.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StrippedTransaction {
    pub header: TransactionHeader,
    pub payload_hash: String,
    pub full_hash: String,
    pub signature: String,
}

impl Transaction {
    /// Admit a new transaction on this chain: stamps id, origin and
    /// timestamp. Block id and proof fields are set during block assembly.
    pub fn admit(txn_type: String, payload: Value, tag: String, invoker: Option<String>, dc_id: String) -> Self {
        Self {
            header: TransactionHeader {
                txn_type,
                dc_id,
                txn_id: ids::new_txn_id(),
                block_id: None,
                timestamp: time::unix_now_string(),
                tag,
                invoker,
            },
            payload,
            full_hash: None,
            signature: None,
        }
    }

    pub fn payload_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.payload).expect("payload is valid json");
        encode::b64(&hash::raw(&bytes))
    }

    /// The content hash both forms carry: canonical header bytes chained
    /// with the payload hash.
    pub fn compute_full_hash(&self) -> String {
        let header_bytes =
            serde_json::to_vec(&self.header).expect("header serialization is infallible");
        let payload_hash = self.payload_hash();
        encode::b64(&hash::chained(&header_bytes, payload_hash.as_bytes()))
    }

    /// Produce the stripped form. Only valid once hashed and signed.
    pub fn strip(&self) -> Option<StrippedTransaction> {
        Some(StrippedTransaction {
            header: self.header.clone(),
            payload_hash: self.payload_hash(),
            full_hash: self.full_hash.clone()?,
            signature: self.signature.clone()?,
        })
    }
}

impl StrippedTransaction {
    /// Recompute the full hash from the stripped fields, for verification.
    pub fn compute_full_hash(&self) -> String {
        let header_bytes =
            serde_json::to_vec(&self.header).expect("header serialization is infallible");
        encode::b64(&hash::chained(&header_bytes, self.payload_hash.as_bytes()))
    }
}
