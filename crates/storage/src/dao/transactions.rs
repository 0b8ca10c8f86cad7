//! Full-form transaction bundles under `TRANSACTION/<block_id>`, stored as
//! newline-delimited json so a bundle can be scanned without parsing the
//! whole file into one document.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_state::{dto, Transaction};
use serde::{Deserialize, Serialize};

use crate::{index::BlockIndexer, object_store::ObjectStore};

pub fn transaction_bundle_key(block_id: &str) -> String {
    format!("TRANSACTION/{block_id}")
}

#[derive(Serialize, Deserialize)]
struct BundleLine {
    txn_id: String,
    txn: serde_json::Value,
}

pub struct TransactionDao {
    store: Arc<dyn ObjectStore>,
    indexer: Arc<dyn BlockIndexer>,
}

impl TransactionDao {
    pub fn new(store: Arc<dyn ObjectStore>, indexer: Arc<dyn BlockIndexer>) -> Self {
        Self { store, indexer }
    }

    /// Persist the full (payload-bearing) transactions of a finalized block.
    pub fn store_transaction_bundle(
        &self,
        block_id: &str,
        txns: &[Transaction],
    ) -> DcResult<()> {
        let mut body = Vec::new();
        for txn in txns {
            let line = BundleLine {
                txn_id: txn.header.txn_id.clone(),
                txn: dto::export_versioned(txn),
            };
            let mut encoded = serde_json::to_vec(&line)
                .map_err(|e| DragonNetError::storage(format!("encoding txn bundle: {e}")))?;
            body.append(&mut encoded);
            body.push(b'\n');

            self.indexer.index_transaction(&txn.header.txn_id, block_id);
        }
        self.store.put(&transaction_bundle_key(block_id), &body)
    }

    pub fn get_transaction(&self, txn_id: &str) -> DcResult<Transaction> {
        let block_id = self
            .indexer
            .find_block_for_transaction(txn_id)
            .ok_or_else(|| DragonNetError::not_found(format!("transaction {txn_id}")))?;

        let bytes = self.store.get(&transaction_bundle_key(&block_id))?;
        for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let parsed: BundleLine = serde_json::from_slice(line)
                .map_err(|e| DragonNetError::storage(format!("corrupt txn bundle line: {e}")))?;
            if parsed.txn_id == txn_id {
                return dto::import_versioned(parsed.txn);
            }
        }
        Err(DragonNetError::not_found(format!("transaction {txn_id}")))
    }
}
