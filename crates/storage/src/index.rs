//! Indexing seam for the DAO layer. Full-text block/transaction search is a
//! surrounding collaborator; the core only needs the transaction-to-block
//! mapping kept here so reads can find a transaction's bundle.

use std::collections::HashMap;

use dragonnet_state::Block;
use parking_lot::Mutex;

pub trait BlockIndexer: Send + Sync + 'static {
    fn index_block(&self, block: &Block);

    fn index_transaction(&self, txn_id: &str, block_id: &str);

    fn find_block_for_transaction(&self, txn_id: &str) -> Option<String>;
}

#[derive(Default)]
pub struct MemoryIndexer {
    txn_to_block: Mutex<HashMap<String, String>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockIndexer for MemoryIndexer {
    fn index_block(&self, block: &Block) {
        if let Block::L1(l1) = block {
            let mut map = self.txn_to_block.lock();
            for txn in &l1.transactions {
                map.insert(txn.header.txn_id.clone(), l1.header.block_id.clone());
            }
        }
    }

    fn index_transaction(&self, txn_id: &str, block_id: &str) {
        self.txn_to_block
            .lock()
            .insert(txn_id.to_string(), block_id.to_string());
    }

    fn find_block_for_transaction(&self, txn_id: &str) -> Option<String> {
        self.txn_to_block.lock().get(txn_id).cloned()
    }
}
