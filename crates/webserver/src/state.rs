use std::sync::Arc;

use dragonnet_broadcast::BroadcastFunctions;
use dragonnet_common::config::NodeConfig;
use dragonnet_coord::CoordStore;
use dragonnet_interchain::InterchainClient;
use dragonnet_processor::{callback::CallbackRegistry, WorkQueue};
use dragonnet_storage::{
    dao::{ApiKeyDao, BlockDao, TransactionDao, TransactionTypeDao},
    ObjectStore,
};

/// Everything the handlers need, shared behind one Arc.
pub struct AppState {
    pub config: NodeConfig,
    pub coord: Arc<CoordStore>,
    pub store: Arc<dyn ObjectStore>,
    pub blocks: Arc<BlockDao>,
    pub transactions: Arc<TransactionDao>,
    pub transaction_types: Arc<TransactionTypeDao>,
    pub api_keys: Arc<ApiKeyDao>,
    pub functions: Arc<BroadcastFunctions>,
    pub queue: Arc<WorkQueue>,
    pub callbacks: Arc<CallbackRegistry>,
    /// L5 only: the default anchor network, for status reporting.
    pub default_interchain: Option<Arc<dyn InterchainClient>>,
}
