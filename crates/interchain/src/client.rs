use async_trait::async_trait;
use dragonnet_common::errors::DcResult;
use serde_json::Value;

/// Prefix identifying our anchor payloads on public networks.
pub const PUBLISH_PREFIX: &str = "DC-L5";

/// Uniform contract every public-network adapter implements.
///
/// Amounts are integers in the network's smallest unit (satoshi / wei /
/// decimal-8 BNB). Confirmation polling distinguishes three outcomes:
/// confirmed (`Ok(true)`), pending (`Ok(false)`) and dropped
/// (`Err(RpcTransactionNotFound)`).
#[async_trait]
pub trait InterchainClient: Send + Sync + 'static {
    /// Slug for the storage prefix: `bitcoin`, `ethereum` or `binance`.
    fn blockchain(&self) -> &'static str;

    /// User-assigned name of this client instance.
    fn name(&self) -> &str;

    fn get_network_string(&self) -> String;

    /// Base64 private key, for export surfaces.
    fn get_private_key(&self) -> String;

    /// The wallet address anchors are funded from.
    fn wallet_address(&self) -> String;

    fn export_as_at_rest(&self) -> Value;

    /// Cheap reachability probe against the configured node.
    async fn ping(&self) -> DcResult<()>;

    /// Sign a network-native raw transaction description.
    async fn sign_transaction(&self, raw_transaction: Value) -> DcResult<String>;

    /// Anchor an L5 block hash; returns the network transaction id.
    async fn publish_l5_hash_to_public_network(&self, l5_block_hash: &str) -> DcResult<String>;

    async fn is_transaction_confirmed(&self, transaction_hash: &str) -> DcResult<bool>;

    async fn check_balance(&self) -> DcResult<u128>;

    async fn get_transaction_fee_estimate(&self) -> DcResult<u128>;

    async fn get_current_block(&self) -> DcResult<u64>;

    /// True once enough network blocks have passed since `last_sent_block`
    /// to warrant re-sending an unconfirmed anchor.
    async fn should_retry_broadcast(&self, last_sent_block: u64) -> DcResult<bool>;
}

pub(crate) fn anchor_payload(l5_block_hash: &str) -> String {
    format!("{PUBLISH_PREFIX}:{l5_block_hash}")
}
