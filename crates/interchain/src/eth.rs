//! Ethereum adapter. Legacy transactions are RLP-encoded and signed locally
//! with EIP-155 replay protection; all node interaction is plain JSON-RPC.

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_primitives::encode;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tracing::*;

use crate::{
    client::{anchor_payload, InterchainClient},
    rpc::{hex_quantity_u128, hex_quantity_u64, JsonRpcClient},
};

pub const CONFIRMATIONS_CONSIDERED_FINAL: u64 = 12;
/// Network blocks without confirmation before an anchor is re-sent.
pub const BLOCK_THRESHOLD: u64 = 30;
const STANDARD_GAS_LIMIT: u128 = 60_000;

pub struct EthereumClient {
    name: String,
    network: String,
    chain_id: u64,
    rpc: JsonRpcClient,
    secret: SecretKey,
    /// Lowercase 0x address derived from the key.
    address: String,
}

impl EthereumClient {
    pub fn new(
        name: String,
        network: String,
        network_address: String,
        chain_id: u64,
        b64_private_key: &str,
    ) -> DcResult<Self> {
        let bytes = encode::b64_decode(b64_private_key)
            .map_err(|e| DragonNetError::bad_request(format!("bad ethereum key: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| DragonNetError::bad_request(format!("bad ethereum key: {e}")))?;
        let address = derive_address(&PublicKey::from_secret_key(SECP256K1, &secret));
        Ok(Self {
            name,
            network,
            chain_id,
            rpc: JsonRpcClient::new(network_address, None),
            secret,
            address,
        })
    }

    pub fn new_from_at_rest(doc: &Value) -> DcResult<Self> {
        match doc.get("version").and_then(Value::as_str) {
            Some("1") => Self::new(
                field(doc, "name")?,
                field(doc, "network")?,
                field(doc, "network_address")?,
                doc.get("chain_id").and_then(Value::as_u64).ok_or_else(|| {
                    DragonNetError::Validation("network document missing chain_id".to_string())
                })?,
                &field(doc, "private_key")?,
            ),
            other => Err(DragonNetError::Validation(format!(
                "ethereum network document version {other:?} not supported"
            ))),
        }
    }

    pub fn address_string(&self) -> &str {
        &self.address
    }

    async fn next_nonce(&self) -> DcResult<u128> {
        let resp = self
            .rpc
            .call(
                "eth_getTransactionCount",
                json!([self.address, "pending"]),
            )
            .await?;
        Ok(hex_quantity_u128(&resp)?)
    }

    async fn gas_price(&self) -> DcResult<u128> {
        let resp = self.rpc.call("eth_gasPrice", json!([])).await?;
        hex_quantity_u128(&resp)
    }

    /// EIP-155 sign the given legacy transaction fields, returning the raw
    /// 0x-prefixed wire encoding.
    fn sign_legacy(
        &self,
        nonce: u128,
        gas_price: u128,
        gas: u128,
        to: &[u8],
        value: u128,
        data: &[u8],
    ) -> String {
        let mut unsigned = rlp::RlpStream::new_list(9);
        append_uint(&mut unsigned, nonce);
        append_uint(&mut unsigned, gas_price);
        append_uint(&mut unsigned, gas);
        unsigned.append(&to.to_vec());
        append_uint(&mut unsigned, value);
        unsigned.append(&data.to_vec());
        append_uint(&mut unsigned, self.chain_id as u128);
        append_uint(&mut unsigned, 0);
        append_uint(&mut unsigned, 0);

        let digest: [u8; 32] = Keccak256::digest(unsigned.out()).into();
        let msg = Message::from_digest(digest);
        let (recovery, compact) = SECP256K1
            .sign_ecdsa_recoverable(&msg, &self.secret)
            .serialize_compact();
        let v = self.chain_id * 2 + 35 + recovery.to_i32() as u64;

        let mut signed = rlp::RlpStream::new_list(9);
        append_uint(&mut signed, nonce);
        append_uint(&mut signed, gas_price);
        append_uint(&mut signed, gas);
        signed.append(&to.to_vec());
        append_uint(&mut signed, value);
        signed.append(&data.to_vec());
        append_uint(&mut signed, v as u128);
        signed.append(&trim_leading_zeros(&compact[..32]));
        signed.append(&trim_leading_zeros(&compact[32..]));

        format!("0x{}", hex::encode(signed.out()))
    }
}

fn field(doc: &Value, name: &str) -> DcResult<String> {
    doc.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DragonNetError::Validation(format!("network document missing field {name}")))
}

fn derive_address(public: &PublicKey) -> String {
    let uncompressed = public.serialize_uncompressed();
    let digest = Keccak256::digest(&uncompressed[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

fn append_uint(stream: &mut rlp::RlpStream, v: u128) {
    stream.append(&trim_leading_zeros(&v.to_be_bytes()));
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn parse_address(s: &str) -> DcResult<Vec<u8>> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| DragonNetError::bad_request(format!("bad address {s}: {e}")))?;
    if bytes.len() != 20 {
        return Err(DragonNetError::bad_request(format!(
            "address {s} is not 20 bytes"
        )));
    }
    Ok(bytes)
}

#[async_trait]
impl InterchainClient for EthereumClient {
    fn blockchain(&self) -> &'static str {
        "ethereum"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_network_string(&self) -> String {
        self.network.clone()
    }

    fn get_private_key(&self) -> String {
        encode::b64(&self.secret.secret_bytes())
    }

    fn wallet_address(&self) -> String {
        self.address.clone()
    }

    fn export_as_at_rest(&self) -> Value {
        json!({
            "version": "1",
            "blockchain": "ethereum",
            "name": self.name,
            "network": self.network,
            "network_address": self.rpc.url(),
            "chain_id": self.chain_id,
            "private_key": self.get_private_key(),
        })
    }

    async fn ping(&self) -> DcResult<()> {
        self.rpc.call("eth_blockNumber", json!([])).await.map(|_| ())
    }

    async fn sign_transaction(&self, raw_transaction: Value) -> DcResult<String> {
        let to = parse_address(
            raw_transaction
                .get("to")
                .and_then(Value::as_str)
                .unwrap_or("0x0000000000000000000000000000000000000000"),
        )?;
        let value = match raw_transaction.get("value") {
            Some(v) => hex_quantity_u128(v)?,
            None => 0,
        };
        let data = match raw_transaction.get("data").and_then(Value::as_str) {
            Some(d) => hex::decode(d.trim_start_matches("0x"))
                .map_err(|e| DragonNetError::bad_request(format!("bad tx data: {e}")))?,
            None => Vec::new(),
        };
        let nonce = match raw_transaction.get("nonce") {
            Some(n) => hex_quantity_u128(n)?,
            None => self.next_nonce().await?,
        };
        let (gas_price, gas) = match (
            raw_transaction.get("gasPrice"),
            raw_transaction.get("gas"),
        ) {
            (Some(p), Some(g)) => (hex_quantity_u128(p)?, hex_quantity_u128(g)?),
            _ => (self.gas_price().await?, STANDARD_GAS_LIMIT),
        };

        Ok(self.sign_legacy(nonce, gas_price, gas, &to, value, &data))
    }

    async fn publish_l5_hash_to_public_network(&self, l5_block_hash: &str) -> DcResult<String> {
        let payload = anchor_payload(l5_block_hash);
        info!(payload = %payload, "publishing anchor transaction");
        let signed = self
            .sign_transaction(json!({
                "to": "0x0000000000000000000000000000000000000000",
                "data": format!("0x{}", hex::encode(payload.as_bytes())),
            }))
            .await?;
        let resp = self
            .rpc
            .call("eth_sendRawTransaction", json!([signed]))
            .await?;
        resp.as_str().map(str::to_string).ok_or_else(|| {
            DragonNetError::Rpc(format!("unexpected sendRawTransaction response: {resp}"))
        })
    }

    async fn is_transaction_confirmed(&self, transaction_hash: &str) -> DcResult<bool> {
        let resp = self
            .rpc
            .call("eth_getTransactionByHash", json!([transaction_hash]))
            .await?;
        if resp.is_null() {
            return Err(DragonNetError::RpcTransactionNotFound(
                transaction_hash.to_string(),
            ));
        }
        let Some(block_number) = resp.get("blockNumber").filter(|b| !b.is_null()) else {
            // Known to the mempool but not yet mined.
            return Ok(false);
        };
        let mined_at = hex_quantity_u64(block_number)?;
        let latest = self.get_current_block().await?;
        Ok(latest.saturating_sub(mined_at) >= CONFIRMATIONS_CONSIDERED_FINAL)
    }

    async fn check_balance(&self) -> DcResult<u128> {
        let resp = self
            .rpc
            .call("eth_getBalance", json!([self.address, "latest"]))
            .await?;
        hex_quantity_u128(&resp)
    }

    async fn get_transaction_fee_estimate(&self) -> DcResult<u128> {
        Ok(self.gas_price().await? * STANDARD_GAS_LIMIT)
    }

    async fn get_current_block(&self) -> DcResult<u64> {
        let resp = self.rpc.call("eth_blockNumber", json!([])).await?;
        hex_quantity_u64(&resp)
    }

    async fn should_retry_broadcast(&self, last_sent_block: u64) -> DcResult<bool> {
        Ok(self.get_current_block().await? - last_sent_block > BLOCK_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";

    fn client() -> EthereumClient {
        EthereumClient::new(
            "anchor".to_string(),
            "ETH_MAINNET".to_string(),
            "http://localhost:8545".to_string(),
            1,
            KEY,
        )
        .unwrap()
    }

    #[test]
    fn derived_address_is_20_bytes_lowercase() {
        let client = client();
        let addr = client.address_string();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
        assert_eq!(addr, addr.to_lowercase());
    }

    #[test]
    fn at_rest_round_trip_preserves_identity() {
        let original = client();
        let restored = EthereumClient::new_from_at_rest(&original.export_as_at_rest()).unwrap();
        assert_eq!(original.address_string(), restored.address_string());
        assert_eq!(restored.get_network_string(), "ETH_MAINNET");
    }

    #[test]
    fn signed_legacy_tx_is_deterministic_for_fixed_fields() {
        let client = client();
        let a = client.sign_legacy(0, 1, 21_000, &[0u8; 20], 0, b"DC-L5:hash");
        let b = client.sign_legacy(0, 1, 21_000, &[0u8; 20], 0, b"DC-L5:hash");
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));

        let c = client.sign_legacy(1, 1, 21_000, &[0u8; 20], 0, b"DC-L5:hash");
        assert_ne!(a, c);
    }
}
