//! Binance Chain adapter. Talks to a full node over Tendermint RPC for
//! blocks and transactions and to its HTTP API for balances and fees.
//! Anchors are self-transfers carrying the payload in the memo.

use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_primitives::{encode, hash};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde_json::{json, Value};
use tracing::*;

use crate::{
    client::{anchor_payload, InterchainClient},
    rpc::JsonRpcClient,
};

pub const CONFIRMATIONS_CONSIDERED_FINAL: u64 = 1;
/// Network blocks without confirmation before an anchor is re-sent.
pub const BLOCK_THRESHOLD: u64 = 3;
/// Fixed transfer fee in decimal-8 BNB, re-checked against the fee table.
const SEND_FEE: u128 = 37_500;
/// Smallest transferable amount, used for anchor self-transfers.
const ANCHOR_AMOUNT: u64 = 1;

pub struct BinanceClient {
    name: String,
    testnet: bool,
    node_url: String,
    rpc: JsonRpcClient,
    api_url: String,
    http: reqwest::Client,
    secret: SecretKey,
    /// Bech32 account address as registered with the network.
    address: String,
}

impl BinanceClient {
    pub fn new(
        name: String,
        testnet: bool,
        node_url: String,
        rpc_port: u16,
        api_port: u16,
        b64_private_key: &str,
        address: String,
    ) -> DcResult<Self> {
        let bytes = encode::b64_decode(b64_private_key)
            .map_err(|e| DragonNetError::bad_request(format!("bad binance key: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| DragonNetError::bad_request(format!("bad binance key: {e}")))?;
        let rpc_url = format!("{node_url}:{rpc_port}");
        let api_url = format!("{node_url}:{api_port}/api/v1");
        Ok(Self {
            name,
            testnet,
            node_url,
            rpc: JsonRpcClient::new(rpc_url, None),
            api_url,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client construction is infallible"),
            secret,
            address,
        })
    }

    pub fn new_from_at_rest(doc: &Value) -> DcResult<Self> {
        match doc.get("version").and_then(Value::as_str) {
            Some("1") => Self::new(
                field(doc, "name")?,
                doc.get("testnet").and_then(Value::as_bool).unwrap_or(false),
                field(doc, "node_url")?,
                port(doc, "rpc_port")?,
                port(doc, "api_port")?,
                &field(doc, "private_key")?,
                field(doc, "address")?,
            ),
            other => Err(DragonNetError::Validation(format!(
                "binance network document version {other:?} not supported"
            ))),
        }
    }

    pub fn address_string(&self) -> &str {
        &self.address
    }

    async fn api_get(&self, path: &str) -> DcResult<Value> {
        let url = format!("{}/{path}", self.api_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DragonNetError::Api(format!("GET {path}: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if !resp.status().is_success() {
            return Err(DragonNetError::Api(format!(
                "GET {path}: http status {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| DragonNetError::Api(format!("GET {path}: non-json response: {e}")))
    }

    /// Build and sign the amino-json transfer envelope for this network.
    fn signed_transfer(&self, to: &str, amount: u64, memo: &str) -> String {
        let msg = json!({
            "from": self.address,
            "to": to,
            "amount": amount,
            "denom": "BNB",
        });
        let sign_doc = json!({
            "chain_id": self.chain_id(),
            "memo": memo,
            "msgs": [msg],
        });
        let doc_bytes =
            serde_json::to_vec(&sign_doc).expect("sign doc serialization is infallible");
        let message = Message::from_digest(hash::raw(&doc_bytes));
        let signature = SECP256K1.sign_ecdsa(&message, &self.secret);
        let public = PublicKey::from_secret_key(SECP256K1, &self.secret);

        let envelope = json!({
            "type": "transfer",
            "msg": msg,
            "memo": memo,
            "signature": {
                "pub_key": encode::b64(&public.serialize()),
                "signature": encode::b64(&signature.serialize_compact()),
            },
        });
        hex::encode(serde_json::to_vec(&envelope).expect("envelope serialization is infallible"))
    }

    fn chain_id(&self) -> &'static str {
        if self.testnet {
            "Binance-Chain-Ganges"
        } else {
            "Binance-Chain-Tigris"
        }
    }
}

fn field(doc: &Value, name: &str) -> DcResult<String> {
    doc.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DragonNetError::Validation(format!("network document missing field {name}")))
}

fn port(doc: &Value, name: &str) -> DcResult<u16> {
    doc.get(name)
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| DragonNetError::Validation(format!("network document missing port {name}")))
}

fn decimal8_to_int(s: &str) -> u128 {
    (s.parse::<f64>().unwrap_or(0.0) * 100_000_000.0).round() as u128
}

fn height_from(v: &Value) -> DcResult<u64> {
    let s = v
        .as_str()
        .ok_or_else(|| DragonNetError::Rpc(format!("expected height string, got {v}")))?;
    s.parse()
        .map_err(|e| DragonNetError::Rpc(format!("bad height {s}: {e}")))
}

#[async_trait]
impl InterchainClient for BinanceClient {
    fn blockchain(&self) -> &'static str {
        "binance"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_network_string(&self) -> String {
        if self.testnet {
            "BNB_TESTNET".to_string()
        } else {
            "BNB_MAINNET".to_string()
        }
    }

    fn get_private_key(&self) -> String {
        encode::b64(&self.secret.secret_bytes())
    }

    fn wallet_address(&self) -> String {
        self.address.clone()
    }

    fn export_as_at_rest(&self) -> Value {
        let api_suffix = self
            .api_url
            .rsplit_once("/api/v1")
            .map(|(base, _)| base)
            .unwrap_or(&self.api_url);
        let rpc_port = self
            .rpc
            .url()
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(0);
        let api_port = api_suffix
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(0);
        json!({
            "version": "1",
            "blockchain": "binance",
            "name": self.name,
            "testnet": self.testnet,
            "node_url": self.node_url,
            "rpc_port": rpc_port,
            "api_port": api_port,
            "private_key": self.get_private_key(),
            "address": self.address,
        })
    }

    async fn ping(&self) -> DcResult<()> {
        self.rpc.call("status", json!({})).await.map(|_| ())
    }

    async fn sign_transaction(&self, raw_transaction: Value) -> DcResult<String> {
        let to = raw_transaction
            .get("to")
            .and_then(Value::as_str)
            .unwrap_or(&self.address);
        let amount = raw_transaction
            .get("amount")
            .and_then(Value::as_u64)
            .unwrap_or(ANCHOR_AMOUNT);
        let memo = raw_transaction
            .get("memo")
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(self.signed_transfer(to, amount, memo))
    }

    async fn publish_l5_hash_to_public_network(&self, l5_block_hash: &str) -> DcResult<String> {
        let memo = anchor_payload(l5_block_hash);
        info!(payload = %memo, "publishing anchor transaction");
        let signed = self.signed_transfer(&self.address, ANCHOR_AMOUNT, &memo);
        let resp = self
            .rpc
            .call("broadcast_tx_sync", json!({ "tx": format!("0x{signed}") }))
            .await?;
        resp.get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DragonNetError::Rpc(format!("unexpected broadcast_tx_sync response: {resp}"))
            })
    }

    async fn is_transaction_confirmed(&self, transaction_hash: &str) -> DcResult<bool> {
        let resp = self
            .rpc
            .call(
                "tx",
                json!({ "hash": format!("0x{}", transaction_hash.trim_start_matches("0x")) }),
            )
            .await
            .map_err(|_| DragonNetError::RpcTransactionNotFound(transaction_hash.to_string()))?;
        let mined_at = height_from(resp.get("height").unwrap_or(&Value::Null))?;
        let latest = self.get_current_block().await?;
        Ok(latest.saturating_sub(mined_at) >= CONFIRMATIONS_CONSIDERED_FINAL)
    }

    async fn check_balance(&self) -> DcResult<u128> {
        let resp = self
            .api_get(&format!("account/{}", self.address))
            .await?;
        if resp.is_null() {
            // Unknown account: nothing has ever been sent to it.
            return Ok(0);
        }
        let balance = resp
            .get("balances")
            .and_then(Value::as_array)
            .and_then(|balances| {
                balances
                    .iter()
                    .find(|b| b.get("symbol").and_then(Value::as_str) == Some("BNB"))
            })
            .and_then(|b| b.get("free").and_then(Value::as_str))
            .map(decimal8_to_int)
            .unwrap_or(0);
        Ok(balance)
    }

    async fn get_transaction_fee_estimate(&self) -> DcResult<u128> {
        let fees = self.api_get("fees").await?;
        let fixed_send_fee = fees.as_array().and_then(|entries| {
            entries.iter().find_map(|entry| {
                let params = entry.get("fixed_fee_params")?;
                if params.get("msg_type").and_then(Value::as_str) == Some("send") {
                    params.get("fee").and_then(Value::as_u64).map(u128::from)
                } else {
                    None
                }
            })
        });
        match fixed_send_fee {
            Some(fee) => Ok(fee),
            None => {
                warn!("fee table lookup failed, using the saved send fee");
                Ok(SEND_FEE)
            }
        }
    }

    async fn get_current_block(&self) -> DcResult<u64> {
        let resp = self.rpc.call("block", json!({})).await?;
        let height = resp
            .get("block")
            .and_then(|b| b.get("header"))
            .and_then(|h| h.get("height"))
            .unwrap_or(&Value::Null);
        height_from(height)
    }

    async fn should_retry_broadcast(&self, last_sent_block: u64) -> DcResult<bool> {
        Ok(self.get_current_block().await? - last_sent_block > BLOCK_THRESHOLD)
    }
}
