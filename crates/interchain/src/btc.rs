//! Bitcoin adapter. Transactions are built and signed locally against the
//! configured node's reported utxo set; anchors ride in an OP_RETURN output
//! with change returned to our own address.

use bitcoin::{
    absolute::LockTime,
    address::NetworkUnchecked,
    hashes::Hash,
    script::{Builder, PushBytesBuf},
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Address, Amount, Network, OutPoint, PublicKey as BtcPublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use async_trait::async_trait;
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_primitives::encode;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::*;

use crate::{
    client::{anchor_payload, InterchainClient},
    rpc::JsonRpcClient,
};

pub const CONFIRMATIONS_CONSIDERED_FINAL: u64 = 6;
/// Network blocks without confirmation before an anchor is re-sent.
pub const BLOCK_THRESHOLD: u64 = 10;
const MINIMUM_SATOSHI_PER_BYTE: u64 = 10;
/// Assumed vsize when estimating the fee for a typical anchor transaction.
const STANDARD_BYTE_COUNT: u64 = 262;

pub struct BitcoinClient {
    name: String,
    testnet: bool,
    rpc: JsonRpcClient,
    secret: SecretKey,
    public: BtcPublicKey,
    address: Address,
}

#[derive(Deserialize)]
struct Utxo {
    txid: String,
    vout: u32,
    amount: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: String,
}

fn btc_to_satoshi(btc: f64) -> u128 {
    (btc * 100_000_000.0).round() as u128
}

impl BitcoinClient {
    pub fn new(
        name: String,
        rpc_address: String,
        testnet: bool,
        b64_private_key: &str,
        authorization: Option<String>,
    ) -> DcResult<Self> {
        let bytes = encode::b64_decode(b64_private_key)
            .map_err(|e| DragonNetError::bad_request(format!("bad bitcoin key: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| DragonNetError::bad_request(format!("bad bitcoin key: {e}")))?;
        let public = BtcPublicKey::new(PublicKey::from_secret_key(SECP256K1, &secret));
        let network = if testnet {
            Network::Testnet
        } else {
            Network::Bitcoin
        };
        Ok(Self {
            name,
            testnet,
            rpc: JsonRpcClient::new(rpc_address, authorization),
            secret,
            public,
            address: Address::p2pkh(&public, network),
        })
    }

    pub fn new_from_at_rest(doc: &Value) -> DcResult<Self> {
        match doc.get("version").and_then(Value::as_str) {
            Some("1") => Self::new(
                string_field(doc, "name")?,
                string_field(doc, "rpc_address")?,
                doc.get("testnet").and_then(Value::as_bool).unwrap_or(false),
                &string_field(doc, "private_key")?,
                doc.get("authorization")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            other => Err(DragonNetError::Validation(format!(
                "bitcoin network document version {other:?} not supported"
            ))),
        }
    }

    pub fn address_string(&self) -> String {
        self.address.to_string()
    }

    /// Watch-only import of our address so the node tracks its utxos.
    pub async fn register_address(&self, rescan: bool) -> DcResult<()> {
        let addr = self.address_string();
        let result = self
            .rpc
            .call("importaddress", json!([addr, addr, rescan]))
            .await;
        // importaddress returns null on success; a long rescan can time out
        // while still succeeding server-side, which callers treat as fatal.
        match result {
            Ok(Value::Null) => Ok(()),
            Ok(other) => Err(DragonNetError::AddressRegistrationFailure(format!(
                "unexpected importaddress response: {other}"
            ))),
            Err(e) => Err(DragonNetError::AddressRegistrationFailure(e.to_string())),
        }
    }

    async fn satoshi_per_byte(&self) -> DcResult<u64> {
        let resp = self.rpc.call("estimatesmartfee", json!([2])).await?;
        let btc_per_kb = resp
            .get("feerate")
            .and_then(Value::as_f64)
            .ok_or_else(|| DragonNetError::Rpc("estimatesmartfee gave no feerate".to_string()))?;
        let rate = (btc_to_satoshi(btc_per_kb) as f64 / 1024.0).ceil() as u64;
        Ok(rate.max(MINIMUM_SATOSHI_PER_BYTE))
    }

    async fn get_utxos(&self) -> DcResult<Vec<Utxo>> {
        let resp = self
            .rpc
            .call(
                "listunspent",
                json!([1, 9_999_999, [self.address_string()]]),
            )
            .await?;
        serde_json::from_value(resp)
            .map_err(|e| DragonNetError::Rpc(format!("malformed listunspent response: {e}")))
    }

    /// Assemble and sign a transaction paying `outputs` at `fee_rate`
    /// sat/byte, spending our confirmed utxos with change back to us.
    async fn build_signed_transaction(
        &self,
        outputs: Vec<TxOut>,
        fee_rate: u64,
    ) -> DcResult<Transaction> {
        let utxos = self.get_utxos().await?;
        if utxos.is_empty() {
            return Err(DragonNetError::NotEnoughCrypto);
        }

        let out_total: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
        let data_bytes: u64 = outputs
            .iter()
            .map(|o| o.script_pubkey.len() as u64)
            .sum();

        let mut inputs = Vec::new();
        let mut in_total: u64 = 0;
        let mut fee = 0;
        for utxo in &utxos {
            let txid: Txid = utxo
                .txid
                .parse()
                .map_err(|e| DragonNetError::Rpc(format!("bad utxo txid: {e}")))?;
            inputs.push(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
            in_total += btc_to_satoshi(utxo.amount) as u64;

            let size = 148 * inputs.len() as u64 + 34 * (outputs.len() as u64 + 1) + 10 + data_bytes;
            fee = size * fee_rate;
            if in_total >= out_total + fee {
                break;
            }
        }
        if in_total < out_total + fee {
            return Err(DragonNetError::NotEnoughCrypto);
        }

        let mut tx_outputs = outputs;
        let change = in_total - out_total - fee;
        if change > 0 {
            tx_outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: self.address.script_pubkey(),
            });
        }

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: tx_outputs,
        };

        let script_pubkey = self.address.script_pubkey();
        let sighash_type = EcdsaSighashType::All;
        let mut script_sigs = Vec::with_capacity(tx.input.len());
        {
            let cache = SighashCache::new(&tx);
            for i in 0..tx.input.len() {
                let sighash = cache
                    .legacy_signature_hash(i, &script_pubkey, sighash_type.to_u32())
                    .map_err(|e| DragonNetError::Rpc(format!("sighash computation: {e}")))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let mut sig = SECP256K1
                    .sign_ecdsa(&msg, &self.secret)
                    .serialize_der()
                    .to_vec();
                sig.push(sighash_type.to_u32() as u8);

                let sig_push = PushBytesBuf::try_from(sig)
                    .map_err(|e| DragonNetError::Rpc(format!("signature push: {e}")))?;
                let key_push = PushBytesBuf::try_from(self.public.to_bytes())
                    .map_err(|e| DragonNetError::Rpc(format!("pubkey push: {e}")))?;
                script_sigs.push(
                    Builder::new()
                        .push_slice(sig_push)
                        .push_slice(key_push)
                        .into_script(),
                );
            }
        }
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }
        Ok(tx)
    }
}

fn string_field(doc: &Value, field: &str) -> DcResult<String> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            DragonNetError::Validation(format!("network document missing field {field}"))
        })
}

#[async_trait]
impl InterchainClient for BitcoinClient {
    fn blockchain(&self) -> &'static str {
        "bitcoin"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_network_string(&self) -> String {
        if self.testnet {
            "BTC_TESTNET3".to_string()
        } else {
            "BTC_MAINNET".to_string()
        }
    }

    fn get_private_key(&self) -> String {
        encode::b64(&self.secret.secret_bytes())
    }

    fn wallet_address(&self) -> String {
        self.address_string()
    }

    fn export_as_at_rest(&self) -> Value {
        json!({
            "version": "1",
            "blockchain": "bitcoin",
            "name": self.name,
            "rpc_address": self.rpc.url(),
            "testnet": self.testnet,
            "private_key": self.get_private_key(),
            "authorization": self.rpc.authorization(),
        })
    }

    async fn ping(&self) -> DcResult<()> {
        self.rpc.call("ping", json!([])).await.map(|_| ())
    }

    async fn sign_transaction(&self, raw_transaction: Value) -> DcResult<String> {
        let fee_rate = match raw_transaction.get("fee").and_then(Value::as_u64) {
            Some(rate) => rate,
            None => self.satoshi_per_byte().await?,
        };

        let mut outputs = Vec::new();
        if let Some(requested) = raw_transaction.get("outputs").and_then(Value::as_array) {
            for out in requested {
                let to = string_field(out, "to")?;
                let value = out.get("value").and_then(Value::as_f64).ok_or_else(|| {
                    DragonNetError::bad_request("output missing btc value".to_string())
                })?;
                let addr = to
                    .parse::<Address<NetworkUnchecked>>()
                    .map_err(|e| DragonNetError::bad_request(format!("bad address {to}: {e}")))?;
                outputs.push(TxOut {
                    value: Amount::from_sat(btc_to_satoshi(value) as u64),
                    script_pubkey: addr.assume_checked().script_pubkey(),
                });
            }
        }
        if let Some(data) = raw_transaction.get("data").and_then(Value::as_str) {
            let push = PushBytesBuf::try_from(data.as_bytes().to_vec())
                .map_err(|e| DragonNetError::bad_request(format!("op_return data: {e}")))?;
            outputs.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::new_op_return(push),
            });
        }

        let tx = self.build_signed_transaction(outputs, fee_rate).await?;
        Ok(bitcoin::consensus::encode::serialize_hex(&tx))
    }

    async fn publish_l5_hash_to_public_network(&self, l5_block_hash: &str) -> DcResult<String> {
        let payload = anchor_payload(l5_block_hash);
        info!(payload = %payload, "publishing anchor transaction");
        let signed = self
            .sign_transaction(json!({ "data": payload }))
            .await?;
        let txid = self.rpc.call("sendrawtransaction", json!([signed])).await?;
        txid.as_str()
            .map(str::to_string)
            .ok_or_else(|| DragonNetError::Rpc(format!("unexpected sendrawtransaction response: {txid}")))
    }

    async fn is_transaction_confirmed(&self, transaction_hash: &str) -> DcResult<bool> {
        let resp = self
            .rpc
            .call("getrawtransaction", json!([transaction_hash, true]))
            .await
            .map_err(|_| {
                DragonNetError::RpcTransactionNotFound(transaction_hash.to_string())
            })?;
        let confirmations = resp
            .get("confirmations")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(confirmations >= CONFIRMATIONS_CONSIDERED_FINAL)
    }

    async fn check_balance(&self) -> DcResult<u128> {
        let resp = self
            .rpc
            .call(
                "getreceivedbyaddress",
                json!([self.address_string(), CONFIRMATIONS_CONSIDERED_FINAL]),
            )
            .await?;
        let btc = resp
            .as_f64()
            .ok_or_else(|| DragonNetError::Rpc(format!("unexpected balance response: {resp}")))?;
        Ok(btc_to_satoshi(btc))
    }

    async fn get_transaction_fee_estimate(&self) -> DcResult<u128> {
        Ok((self.satoshi_per_byte().await? * STANDARD_BYTE_COUNT) as u128)
    }

    async fn get_current_block(&self) -> DcResult<u64> {
        let resp = self.rpc.call("getblockcount", json!([])).await?;
        resp.as_u64()
            .ok_or_else(|| DragonNetError::Rpc(format!("unexpected block count: {resp}")))
    }

    async fn should_retry_broadcast(&self, last_sent_block: u64) -> DcResult<bool> {
        Ok(self.get_current_block().await? - last_sent_block > BLOCK_THRESHOLD)
    }
}
