//! Thin JSON-RPC-over-HTTP client shared by the network adapters.

use std::time::Duration;

use dragonnet_common::errors::{DcResult, DragonNetError};
use serde_json::{json, Value};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct JsonRpcClient {
    url: String,
    /// Base64 `user:pass` for nodes behind basic auth.
    authorization: Option<String>,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: String, authorization: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction is infallible");
        Self {
            url,
            authorization,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Issue a call and unwrap the json-rpc envelope. A populated `error`
    /// member is an RPC failure regardless of HTTP status.
    pub async fn call(&self, method: &str, params: Value) -> DcResult<Value> {
        let mut req = self.client.post(&self.url).json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": "dragonnet",
        }));
        if let Some(auth) = &self.authorization {
            req = req.header("Authorization", format!("Basic {auth}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DragonNetError::Rpc(format!("{method}: {e}")))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DragonNetError::Rpc(format!("{method}: non-json response: {e}")))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(DragonNetError::Rpc(format!("{method}: {error}")));
        }
        if !status.is_success() {
            return Err(DragonNetError::Rpc(format!(
                "{method}: http status {status}"
            )));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Parse a `0x`-prefixed quantity.
pub(crate) fn hex_quantity_u64(v: &Value) -> DcResult<u64> {
    let s = v
        .as_str()
        .ok_or_else(|| DragonNetError::Rpc(format!("expected hex quantity, got {v}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| DragonNetError::Rpc(format!("bad hex quantity {s}: {e}")))
}

pub(crate) fn hex_quantity_u128(v: &Value) -> DcResult<u128> {
    let s = v
        .as_str()
        .ok_or_else(|| DragonNetError::Rpc(format!("expected hex quantity, got {v}")))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| DragonNetError::Rpc(format!("bad hex quantity {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantities_parse_with_and_without_prefix() {
        assert_eq!(hex_quantity_u64(&json!("0x10")).unwrap(), 16);
        assert_eq!(hex_quantity_u64(&json!("ff")).unwrap(), 255);
        assert!(hex_quantity_u64(&json!(12)).is_err());
        assert_eq!(hex_quantity_u128(&json!("0xde0b6b3a7640000")).unwrap(), 10u128.pow(18));
    }
}
