//! API keys under `KEYS/` and the fixed-schema permissions evaluator.
//!
//! Interchain keys (the shared HMAC secrets exchanged during mutual
//! registration) are stored under `KEYS/INTERCHAIN/<dc_id>` and may only
//! invoke the interchain-reserved endpoints. Root keys bypass permission
//! evaluation entirely.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_primitives::{encode, time};
use dragonnet_state::dto;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object_store::{get_json_object, put_object_as_json, ObjectStore};

pub fn api_key_storage_key(key_id: &str, interchain: bool) -> String {
    if interchain {
        format!("KEYS/INTERCHAIN/{key_id}")
    } else {
        format!("KEYS/{key_id}")
    }
}

/// Fixed-schema permissions document, version 1:
///
/// ```json
/// {
///   "version": "1",
///   "default_allowed": true,
///   "permissions": {
///     "<group>": {
///       "allowed": false,
///       "<endpoint>": { "allowed": true, "transaction_types": {"t": false} }
///     }
///   }
/// }
/// ```
///
/// Resolution order is endpoint, then group, then the global default; the
/// most specific setting wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionsDocument(pub Value);

impl PermissionsDocument {
    pub fn default_allow_all() -> Self {
        Self(serde_json::json!({
            "version": "1",
            "default_allowed": true,
            "permissions": {},
        }))
    }

    fn group(&self, group: &str) -> Option<&Value> {
        self.0.get("permissions")?.get(group)
    }

    fn endpoint(&self, group: &str, endpoint: &str) -> Option<&Value> {
        self.group(group)?.get(endpoint)
    }

    pub fn is_allowed(&self, group: &str, endpoint: &str) -> bool {
        if let Some(allowed) = self
            .endpoint(group, endpoint)
            .and_then(|e| e.get("allowed"))
            .and_then(Value::as_bool)
        {
            return allowed;
        }
        if let Some(allowed) = self
            .group(group)
            .and_then(|g| g.get("allowed"))
            .and_then(Value::as_bool)
        {
            return allowed;
        }
        self.0
            .get("default_allowed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `create_transaction` may carry a per-type allow/deny map that
    /// overrides the endpoint decision for that type alone.
    pub fn is_transaction_type_allowed(&self, txn_type: &str) -> bool {
        if let Some(specific) = self
            .endpoint("transactions", "create_transaction")
            .and_then(|e| e.get("transaction_types"))
            .and_then(|m| m.get(txn_type))
            .and_then(Value::as_bool)
        {
            return specific;
        }
        self.is_allowed("transactions", "create_transaction")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,
    /// Base64 shared secret.
    pub key: String,
    pub registration_time: u64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub interchain: bool,
    pub permissions_document: PermissionsDocument,
}

impl ApiKey {
    /// Mint a fresh key with a random id and secret.
    pub fn generate(nickname: String, root: bool, permissions: PermissionsDocument) -> Self {
        Self {
            key_id: random_token(12),
            key: random_token(32),
            registration_time: time::unix_now(),
            nickname,
            root,
            interchain: false,
            permissions_document: permissions,
        }
    }

    /// An interchain key is identified by the remote chain id; its secret is
    /// the negotiated HMAC key.
    pub fn new_interchain(dc_id: String, b64_key: String) -> Self {
        Self {
            key_id: dc_id,
            key: b64_key,
            registration_time: time::unix_now(),
            nickname: String::new(),
            root: false,
            interchain: true,
            permissions_document: PermissionsDocument::default_allow_all(),
        }
    }

    pub fn secret_bytes(&self) -> DcResult<Vec<u8>> {
        encode::b64_decode(&self.key)
            .map_err(|e| DragonNetError::Unauthorized(format!("malformed key secret: {e}")))
    }

    pub fn is_key_allowed(
        &self,
        group: &str,
        endpoint: &str,
        interchain_endpoint: bool,
    ) -> bool {
        // Interchain keys are scoped to the interchain surface and nothing
        // else; regular keys never authenticate the interchain surface.
        if self.interchain || interchain_endpoint {
            return self.interchain && interchain_endpoint;
        }
        if self.root {
            return true;
        }
        self.permissions_document.is_allowed(group, endpoint)
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    // URL-safe-ish without padding noise; fine for opaque ids and secrets.
    encode::b64(&buf).replace(['+', '/', '='], "")
}

pub struct ApiKeyDao {
    store: Arc<dyn ObjectStore>,
}

impl ApiKeyDao {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn save_api_key(&self, key: &ApiKey) -> DcResult<()> {
        put_object_as_json(
            self.store.as_ref(),
            &api_key_storage_key(&key.key_id, key.interchain),
            &dto::export_versioned(key),
        )
    }

    pub fn get_api_key(&self, key_id: &str, interchain: bool) -> DcResult<ApiKey> {
        let doc = get_json_object(self.store.as_ref(), &api_key_storage_key(key_id, interchain))
            .map_err(|_| {
                DragonNetError::Unauthorized(format!("no such api key {key_id}"))
            })?;
        dto::import_versioned(doc)
    }

    pub fn delete_api_key(&self, key_id: &str, interchain: bool) -> DcResult<()> {
        self.store.delete(&api_key_storage_key(key_id, interchain))
    }

    pub fn list_api_keys(&self) -> DcResult<Vec<ApiKey>> {
        let mut keys = Vec::new();
        for storage_key in self.store.list("KEYS/")? {
            if storage_key.starts_with("KEYS/INTERCHAIN/") {
                continue;
            }
            let doc = get_json_object(self.store.as_ref(), &storage_key)?;
            keys.push(dto::import_versioned(doc)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::MemoryStore;

    fn dao() -> ApiKeyDao {
        ApiKeyDao::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn generated_key_round_trips() {
        let dao = dao();
        let key = ApiKey::generate(
            "ops".to_string(),
            false,
            PermissionsDocument::default_allow_all(),
        );
        dao.save_api_key(&key).unwrap();
        assert_eq!(dao.get_api_key(&key.key_id, false).unwrap(), key);
    }

    #[test]
    fn interchain_keys_live_in_their_own_namespace() {
        let dao = dao();
        let key = ApiKey::new_interchain("remote-chain".to_string(), "c2VjcmV0".to_string());
        dao.save_api_key(&key).unwrap();

        assert!(dao.get_api_key("remote-chain", true).is_ok());
        assert!(dao.get_api_key("remote-chain", false).is_err());
        assert!(dao.list_api_keys().unwrap().is_empty());
    }

    #[test]
    fn permission_resolution_most_specific_wins() {
        let doc = PermissionsDocument(json!({
            "version": "1",
            "default_allowed": true,
            "permissions": {
                "api_keys": {
                    "allowed": false,
                    "create_api_key": { "allowed": true },
                },
            },
        }));

        assert!(doc.is_allowed("api_keys", "create_api_key"));
        assert!(!doc.is_allowed("api_keys", "delete_api_key"));
        assert!(doc.is_allowed("blocks", "get_block"));
    }

    #[test]
    fn transaction_type_lists_override_the_endpoint() {
        let doc = PermissionsDocument(json!({
            "version": "1",
            "default_allowed": false,
            "permissions": {
                "transactions": {
                    "create_transaction": {
                        "allowed": true,
                        "transaction_types": { "banned": false },
                    },
                },
            },
        }));

        assert!(doc.is_transaction_type_allowed("payment"));
        assert!(!doc.is_transaction_type_allowed("banned"));
    }

    #[test]
    fn root_bypasses_and_interchain_is_scoped() {
        let mut key = ApiKey::generate(
            String::new(),
            true,
            PermissionsDocument(json!({"version": "1", "default_allowed": false})),
        );
        assert!(key.is_key_allowed("transactions", "create_transaction", false));
        assert!(!key.is_key_allowed("transactions", "create_transaction", true));

        key.root = false;
        key.interchain = true;
        assert!(key.is_key_allowed("dragonnet", "enqueue", true));
        assert!(!key.is_key_allowed("transactions", "create_transaction", false));
    }
}
