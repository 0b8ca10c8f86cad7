use dragonnet_common::errors::{DcResult, DragonNetError};
use serde_json::Value;

/// Flat keyed object storage. Keys are slash-separated paths; listing is by
/// string prefix over the full key, not by path component.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch an object. Missing keys are a `NotFound` error since callers
    /// almost always know the key should exist.
    fn get(&self, key: &str) -> DcResult<Vec<u8>>;

    fn put(&self, key: &str, value: &[u8]) -> DcResult<()>;

    fn delete(&self, key: &str) -> DcResult<()>;

    /// All keys beginning with `prefix`, sorted.
    fn list(&self, prefix: &str) -> DcResult<Vec<String>>;

    fn delete_prefix(&self, prefix: &str) -> DcResult<()>;

    fn exists(&self, key: &str) -> DcResult<bool>;
}

pub fn get_json_object(store: &dyn ObjectStore, key: &str) -> DcResult<Value> {
    let bytes = store.get(key)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DragonNetError::storage(format!("object at {key} is not valid json: {e}")))
}

pub fn put_object_as_json(store: &dyn ObjectStore, key: &str, value: &Value) -> DcResult<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| DragonNetError::storage(format!("serializing object for {key}: {e}")))?;
    store.put(key, &bytes)
}
