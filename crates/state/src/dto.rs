//! Versioned at-rest documents. Everything durable goes to storage as
//! `{"version": "1", ...}` JSON so the format can evolve without rewriting
//! history.

use dragonnet_common::errors::{DcResult, DragonNetError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub const DTO_VERSION: &str = "1";

/// Serialize `t` with the version stamp folded in.
pub fn export_versioned<T: Serialize>(t: &T) -> Value {
    let mut v = serde_json::to_value(t).expect("at-rest serialization is infallible");
    v["version"] = Value::String(DTO_VERSION.to_string());
    v
}

/// Parse an at-rest document, rejecting unknown versions. Unknown versions
/// are a programming error on the writer side, not recoverable input.
pub fn import_versioned<T: DeserializeOwned>(v: Value) -> DcResult<T> {
    match v.get("version").and_then(Value::as_str) {
        Some(DTO_VERSION) => serde_json::from_value(v)
            .map_err(|e| DragonNetError::Validation(format!("malformed at-rest document: {e}"))),
        Some(other) => Err(DragonNetError::Validation(format!(
            "at-rest document version {other} not supported"
        ))),
        None => Err(DragonNetError::Validation(
            "at-rest document missing version".to_string(),
        )),
    }
}
