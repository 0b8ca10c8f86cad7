use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri},
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::{authorize, STATUS_READ},
    error::ApiError,
    state::AppState,
};

pub async fn health() -> &'static str {
    "OK"
}

pub async fn status_v1(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, "GET", &uri, &headers, &body, STATUS_READ)?;

    let config = &state.config;
    let mut status = json!({
        "id": config.internal_id,
        "level": config.level,
        "url": config.endpoint,
        "hashAlgo": config.hash_algorithm.wire_token(),
        "scheme": config.proof_scheme.to_string(),
        "version": env!("CARGO_PKG_VERSION"),
        "encryptionAlgo": "secp256k1",
        "indexingEnabled": true,
    });

    if config.level == 5 {
        let funds = state
            .store
            .get("BROADCAST/CURRENT_FUNDS")
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .and_then(|s| s.trim().parse::<u128>().ok())
            .unwrap_or(0);
        status["funded"] = json!(funds > 0);
        status["broadcastInterval"] = json!(config.broadcast_interval_hours);
        if let Some(interchain) = &state.default_interchain {
            status["network"] = json!(interchain.get_network_string());
            status["interchainWallet"] = json!(interchain.wallet_address());
        }
    }
    Ok(Json(status))
}
