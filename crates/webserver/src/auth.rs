//! The request authorizer every protected handler runs first: header
//! parsing, timestamp freshness, HMAC verification, anti-replay, per-key
//! rate limiting and permission evaluation.

use axum::http::{HeaderMap, Uri};
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_keys::auth::{hmac_verify, signature_string, timestamp_is_fresh, AuthHeader};
use dragonnet_primitives::time;
use dragonnet_storage::dao::ApiKey;
use std::time::Duration;

use crate::state::AppState;

/// How long a seen signature stays in the replay cache. Anything older
/// already fails the timestamp freshness check.
const REPLAY_TTL: Duration = Duration::from_secs(60);

const RATE_WINDOW_SECS: u64 = 60;

/// Which endpoint a handler is, for permission evaluation. The endpoint map
/// is a compile-time constant: every route names its entry here.
#[derive(Clone, Copy)]
pub struct Endpoint {
    pub group: &'static str,
    pub name: &'static str,
    /// Reserved for chain-to-chain traffic, authenticated by interchain keys
    /// only.
    pub interchain: bool,
}

pub const TRANSACTION_CREATE: Endpoint = Endpoint {
    group: "transactions",
    name: "create_transaction",
    interchain: false,
};
pub const TRANSACTION_READ: Endpoint = Endpoint {
    group: "transactions",
    name: "get_transaction",
    interchain: false,
};
pub const BLOCK_READ: Endpoint = Endpoint {
    group: "blocks",
    name: "get_block",
    interchain: false,
};
pub const VERIFICATION_READ: Endpoint = Endpoint {
    group: "verifications",
    name: "get_verifications",
    interchain: false,
};
pub const STATUS_READ: Endpoint = Endpoint {
    group: "misc",
    name: "get_status",
    interchain: false,
};
pub const ENQUEUE: Endpoint = Endpoint {
    group: "dragonnet",
    name: "enqueue",
    interchain: true,
};
pub const RECEIPT: Endpoint = Endpoint {
    group: "dragonnet",
    name: "receipt",
    interchain: true,
};
pub const CLAIM_READ: Endpoint = Endpoint {
    group: "dragonnet",
    name: "get_claim",
    interchain: true,
};

fn unauthorized(msg: &str) -> DragonNetError {
    DragonNetError::Unauthorized(msg.to_string())
}

/// Validate a request end to end and return the key that signed it.
pub fn authorize(
    state: &AppState,
    http_verb: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    endpoint: Endpoint,
) -> DcResult<ApiKey> {
    let header_str = |name: &str| -> Option<&str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    };

    let auth = header_str("Authorization")
        .and_then(AuthHeader::parse)
        .ok_or_else(|| unauthorized("malformed authorization header"))?;
    let dc_id = header_str("dragonchain")
        .ok_or_else(|| unauthorized("missing dragonchain id in request header"))?;
    let timestamp = header_str("timestamp")
        .ok_or_else(|| unauthorized("missing timestamp in request header"))?;
    let content_type = header_str("Content-Type").unwrap_or("");

    if dc_id != state.config.internal_id {
        return Err(unauthorized("request is addressed to a different chain"));
    }
    if !timestamp_is_fresh(timestamp) {
        return Err(unauthorized("timestamp of request too skewed"));
    }

    let api_key = state.api_keys.get_api_key(&auth.key_id, endpoint.interchain)?;

    if state.config.rate_limit > 0 && !endpoint.interchain {
        enforce_rate_limit(state, &auth.key_id)?;
    }

    let full_path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let message = signature_string(
        auth.algorithm,
        http_verb,
        full_path,
        dc_id,
        timestamp,
        content_type,
        body,
    );
    if !hmac_verify(
        auth.algorithm,
        &api_key.secret_bytes()?,
        &message,
        &auth.signature,
    ) {
        return Err(unauthorized("signature verification failed"));
    }

    // Replay protection only matters for requests that verified; junk never
    // enters the cache.
    let replay_key = format!("auth:seen:{}", auth.signature);
    if state.coord.exists(&replay_key) {
        return Err(unauthorized("previous matching request found"));
    }
    state.coord.set_ex(&replay_key, "1", REPLAY_TTL);

    if !api_key.is_key_allowed(endpoint.group, endpoint.name, endpoint.interchain) {
        return Err(DragonNetError::ActionForbidden(format!(
            "key is not allowed to call {}::{}",
            endpoint.group, endpoint.name
        )));
    }
    Ok(api_key)
}

fn enforce_rate_limit(state: &AppState, key_id: &str) -> DcResult<()> {
    let now = time::unix_now();
    let window_key = format!("auth:rate:{key_id}");
    state
        .coord
        .zrem_range_by_score(&window_key, 0, now.saturating_sub(RATE_WINDOW_SECS));
    let used = state.coord.zcount(&window_key, 0, u64::MAX);
    if used >= state.config.rate_limit as usize {
        return Err(DragonNetError::ApiRateLimit);
    }
    // Member names only need to be unique within the window.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    state
        .coord
        .zadd(&window_key, &format!("{now}-{used}-{nanos}"), now);
    Ok(())
}
