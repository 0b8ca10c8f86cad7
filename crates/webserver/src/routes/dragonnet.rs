//! Chain-to-chain endpoints: enqueue (L2+), receipt and claim (L1).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Uri},
    Json,
};
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_state::Block;
use serde_json::{json, Value};
use tracing::*;

use crate::{
    auth::{authorize, CLAIM_READ, ENQUEUE, RECEIPT},
    error::ApiError,
    state::AppState,
};

/// A peer hands us a lower-level block (bundle) for verification at our
/// level. The declared deadline travels with the queued work.
pub async fn enqueue_v1(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let key = authorize(&state, "POST", &uri, &headers, &body, ENQUEUE)?;

    headers
        .get("deadline")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| DragonNetError::bad_request("missing or malformed deadline header"))?;

    let doc: Value = serde_json::from_slice(&body)
        .map_err(|e| DragonNetError::bad_request(format!("could not parse json: {e}")))?;
    if doc.get("l1_block").is_none() && doc.get("l4_blocks").is_none() {
        return Err(ApiError(DragonNetError::Validation(
            "enqueued document carries no blocks".to_string(),
        )));
    }

    debug!(peer = %key.key_id, "queued block for verification");
    state.queue.enqueue_block(&doc.to_string());
    Ok(Json(json!({ "success": true })))
}

/// A higher-level chain returns its verification of one of our L1 blocks.
pub async fn receipt_v1(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let key = authorize(&state, "POST", &uri, &headers, &body, RECEIPT)?;

    let doc: Value = serde_json::from_slice(&body)
        .map_err(|e| DragonNetError::bad_request(format!("could not parse json: {e}")))?;
    let block = Block::new_from_at_rest(doc.clone())?;

    // The interchain key id is the sender's chain id; a receipt must come
    // from the chain that produced it.
    if block.dc_id() != key.key_id {
        return Err(ApiError(DragonNetError::ActionForbidden(format!(
            "receipt from chain {} delivered under key {}",
            block.dc_id(),
            key.key_id
        ))));
    }

    match &block {
        Block::L2(b) => record_receipt(&state, &b.l1_dc_id, &b.l1_block_id, 2, &key.key_id, &doc)?,
        Block::L3(b) => record_receipt(&state, &b.l1_dc_id, &b.l1_block_id, 3, &key.key_id, &doc)?,
        Block::L4(b) => record_receipt(&state, &b.l1_dc_id, &b.l1_block_id, 4, &key.key_id, &doc)?,
        Block::L5(b) => {
            // One L5 block closes out every L1 block it carried; record a
            // receipt for each of ours, tolerating the ones whose state
            // moved on.
            let mut recorded = 0usize;
            let mut last_err = None;
            for projection in &b.l4_blocks {
                if projection.l1_dc_id != state.config.internal_id {
                    continue;
                }
                match record_receipt(
                    &state,
                    &projection.l1_dc_id,
                    &projection.l1_block_id,
                    5,
                    &key.key_id,
                    &doc,
                ) {
                    Ok(()) => recorded += 1,
                    Err(e) => {
                        warn!(block_id = %projection.l1_block_id, err = %e, "could not record l5 receipt");
                        last_err = Some(e);
                    }
                }
            }
            if recorded == 0 {
                if let Some(e) = last_err {
                    return Err(ApiError(e));
                }
            }
        }
        Block::L1(_) => return Err(ApiError(DragonNetError::InvalidNodeLevel(1))),
    }

    Ok(Json(json!({ "success": true })))
}

fn record_receipt(
    state: &AppState,
    l1_dc_id: &str,
    l1_block_id: &str,
    level: i64,
    chain_id: &str,
    doc: &Value,
) -> DcResult<()> {
    if l1_dc_id != state.config.internal_id {
        return Err(DragonNetError::bad_request(format!(
            "receipt references l1 chain {l1_dc_id}, not us"
        )));
    }
    if !state.functions.is_accepting_from(l1_block_id, level) {
        let accepting = state.functions.current_level(l1_block_id).unwrap_or(-1);
        return Err(DragonNetError::NotAcceptingVerifications {
            block_id: l1_block_id.to_string(),
            accepting,
            got: level,
        });
    }

    let storage_key = state
        .blocks
        .insert_verification(l1_block_id, level, chain_id, doc)?;
    state.functions.record_receipt(l1_block_id, level, chain_id)?;
    state.functions.queue_notification(&storage_key);
    Ok(())
}

/// Return the matchmaking claim for a block we own.
pub async fn get_claim_v1(
    State(state): State<Arc<AppState>>,
    Path(block_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, "GET", &uri, &headers, &body, CLAIM_READ)?;

    let claim = state
        .functions
        .cached_claim(&block_id)
        .ok_or_else(|| DragonNetError::not_found(format!("claim for block {block_id}")))?;
    Ok(Json(json!(claim)))
}
