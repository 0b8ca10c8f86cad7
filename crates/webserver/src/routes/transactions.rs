use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    Json,
};
use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_state::{dto, Transaction};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{authorize, TRANSACTION_CREATE, TRANSACTION_READ},
    error::ApiError,
    state::AppState,
};

#[derive(Deserialize)]
pub struct NewTransaction {
    pub txn_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub tag: String,
}

fn admit_one(
    state: &AppState,
    key: &dragonnet_storage::dao::ApiKey,
    new_txn: NewTransaction,
    callback_url: Option<&str>,
) -> DcResult<String> {
    // The type must exist, and this key must be allowed to create
    // transactions of it.
    state.transaction_types.get(&new_txn.txn_type)?;
    if !key.root
        && !key
            .permissions_document
            .is_transaction_type_allowed(&new_txn.txn_type)
    {
        return Err(DragonNetError::ActionForbidden(format!(
            "key may not create transactions of type {}",
            new_txn.txn_type
        )));
    }

    let txn = Transaction::admit(
        new_txn.txn_type,
        new_txn.payload,
        new_txn.tag,
        None,
        state.config.internal_id.clone(),
    );
    if let Some(url) = callback_url {
        state.callbacks.register(&txn.header.txn_id, url);
    }
    let encoded = serde_json::to_string(&txn)
        .map_err(|e| DragonNetError::storage(format!("encoding admitted transaction: {e}")))?;
    state.queue.enqueue_transaction(&encoded);
    Ok(txn.header.txn_id)
}

pub async fn create_transaction_v1(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = authorize(&state, "POST", &uri, &headers, &body, TRANSACTION_CREATE)?;

    let new_txn: NewTransaction = serde_json::from_slice(&body)
        .map_err(|e| DragonNetError::bad_request(format!("could not parse json: {e}")))?;
    let callback_url = headers
        .get("X-Callback-URL")
        .and_then(|v| v.to_str().ok());

    let txn_id = admit_one(&state, &key, new_txn, callback_url)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "transaction_id": txn_id })),
    ))
}

pub async fn create_transaction_bulk_v1(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = authorize(&state, "POST", &uri, &headers, &body, TRANSACTION_CREATE)?;

    let new_txns: Vec<NewTransaction> = serde_json::from_slice(&body)
        .map_err(|e| DragonNetError::bad_request(format!("could not parse json: {e}")))?;
    if new_txns.is_empty() {
        return Err(ApiError(DragonNetError::bad_request(
            "bulk submission requires at least one transaction",
        )));
    }

    let mut created = Vec::new();
    let mut failed = Vec::new();
    for new_txn in new_txns {
        let txn_type = new_txn.txn_type.clone();
        match admit_one(&state, &key, new_txn, None) {
            Ok(txn_id) => created.push(txn_id),
            Err(e) => failed.push(json!({ "txn_type": txn_type, "error": e.to_string() })),
        }
    }
    Ok((
        StatusCode::MULTI_STATUS,
        Json(json!({ "201": created, "400": failed })),
    ))
}

pub async fn get_transaction_v1(
    State(state): State<Arc<AppState>>,
    Path(txn_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, "GET", &uri, &headers, &body, TRANSACTION_READ)?;
    let txn = state.transactions.get_transaction(&txn_id)?;
    Ok(Json(dto::export_versioned(&txn)))
}
