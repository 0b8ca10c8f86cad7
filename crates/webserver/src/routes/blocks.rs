use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Uri},
    Json,
};
use dragonnet_common::errors::DragonNetError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{authorize, BLOCK_READ, VERIFICATION_READ},
    error::ApiError,
    state::AppState,
};

pub async fn get_block_v1(
    State(state): State<Arc<AppState>>,
    Path(block_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, "GET", &uri, &headers, &body, BLOCK_READ)?;
    Ok(Json(state.blocks.get_raw_block(&block_id)?))
}

#[derive(Deserialize)]
pub struct VerificationsQuery {
    pub level: Option<i64>,
}

pub async fn get_verifications_v1(
    State(state): State<Arc<AppState>>,
    Path(block_id): Path<String>,
    Query(query): Query<VerificationsQuery>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, "GET", &uri, &headers, &body, VERIFICATION_READ)?;

    match query.level {
        Some(level) => {
            if !(2..=5).contains(&level) {
                return Err(ApiError(DragonNetError::InvalidNodeLevel(level)));
            }
            Ok(Json(json!(state.blocks.get_verifications(&block_id, level)?)))
        }
        None => {
            let mut all = serde_json::Map::new();
            for level in 2..=5 {
                all.insert(
                    level.to_string(),
                    json!(state.blocks.get_verifications(&block_id, level)?),
                );
            }
            Ok(Json(Value::Object(all)))
        }
    }
}
