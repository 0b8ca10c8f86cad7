use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use dragonnet_common::errors::DragonNetError;
use dragonnet_storage::dao::ApiKey;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::*;

use crate::{error::ApiError, state::AppState};

#[derive(Deserialize)]
pub struct InterchainAuthRegistration {
    pub dcid: String,
    pub key: String,
}

/// Unauthenticated by design: two chains must exchange shared secrets
/// before any authenticated interchain call can succeed. Re-registration
/// replaces the previous secret for that chain.
pub async fn interchain_auth_v1(
    State(state): State<Arc<AppState>>,
    body: Json<InterchainAuthRegistration>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.dcid.is_empty() || body.key.is_empty() {
        return Err(ApiError(DragonNetError::bad_request(
            "dcid and key are both required",
        )));
    }

    info!(peer = %body.dcid, "registering interchain key");
    let key = ApiKey::new_interchain(body.dcid.clone(), body.key.clone());
    state.api_keys.save_api_key(&key)?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}
