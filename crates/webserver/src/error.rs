//! Canonical error-to-HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dragonnet_common::errors::DragonNetError;
use serde_json::json;

pub struct ApiError(pub DragonNetError);

impl From<DragonNetError> for ApiError {
    fn from(e: DragonNetError) -> Self {
        Self(e)
    }
}

fn status_for(e: &DragonNetError) -> StatusCode {
    use DragonNetError::*;
    match e {
        BadRequest(_) | Validation(_) | BadState(_) | InvalidNodeLevel(_)
        | InvalidTransactionType(_) | NotEnoughCrypto => StatusCode::BAD_REQUEST,
        Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ActionForbidden(_) | ContractLimitExceeded => StatusCode::FORBIDDEN,
        NotFound(_) => StatusCode::NOT_FOUND,
        ContractConflict(_) | TransactionTypeConflict(_) | InterchainConflict(_) => {
            StatusCode::CONFLICT
        }
        NotAcceptingVerifications { .. } => StatusCode::PRECONDITION_FAILED,
        ApiRateLimit => StatusCode::TOO_MANY_REQUESTS,
        InsufficientFunds | AddressRegistrationFailure(_) | RpcTransactionNotFound(_)
        | Rpc(_) | Api(_) | Storage(_) | SanityCheck(_) | Matchmaking(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(err = %self.0, "request failed");
        }
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_canonical_codes() {
        let cases = [
            (DragonNetError::BadRequest("x".into()), 400),
            (DragonNetError::Unauthorized("x".into()), 401),
            (DragonNetError::ActionForbidden("x".into()), 403),
            (DragonNetError::NotFound("x".into()), 404),
            (DragonNetError::TransactionTypeConflict("x".into()), 409),
            (
                DragonNetError::NotAcceptingVerifications {
                    block_id: "b".into(),
                    accepting: 2,
                    got: 3,
                },
                412,
            ),
            (DragonNetError::ApiRateLimit, 429),
            (DragonNetError::Storage("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(status_for(&err).as_u16(), code, "{err}");
        }
    }
}
