//! Shared error taxonomy. Every subsystem surfaces its failures through this
//! enum; the webserver maps variants onto canonical HTTP codes.

use thiserror::Error;

pub type DcResult<T> = Result<T, DragonNetError>;

#[derive(Debug, Error)]
pub enum DragonNetError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("action forbidden: {0}")]
    ActionForbidden(String),

    #[error("api rate limit exceeded")]
    ApiRateLimit,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("contract conflict: {0}")]
    ContractConflict(String),

    #[error("contract limit exceeded")]
    ContractLimitExceeded,

    #[error("transaction type conflict: {0}")]
    TransactionTypeConflict(String),

    #[error("interchain conflict: {0}")]
    InterchainConflict(String),

    #[error("invalid transaction type: {0}")]
    InvalidTransactionType(String),

    #[error("bad state: {0}")]
    BadState(String),

    #[error("invalid node level: {0}")]
    InvalidNodeLevel(i64),

    #[error("block {block_id} is only accepting verifications for level {accepting} (not {got})")]
    NotAcceptingVerifications {
        block_id: String,
        accepting: i64,
        got: i64,
    },

    /// Surfaced from matchmaking when a claim check cannot be funded.
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("not enough crypto to cover the interchain transaction")]
    NotEnoughCrypto,

    #[error("address registration failure: {0}")]
    AddressRegistrationFailure(String),

    /// The interchain network no longer knows about a transaction hash.
    #[error("interchain transaction not found: {0}")]
    RpcTransactionNotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sanity check failure: {0}")]
    SanityCheck(String),

    #[error("matchmaking error: {0}")]
    Matchmaking(String),
}

impl DragonNetError {
    /// Storage-layer convenience used by the DAO helpers.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
