//! Typed reads and writes over the object store, one DAO per key-prefix
//! ownership domain.

pub mod api_keys;
pub mod blocks;
pub mod transaction_types;
pub mod transactions;

pub use api_keys::{ApiKey, ApiKeyDao, PermissionsDocument};
pub use blocks::BlockDao;
pub use transaction_types::{TransactionTypeDao, TransactionTypeModel};
pub use transactions::TransactionDao;
