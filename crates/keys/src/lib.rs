//! Key service: per-chain secp256k1 keypairs for block and transaction
//! signatures, proof-of-work sealing, and the HMAC request signing used on
//! the authenticated wire between chains.

pub mod auth;
pub mod chain;

pub use chain::ChainKeys;
