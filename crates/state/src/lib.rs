//! Data model for the verification hierarchy: business transactions, the
//! per-level block types they roll up into, and the proof envelopes that
//! chain blocks together.

pub mod block;
pub mod dto;
pub mod transaction;

pub use block::{
    Block, BlockHeader, BlockProof, L1Block, L2Block, L3Block, L3Validation, L4Block,
    L4Projection, L5Block, ProofRef,
};
pub use transaction::{StrippedTransaction, Transaction, TransactionHeader};
