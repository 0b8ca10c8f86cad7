//! Small shared types and helpers used across the node: identifiers, time,
//! hashing and encoding wrappers.

pub mod encode;
pub mod hash;
pub mod ids;
pub mod time;

pub mod prelude {
    pub use crate::{encode::*, hash, ids::*, time::*};
}
