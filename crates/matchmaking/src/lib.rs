//! Client for the external matchmaking service: node registrations, claim
//! checks binding L1 blocks to their selected verifier chains, and the
//! funded flag L5 nodes maintain.
//!
//! The service is a surrounding collaborator; everything the core needs is
//! behind [`MatchmakingClient`] so the processors can run against a fake.

mod client;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod fakes;

pub use client::{HttpMatchmaking, MatchmakingClient};
pub use types::{ClaimCheck, ClaimMetadata, Registration};
