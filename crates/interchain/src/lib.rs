//! Interchain adapters: one client per supported public network, all
//! implementing the uniform [`InterchainClient`] contract the L5 anchor
//! engine drives. Persisted client configurations live under the
//! `INTERCHAINS/` storage prefix.

pub mod bnb;
pub mod btc;
pub mod client;
pub mod dao;
pub mod eth;
mod rpc;

pub use client::{InterchainClient, PUBLISH_PREFIX};
pub use dao::InterchainDao;
