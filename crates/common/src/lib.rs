//! Crate includes reusable utils for the node services that handle common
//! behavior. Such as initializing the tracing framework, env-driven config
//! and the shared error taxonomy.

pub mod config;
pub mod env;
pub mod errors;
pub mod logging;
