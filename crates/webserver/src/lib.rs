//! HTTP ingress: the authenticated surface other chains and users hit.
//! Routes are level-dependent; every handler authorizes against the api-key
//! store before touching state.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use server::{build_router, run_webserver};
pub use state::AppState;
