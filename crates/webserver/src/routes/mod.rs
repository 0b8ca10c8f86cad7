pub mod blocks;
pub mod dragonnet;
pub mod interchain_auth;
pub mod misc;
pub mod transactions;
