//! Transaction processor pipeline for levels 1 through 4: the per-tick
//! production loop skeleton, the level-specific actions, inbound work queues
//! with crash recovery, transaction callbacks and upward receipt dispatch.
//! Level 5 lives in the anchor engine crate.

pub mod callback;
pub mod dispatch;
pub mod l1;
pub mod l2;
pub mod l3;
pub mod l4;
pub mod queue;
pub mod runner;
pub mod shared;

pub use queue::WorkQueue;
pub use runner::{run_actions_loop, LevelActions};
