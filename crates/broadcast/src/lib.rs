//! Broadcast processor: drives every local L1 block through the L2..L5
//! verification cascade, collects receipts, enforces per-level quorum,
//! rebroadcasts to unresponsive chains, rolls back on storage divergence and
//! fans out stored-verification notifications.

pub mod functions;
pub mod notifier;
pub mod processor;

pub use functions::{BroadcastFunctions, FAULT_TOLERATION};
pub use notifier::NotificationWorker;
pub use processor::{BroadcastProcessor, BROADCAST_RECEIPT_WAIT_TIME};
