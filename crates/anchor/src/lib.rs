//! Level 5 anchor engine: stages inbound L4 receipts, watches wallet
//! solvency, assembles L5 blocks on the broadcast interval, anchors their
//! hash to the configured public network, polls for confirmation and
//! finalizes confirmed blocks into the chain.

mod engine;
mod state;

pub use engine::AnchorEngine;
pub use state::AnchorState;
