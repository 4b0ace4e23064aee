//! Deterministic replay engine for the BSQ colored-coin ledger.
//!
//! Ledger state is a pure function of the base chain: every node replays
//! the same blocks in the same order and arrives at byte-identical state,
//! with no coordination between nodes.

pub mod node;
pub mod state;
pub mod types;
mod util;

pub use node::{BlockSourceEvent, Config, Node, SyncState};
pub use state::{
    ApprovedProposals, GenesisAnchor, IssuanceRegistry, Snapshot, State,
};
