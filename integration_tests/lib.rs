//! Replay and reorg scenarios exercising the full node surface.
#![cfg(test)]

mod reorg;
mod replay;
mod util;
