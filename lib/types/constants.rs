//! Network constants

use hex_literal::hex;

use super::Hash;

/// Mainnet genesis transaction id
pub const MAINNET_GENESIS_TXID: Hash =
    hex!("156f2d8a1a45e1c4fc5f04a9e6fb3e9d4b2f8c7e5d1a9b3c7f2e8d4a6c1b5f3e");

/// Height of the block containing the mainnet genesis transaction
pub const MAINNET_GENESIS_HEIGHT: u32 = 571_747;

/// Reorgs deeper than this are fatal and require a resync
pub const DEFAULT_MAX_REORG_DEPTH: u32 = 100;
