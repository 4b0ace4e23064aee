//! State errors

use thiserror::Error;

use crate::types::{AmountOverflowError, BlockHash, OutPoint, Txid};

#[derive(Debug, Error)]
pub enum InvalidHeader {
    #[error(
        "expected previous block hash {expected}, but received {received}"
    )]
    PrevHash {
        expected: BlockHash,
        received: BlockHash,
    },
    #[error("expected block height {expected}, but received {received}")]
    Height { expected: u32, received: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    AmountOverflow(#[from] AmountOverflowError),
    #[error(transparent)]
    Db(#[from] heed::Error),
    #[error(
        "genesis transaction already set to {existing}, \
         refusing to adopt {candidate}"
    )]
    GenesisAlreadySet { existing: Txid, candidate: Txid },
    #[error(
        "genesis transaction {txid} not found at block height {block_height}"
    )]
    GenesisNotFound { txid: Txid, block_height: u32 },
    #[error("invalid header: {0}")]
    InvalidHeader(InvalidHeader),
    #[error("no block record at height {height}")]
    NoBlockRecord { height: u32 },
    #[error("no tip")]
    NoTip,
    #[error("stxo {outpoint} doesn't exist")]
    NoStxo { outpoint: OutPoint },
    #[error("tx {txid} doesn't exist")]
    NoTx { txid: Txid },
    #[error("utxo {outpoint} doesn't exist")]
    NoUtxo { outpoint: OutPoint },
    #[error(
        "reorg at height {fork_height} deeper than max depth {max_depth} \
         (tip at {tip_height})"
    )]
    ReorgDepthExceeded {
        fork_height: u32,
        tip_height: u32,
        max_depth: u32,
    },
}
