//! Shared helpers for replay scenarios

use std::sync::Arc;

use bitcoin::Amount;
use bsq_ledger::{
    node::{Config, Node},
    state::ApprovedProposals,
    types::{
        Address, Block, BlockHash, CommitmentTag, Output, OutPoint,
        Transaction, Txid,
    },
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const GENESIS_HEIGHT: u32 = 100;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn txid(n: u8) -> Txid {
    Txid([n; 32])
}

pub fn outpoint(n: u8, vout: u32) -> OutPoint {
    OutPoint {
        txid: txid(n),
        vout,
    }
}

pub fn output(n: u8, sats: u64) -> Output {
    Output {
        address: Address([n; 20]),
        value: Amount::from_sat(sats),
    }
}

pub fn tx(id: u8, inputs: Vec<OutPoint>, outputs: Vec<Output>) -> Transaction {
    Transaction {
        txid: txid(id),
        inputs,
        outputs,
        commitment: None,
    }
}

pub fn tagged_tx(
    id: u8,
    inputs: Vec<OutPoint>,
    outputs: Vec<Output>,
    commitment: Vec<u8>,
) -> Transaction {
    Transaction {
        commitment: Some(commitment),
        ..tx(id, inputs, outputs)
    }
}

pub fn compensation_commitment(proposal: Txid) -> Vec<u8> {
    let mut commitment = vec![CommitmentTag::CompensationRequest.byte()];
    commitment.extend_from_slice(&proposal.0);
    commitment
}

/// Block hash derived from a branch seed and the height, so that distinct
/// branches never collide.
pub fn branch_block_hash(seed: u8, height: u32) -> BlockHash {
    let mut hash = [0u8; 32];
    hash[0] = seed;
    hash[1..5].copy_from_slice(&height.to_le_bytes());
    BlockHash(hash)
}

pub fn block_at(
    seed: u8,
    height: u32,
    prev_hash: BlockHash,
    transactions: Vec<Transaction>,
) -> Block {
    Block {
        hash: branch_block_hash(seed, height),
        prev_hash,
        height,
        transactions,
    }
}

/// Genesis tx with two outputs of 10 and 5 sats.
pub fn genesis_tx() -> Transaction {
    tx(1, vec![], vec![output(1, 10), output(1, 5)])
}

pub fn genesis_block(seed: u8) -> Block {
    block_at(
        seed,
        GENESIS_HEIGHT,
        BlockHash([0; 32]),
        vec![genesis_tx()],
    )
}

pub fn test_config() -> Config {
    Config {
        genesis_txid: txid(1),
        genesis_block_height: GENESIS_HEIGHT,
        max_reorg_depth: 10,
    }
}

pub fn new_node(config: &Config) -> (TempDir, Node) {
    new_node_with(config, ApprovedProposals::default())
}

pub fn new_node_with(
    config: &Config,
    registry: ApprovedProposals,
) -> (TempDir, Node) {
    let datadir = TempDir::new().unwrap();
    let node = Node::new(datadir.path(), config, Arc::new(registry)).unwrap();
    (datadir, node)
}

/// Extend a branch with consecutive blocks, one `Vec<Transaction>` per
/// block, returning the blocks produced.
pub fn extend_branch(
    seed: u8,
    parent: &Block,
    per_block_txs: Vec<Vec<Transaction>>,
) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(per_block_txs.len());
    let mut prev_hash = parent.hash;
    let mut height = parent.height;
    for transactions in per_block_txs {
        height += 1;
        let block = block_at(seed, height, prev_hash, transactions);
        prev_hash = block.hash;
        blocks.push(block);
    }
    blocks
}
