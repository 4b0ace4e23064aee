//! Full-chain replay scenarios

use bitcoin::Amount;
use bsq_ledger::{
    node::{BlockSourceEvent, Node},
    state::ApprovedProposals,
    types::{Block, TxType},
    SyncState,
};
use tokio_util::sync::CancellationToken;

use crate::util::{
    compensation_commitment, extend_branch, genesis_block, init_logging,
    new_node_with, outpoint, output, tagged_tx, test_config, tx, txid,
    GENESIS_HEIGHT,
};

/// Genesis, a transfer, a tagged proposal, a fee burn and a compensation
/// issuance, spread over three blocks.
fn sample_chain() -> Vec<Block> {
    let genesis = genesis_block(1);
    let mut chain = vec![genesis.clone()];
    chain.extend(extend_branch(
        1,
        &genesis,
        vec![
            vec![
                // 10 -> 6 + 4, conserved
                tx(2, vec![outpoint(1, 0)], vec![output(2, 6), output(3, 4)]),
                // proposal fee: 5 in, 4 out, 1 burned
                tagged_tx(
                    3,
                    vec![outpoint(1, 1)],
                    vec![output(4, 4)],
                    vec![0x10, 0xaa],
                ),
            ],
            vec![
                // untagged burn of 2
                tx(4, vec![outpoint(2, 0)], vec![output(5, 4)]),
            ],
            vec![
                // approved issuance of 50
                tagged_tx(
                    5,
                    vec![],
                    vec![output(6, 50)],
                    compensation_commitment(txid(9)),
                ),
            ],
        ],
    ));
    chain
}

fn approved() -> ApprovedProposals {
    [txid(9)].into_iter().collect()
}

fn replay(node: &Node, chain: &[Block]) {
    for block in chain {
        node.connect_block(block).unwrap();
    }
}

#[test]
fn deterministic_replay_yields_identical_snapshots() {
    init_logging();
    let config = test_config();
    let chain = sample_chain();

    let (_dir_a, node_a) = new_node_with(&config, approved());
    let (_dir_b, node_b) = new_node_with(&config, approved());
    replay(&node_a, &chain);
    replay(&node_b, &chain);

    let snapshot_a = node_a.snapshot().unwrap();
    let snapshot_b = node_b.snapshot().unwrap();
    assert_eq!(snapshot_a, snapshot_b);
    assert_eq!(
        bincode::serialize(&snapshot_a).unwrap(),
        bincode::serialize(&snapshot_b).unwrap()
    );
}

#[test]
fn query_surface_reflects_replay() {
    let config = test_config();
    let (_dir, node) = new_node_with(&config, approved());
    assert_eq!(node.sync_state(), SyncState::AwaitingGenesis);
    replay(&node, &sample_chain());

    assert_eq!(node.sync_state(), SyncState::Replaying);
    assert_eq!(node.try_get_tip_height().unwrap(), Some(GENESIS_HEIGHT + 3));
    assert_eq!(node.tx_type(&txid(1)).unwrap(), Some(TxType::Genesis));
    assert_eq!(node.tx_type(&txid(2)).unwrap(), Some(TxType::Transfer));
    assert_eq!(node.tx_type(&txid(3)).unwrap(), Some(TxType::Proposal));
    assert_eq!(node.tx_type(&txid(4)).unwrap(), Some(TxType::FeePayment));
    assert_eq!(
        node.tx_type(&txid(5)).unwrap(),
        Some(TxType::CompensationIssuance)
    );
    // supply: 15 issued at genesis plus 50 issued by compensation
    assert_eq!(node.colored_supply().unwrap(), Amount::from_sat(65));
    // outstanding: 4 (tx2) + 4 (tx3) + 4 (tx4) + 50 (tx5)
    assert_eq!(node.utxo_set_value().unwrap(), Amount::from_sat(62));
    assert!(node.is_unspent(&outpoint(5, 0)).unwrap());
    assert!(!node.is_unspent(&outpoint(1, 0)).unwrap());
    assert_eq!(node.get_utxos().unwrap().len(), 4);
}

#[test]
fn replay_resumes_from_committed_state() {
    let config = test_config();
    let chain = sample_chain();
    let (datadir, node) = new_node_with(&config, approved());
    replay(&node, &chain[..2]);
    drop(node);

    // reopening the same datadir resumes from the last committed block
    let node = Node::new(
        datadir.path(),
        &config,
        std::sync::Arc::new(approved()),
    )
    .unwrap();
    assert_eq!(node.sync_state(), SyncState::Replaying);
    assert_eq!(node.try_get_tip_height().unwrap(), Some(GENESIS_HEIGHT + 1));
    replay(&node, &chain[2..]);
    assert_eq!(node.try_get_tip_height().unwrap(), Some(GENESIS_HEIGHT + 3));
}

#[test]
fn snapshot_restore_seeds_a_fresh_node() {
    let config = test_config();
    let chain = sample_chain();
    let (_dir_a, node_a) = new_node_with(&config, approved());
    replay(&node_a, &chain);
    let snapshot = node_a.snapshot().unwrap();

    let (_dir_b, node_b) = new_node_with(&config, approved());
    node_b.restore(&snapshot).unwrap();
    assert_eq!(node_b.snapshot().unwrap(), snapshot);
    assert_eq!(node_b.sync_state(), SyncState::Replaying);
    assert_eq!(
        node_b.try_get_tip_height().unwrap(),
        Some(GENESIS_HEIGHT + 3)
    );
}

#[tokio::test]
async fn run_loop_processes_events_until_shutdown() {
    init_logging();
    let config = test_config();
    let (_dir, node) = new_node_with(&config, approved());
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let mut tip_rx = node.watch_tip();

    let task = tokio::spawn({
        let node = node.clone();
        let shutdown = shutdown.clone();
        async move { node.run(event_rx, shutdown).await }
    });

    for block in sample_chain() {
        event_tx.send(BlockSourceEvent::Block(block)).unwrap();
    }
    // wait until the final block is committed before requesting shutdown
    loop {
        tip_rx.changed().await.unwrap();
        let tip = *tip_rx.borrow();
        if tip.map(|(height, _)| height) == Some(GENESIS_HEIGHT + 3) {
            break;
        }
    }
    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(node.try_get_tip_height().unwrap(), Some(GENESIS_HEIGHT + 3));
    assert_eq!(node.colored_supply().unwrap(), Amount::from_sat(65));
}
