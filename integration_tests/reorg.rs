//! Reorg scenarios

use anyhow::Result;
use bitcoin::Amount;
use bsq_ledger::{
    node::Error,
    state,
    types::TxType,
    SyncState,
};

use crate::util::{
    extend_branch, genesis_block, init_logging, new_node, outpoint, output,
    test_config, tx, txid, GENESIS_HEIGHT,
};

#[test]
fn reorg_round_trip_matches_fresh_replay() -> Result<()> {
    init_logging();
    let config = test_config();
    let genesis = genesis_block(1);

    // discarded branch: a transfer then a burn
    let branch_a = extend_branch(
        0xa0,
        &genesis,
        vec![
            vec![tx(2, vec![outpoint(1, 0)], vec![output(2, 10)])],
            vec![tx(3, vec![outpoint(2, 0)], vec![output(3, 7)])],
        ],
    );
    // adopted branch: different txs over the same heights, one deeper
    let branch_b = extend_branch(
        0xb0,
        &genesis,
        vec![
            vec![tx(4, vec![outpoint(1, 1)], vec![output(4, 5)])],
            vec![],
            vec![tx(5, vec![outpoint(4, 0)], vec![output(5, 2)])],
        ],
    );

    let (_dir, node) = new_node(&config);
    node.connect_block(&genesis)?;
    for block in &branch_a {
        node.connect_block(block)?;
    }
    tracing::info!("switching branches");
    node.handle_reorg(GENESIS_HEIGHT + 1)?;
    for block in &branch_b {
        node.connect_block(block)?;
    }

    // a fresh node that never saw branch A must agree exactly
    let (_dir_fresh, fresh) = new_node(&config);
    fresh.connect_block(&genesis)?;
    for block in &branch_b {
        fresh.connect_block(block)?;
    }

    assert_eq!(node.snapshot()?, fresh.snapshot()?);
    assert_eq!(
        bincode::serialize(&node.snapshot()?)?,
        bincode::serialize(&fresh.snapshot()?)?
    );
    // nothing from the discarded branch survives
    assert_eq!(node.tx_type(&txid(2))?, None);
    assert_eq!(node.tx_type(&txid(3))?, None);
    assert_eq!(node.tx_type(&txid(5))?, Some(TxType::FeePayment));
    Ok(())
}

#[test]
fn reorg_restores_spent_outputs() -> Result<()> {
    let config = test_config();
    let genesis = genesis_block(1);
    let spend = extend_branch(
        0xa0,
        &genesis,
        vec![vec![tx(2, vec![outpoint(1, 0)], vec![output(2, 10)])]],
    );

    let (_dir, node) = new_node(&config);
    node.connect_block(&genesis)?;
    node.connect_block(&spend[0])?;
    assert!(!node.is_unspent(&outpoint(1, 0))?);

    node.handle_reorg(GENESIS_HEIGHT + 1)?;
    assert!(node.is_unspent(&outpoint(1, 0))?);
    assert_eq!(node.utxo_set_value()?, Amount::from_sat(15));
    assert_eq!(node.try_get_tip_height()?, Some(GENESIS_HEIGHT));
    Ok(())
}

#[test]
fn reorg_past_genesis_reenters_awaiting() -> Result<()> {
    let config = test_config();
    let genesis = genesis_block(1);
    let (_dir, node) = new_node(&config);
    node.connect_block(&genesis)?;
    assert_eq!(node.sync_state(), SyncState::Replaying);

    node.handle_reorg(GENESIS_HEIGHT)?;
    assert_eq!(node.sync_state(), SyncState::AwaitingGenesis);
    assert_eq!(node.try_get_tip_height()?, None);
    assert_eq!(node.colored_supply()?, Amount::ZERO);

    // the genesis tx on the replacement branch is adopted again
    let genesis_b = genesis_block(2);
    node.connect_block(&genesis_b)?;
    assert_eq!(node.sync_state(), SyncState::Replaying);
    assert_eq!(node.tx_type(&txid(1))?, Some(TxType::Genesis));
    Ok(())
}

#[test]
fn reorg_above_tip_is_a_noop() -> Result<()> {
    let config = test_config();
    let genesis = genesis_block(1);
    let (_dir, node) = new_node(&config);
    node.connect_block(&genesis)?;

    node.handle_reorg(GENESIS_HEIGHT + 5)?;
    assert_eq!(node.try_get_tip_height()?, Some(GENESIS_HEIGHT));
    assert_eq!(node.sync_state(), SyncState::Replaying);
    Ok(())
}

#[test]
fn reorg_deeper_than_max_depth_is_fatal() {
    let config = {
        let mut config = test_config();
        config.max_reorg_depth = 2;
        config
    };
    let genesis = genesis_block(1);
    let blocks = extend_branch(0xa0, &genesis, vec![vec![], vec![], vec![]]);

    let (_dir, node) = new_node(&config);
    node.connect_block(&genesis).unwrap();
    for block in &blocks {
        node.connect_block(block).unwrap();
    }

    let err = node.handle_reorg(GENESIS_HEIGHT + 1).unwrap_err();
    assert!(matches!(
        err,
        Error::State(state::Error::ReorgDepthExceeded { .. })
    ));
    // the failed rollback left the chain untouched
    assert_eq!(
        node.try_get_tip_height().unwrap(),
        Some(GENESIS_HEIGHT + 3)
    );
}
