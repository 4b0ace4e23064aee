//! State unit tests

use bitcoin::Amount;
use tempfile::TempDir;

use crate::{
    state::{ApprovedProposals, Error, GenesisAnchor, IssuanceRegistry, State},
    types::{
        Address, Block, BlockHash, CommitmentTag, Output, OutPoint,
        OutputPayload, Transaction, TxType, Txid,
    },
};

const GENESIS_HEIGHT: u32 = 100;

fn new_env() -> (TempDir, heed::Env) {
    let tmp = TempDir::new().unwrap();
    let env = {
        let mut opts = heed::EnvOpenOptions::new();
        opts.map_size(16 * 1024 * 1024).max_dbs(State::NUM_DBS);
        unsafe { opts.open(tmp.path()) }.unwrap()
    };
    (tmp, env)
}

fn txid(n: u8) -> Txid {
    Txid([n; 32])
}

fn block_hash(n: u8) -> BlockHash {
    BlockHash([n; 32])
}

fn outpoint(n: u8, vout: u32) -> OutPoint {
    OutPoint {
        txid: txid(n),
        vout,
    }
}

fn output(n: u8, sats: u64) -> Output {
    Output {
        address: Address([n; 20]),
        value: Amount::from_sat(sats),
    }
}

fn tx(id: u8, inputs: Vec<OutPoint>, outputs: Vec<Output>) -> Transaction {
    Transaction {
        txid: txid(id),
        inputs,
        outputs,
        commitment: None,
    }
}

fn tagged_tx(
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

fn block(
    n: u8,
    height: u32,
    prev_hash: BlockHash,
    transactions: Vec<Transaction>,
) -> Block {
    Block {
        hash: block_hash(n),
        prev_hash,
        height,
        transactions,
    }
}

fn anchor() -> GenesisAnchor {
    GenesisAnchor::new(txid(1), GENESIS_HEIGHT)
}

/// Genesis tx with two outputs of 10 and 5 sats.
fn genesis_tx() -> Transaction {
    tx(1, vec![], vec![output(1, 10), output(1, 5)])
}

fn genesis_block() -> Block {
    block(10, GENESIS_HEIGHT, block_hash(9), vec![genesis_tx()])
}

fn connect_with(
    env: &heed::Env,
    state: &State,
    block: &Block,
    registry: &dyn IssuanceRegistry,
) -> Result<(), Error> {
    let mut rwtxn = env.write_txn()?;
    state.connect_block(&mut rwtxn, block, &anchor(), registry)?;
    rwtxn.commit()?;
    Ok(())
}

fn connect(env: &heed::Env, state: &State, block: &Block) -> Result<(), Error> {
    connect_with(env, state, block, &ApprovedProposals::default())
}

#[test]
fn genesis_adoption() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(state.try_get_genesis(&rotxn).unwrap(), Some(txid(1)));
    assert_eq!(state.try_get_height(&rotxn).unwrap(), Some(GENESIS_HEIGHT));
    assert_eq!(state.tx_type(&rotxn, &txid(1)).unwrap(), Some(TxType::Genesis));
    assert!(state.is_unspent(&rotxn, &outpoint(1, 0)).unwrap());
    assert!(state.is_unspent(&rotxn, &outpoint(1, 1)).unwrap());
    let genesis = state.try_get_tx(&rotxn, &txid(1)).unwrap().unwrap();
    assert!(genesis.outputs.iter().all(|o| o.is_verified && o.is_unspent));
    assert_eq!(
        state.colored_supply(&rotxn).unwrap(),
        Amount::from_sat(15)
    );
}

#[test]
fn genesis_requires_height_match() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    // the genesis txid one block early is not adopted
    let early = block(10, GENESIS_HEIGHT - 1, block_hash(9), vec![genesis_tx()]);
    connect(&env, &state, &early).unwrap();
    let rotxn = env.read_txn().unwrap();
    assert_eq!(state.try_get_genesis(&rotxn).unwrap(), None);
    assert_eq!(
        state.tx_type(&rotxn, &txid(1)).unwrap(),
        Some(TxType::Undefined)
    );
    drop(rotxn);
    // the block at the genesis height lacks the genesis tx: fatal
    let at_height = block(11, GENESIS_HEIGHT, block_hash(10), vec![]);
    let err = connect(&env, &state, &at_height).unwrap_err();
    assert!(matches!(err, Error::GenesisNotFound { .. }));
    // the failed block was not applied
    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.try_get_height(&rotxn).unwrap(),
        Some(GENESIS_HEIGHT - 1)
    );
}

#[test]
fn duplicate_genesis_is_fatal() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    let twice = block(
        10,
        GENESIS_HEIGHT,
        block_hash(9),
        vec![genesis_tx(), genesis_tx()],
    );
    let err = connect(&env, &state, &twice).unwrap_err();
    assert!(matches!(err, Error::GenesisAlreadySet { .. }));
}

#[test]
fn pre_genesis_txs_stay_undefined() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    let early = block(
        10,
        GENESIS_HEIGHT - 1,
        block_hash(9),
        vec![tx(7, vec![], vec![output(7, 42)])],
    );
    connect(&env, &state, &early).unwrap();
    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(7)).unwrap(),
        Some(TxType::Undefined)
    );
    assert!(!state.is_unspent(&rotxn, &outpoint(7, 0)).unwrap());
    assert_eq!(state.colored_supply(&rotxn).unwrap(), Amount::ZERO);
}

#[test]
fn fee_payment_burns_value() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    // spend the 10 sat genesis output into a single untagged 8 sat output
    let burn = tx(2, vec![outpoint(1, 0)], vec![output(2, 8)]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![burn]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::FeePayment)
    );
    assert!(!state.is_unspent(&rotxn, &outpoint(1, 0)).unwrap());
    assert!(state.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
    // issuance is unchanged by the burn; only the outstanding total drops
    assert_eq!(state.colored_supply(&rotxn).unwrap(), Amount::from_sat(15));
    assert_eq!(state.utxo_set_value(&rotxn).unwrap(), Amount::from_sat(13));
    // the genesis record now shows its first output as spent
    let genesis = state.try_get_tx(&rotxn, &txid(1)).unwrap().unwrap();
    assert!(!genesis.outputs[0].is_unspent);
    assert!(genesis.outputs[0].is_verified);
    assert!(genesis.outputs[1].is_unspent);
}

#[test]
fn transfer_conserves_value() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let transfer =
        tx(2, vec![outpoint(1, 0)], vec![output(2, 6), output(3, 4)]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![transfer]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Transfer)
    );
    assert!(state.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
    assert!(state.is_unspent(&rotxn, &outpoint(2, 1)).unwrap());
    assert_eq!(state.utxo_set_value(&rotxn).unwrap(), Amount::from_sat(15));
}

#[test]
fn allocation_prefers_earlier_outputs() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    // 10 sats in; the 6 sat output is covered, the 5 sat one is not, and
    // nothing spills over to the smaller output behind it
    let split = tx(
        2,
        vec![outpoint(1, 0)],
        vec![output(2, 6), output(3, 5), output(4, 3)],
    );
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![split]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::FeePayment)
    );
    assert!(state.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
    assert!(!state.is_unspent(&rotxn, &outpoint(2, 1)).unwrap());
    assert!(!state.is_unspent(&rotxn, &outpoint(2, 2)).unwrap());
}

#[test]
fn no_colored_inputs_is_invalid() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let plain = tx(2, vec![outpoint(9, 0)], vec![output(2, 8)]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![plain]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Invalid)
    );
    assert!(!state.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
    let record = state.try_get_tx(&rotxn, &txid(2)).unwrap().unwrap();
    assert!(record.outputs.iter().all(|o| !o.is_verified));
}

#[test]
fn zero_outputs_consumes_inputs() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let sink = tx(2, vec![outpoint(1, 0)], vec![]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![sink]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Invalid)
    );
    // the traced colored value is committed even though the tx is invalid
    assert!(!state.is_unspent(&rotxn, &outpoint(1, 0)).unwrap());
    assert_eq!(state.utxo_set_value(&rotxn).unwrap(), Amount::from_sat(5));
}

#[test]
fn commitment_tag_is_authoritative() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    // value fully conserved, but the tag still wins over the heuristic
    let proposal = tagged_tx(
        2,
        vec![outpoint(1, 1)],
        vec![output(2, 5)],
        vec![CommitmentTag::Proposal.byte(), 0xab, 0xcd],
    );
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![proposal]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Proposal)
    );
    let record = state.try_get_tx(&rotxn, &txid(2)).unwrap().unwrap();
    assert_eq!(
        record.outputs[0].payload,
        Some(OutputPayload::Commitment {
            tag: CommitmentTag::Proposal,
            body: vec![0xab, 0xcd],
        })
    );
}

#[test]
fn unrecognized_commitment_falls_back() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let odd = tagged_tx(
        2,
        vec![outpoint(1, 0)],
        vec![output(2, 8)],
        vec![0xff, 0x01],
    );
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![odd]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::FeePayment)
    );
}

#[test]
fn compensation_issuance_adds_supply() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    let registry: ApprovedProposals = [txid(9)].into_iter().collect();
    connect_with(&env, &state, &genesis_block(), &registry).unwrap();

    let mut commitment = vec![CommitmentTag::CompensationRequest.byte()];
    commitment.extend_from_slice(&txid(9).0);
    let issuance = tagged_tx(2, vec![], vec![output(2, 50)], commitment);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![issuance]);
    connect_with(&env, &state, &next, &registry).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::CompensationIssuance)
    );
    assert!(state.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
    assert_eq!(state.colored_supply(&rotxn).unwrap(), Amount::from_sat(65));
    let record = state.try_get_tx(&rotxn, &txid(2)).unwrap().unwrap();
    assert_eq!(
        record.outputs[0].payload,
        Some(OutputPayload::Issuance { proposal: txid(9) })
    );
}

#[test]
fn unapproved_compensation_request_is_rejected() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();

    let mut commitment = vec![CommitmentTag::CompensationRequest.byte()];
    commitment.extend_from_slice(&txid(9).0);
    let issuance = tagged_tx(2, vec![], vec![output(2, 50)], commitment);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![issuance]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Invalid)
    );
    assert_eq!(state.colored_supply(&rotxn).unwrap(), Amount::from_sat(15));
}

#[test]
fn forward_reference_is_invalid() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    // tx 2 spends tx 3's output, but tx 3 comes later in the same block
    let early = tx(2, vec![outpoint(3, 0)], vec![output(2, 5)]);
    let late = tx(3, vec![outpoint(1, 0)], vec![output(3, 10)]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![early, late]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Invalid)
    );
    assert_eq!(
        state.tx_type(&rotxn, &txid(3)).unwrap(),
        Some(TxType::Transfer)
    );
    assert!(state.is_unspent(&rotxn, &outpoint(3, 0)).unwrap());
}

#[test]
fn spent_output_cannot_be_consumed_again() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let first = tx(2, vec![outpoint(1, 0)], vec![output(2, 10)]);
    let second = tx(3, vec![outpoint(1, 0)], vec![output(3, 10)]);
    let next =
        block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![first, second]);
    connect(&env, &state, &next).unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(
        state.tx_type(&rotxn, &txid(2)).unwrap(),
        Some(TxType::Transfer)
    );
    assert_eq!(
        state.tx_type(&rotxn, &txid(3)).unwrap(),
        Some(TxType::Invalid)
    );
}

#[test]
fn header_continuity_is_checked() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    // wrong prev hash
    let bad_prev = block(11, GENESIS_HEIGHT + 1, block_hash(99), vec![]);
    let err = connect(&env, &state, &bad_prev).unwrap_err();
    assert!(matches!(err, Error::InvalidHeader(_)));
    // height gap
    let bad_height = block(11, GENESIS_HEIGHT + 2, block_hash(10), vec![]);
    let err = connect(&env, &state, &bad_height).unwrap_err();
    assert!(matches!(err, Error::InvalidHeader(_)));
}

#[test]
fn disconnect_restores_prior_state() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let before = {
        let rotxn = env.read_txn().unwrap();
        state.snapshot(&rotxn).unwrap()
    };

    let transfer =
        tx(2, vec![outpoint(1, 0)], vec![output(2, 6), output(3, 4)]);
    let burn = tx(3, vec![outpoint(2, 1)], vec![output(3, 1)]);
    let next =
        block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![transfer, burn]);
    connect(&env, &state, &next).unwrap();

    let mut rwtxn = env.write_txn().unwrap();
    state.disconnect_tip(&mut rwtxn).unwrap();
    rwtxn.commit().unwrap();

    let rotxn = env.read_txn().unwrap();
    let after = state.snapshot(&rotxn).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        bincode::serialize(&before).unwrap(),
        bincode::serialize(&after).unwrap()
    );
}

#[test]
fn disconnect_past_genesis_clears_it() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();

    let mut rwtxn = env.write_txn().unwrap();
    state.disconnect_tip(&mut rwtxn).unwrap();
    rwtxn.commit().unwrap();

    let rotxn = env.read_txn().unwrap();
    assert_eq!(state.try_get_genesis(&rotxn).unwrap(), None);
    assert_eq!(state.try_get_height(&rotxn).unwrap(), None);
    assert_eq!(state.try_get_tip(&rotxn).unwrap(), None);
    assert_eq!(state.utxo_set_value(&rotxn).unwrap(), Amount::ZERO);
}

#[test]
fn snapshot_restore_round_trip() {
    let (_tmp, env) = new_env();
    let state = State::new(&env).unwrap();
    connect(&env, &state, &genesis_block()).unwrap();
    let transfer = tx(2, vec![outpoint(1, 0)], vec![output(2, 10)]);
    let next = block(11, GENESIS_HEIGHT + 1, block_hash(10), vec![transfer]);
    connect(&env, &state, &next).unwrap();
    let snapshot = {
        let rotxn = env.read_txn().unwrap();
        state.snapshot(&rotxn).unwrap()
    };

    // restore into a fresh environment
    let (_tmp2, env2) = new_env();
    let state2 = State::new(&env2).unwrap();
    let mut rwtxn = env2.write_txn().unwrap();
    state2.restore(&mut rwtxn, &snapshot).unwrap();
    rwtxn.commit().unwrap();

    let rotxn = env2.read_txn().unwrap();
    assert_eq!(state2.snapshot(&rotxn).unwrap(), snapshot);
    assert!(state2.is_unspent(&rotxn, &outpoint(2, 0)).unwrap());
}
