//! Replay orchestration over an external block source

use std::{collections::HashMap, path::Path, sync::Arc};

use heed::EnvOpenOptions;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    state::{self, GenesisAnchor, IssuanceRegistry, Snapshot, State},
    types::{
        constants, Block, BlockHash, OutPoint, TxOutput, TxType, Txid,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] heed::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("state error")]
    State(#[from] state::Error),
}

/// Ledger replay configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub genesis_txid: Txid,
    pub genesis_block_height: u32,
    /// Reorgs deeper than this are fatal; recovery is a full resync.
    pub max_reorg_depth: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            genesis_txid: Txid(constants::MAINNET_GENESIS_TXID),
            genesis_block_height: constants::MAINNET_GENESIS_HEIGHT,
            max_reorg_depth: constants::DEFAULT_MAX_REORG_DEPTH,
        }
    }
}

/// Notifications delivered by the external block source.
#[derive(Clone, Debug)]
pub enum BlockSourceEvent {
    /// The next block, in height order
    Block(Block),
    /// Blocks at or above `fork_height` have been invalidated
    Reorg { fork_height: u32 },
}

/// Replay progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum SyncState {
    /// No genesis transaction adopted yet
    AwaitingGenesis,
    /// Processing blocks in height order
    Replaying,
    /// Rolling back to a fork point
    ReorgPending,
}

#[derive(Clone)]
pub struct Node {
    env: heed::Env,
    state: State,
    anchor: GenesisAnchor,
    max_reorg_depth: u32,
    registry: Arc<dyn IssuanceRegistry>,
    sync_state: Arc<RwLock<SyncState>>,
    tip_tx: Arc<watch::Sender<Option<(u32, BlockHash)>>>,
}

impl Node {
    pub fn new(
        datadir: &Path,
        config: &Config,
        registry: Arc<dyn IssuanceRegistry>,
    ) -> Result<Self, Error> {
        let env_path = datadir.join("data.mdb");
        std::fs::create_dir_all(&env_path)?;
        let env = {
            let mut env_open_opts = EnvOpenOptions::new();
            env_open_opts
                .map_size(8 * 1024 * 1024 * 1024) // 8 GB
                .max_dbs(State::NUM_DBS);
            unsafe { env_open_opts.open(&env_path) }?
        };
        let state = State::new(&env)?;
        let anchor = GenesisAnchor::new(
            config.genesis_txid,
            config.genesis_block_height,
        );
        let rotxn = env.read_txn()?;
        let sync_state = if state.try_get_genesis(&rotxn)?.is_some() {
            SyncState::Replaying
        } else {
            SyncState::AwaitingGenesis
        };
        let tip = match (
            state.try_get_height(&rotxn)?,
            state.try_get_tip(&rotxn)?,
        ) {
            (Some(height), Some(hash)) => Some((height, hash)),
            _ => None,
        };
        drop(rotxn);
        let (tip_tx, _tip_rx) = watch::channel(tip);
        Ok(Self {
            env,
            state,
            anchor,
            max_reorg_depth: config.max_reorg_depth,
            registry,
            sync_state: Arc::new(RwLock::new(sync_state)),
            tip_tx: Arc::new(tip_tx),
        })
    }

    pub fn sync_state(&self) -> SyncState {
        *self.sync_state.read()
    }

    /// Subscribe to tip changes.
    pub fn watch_tip(&self) -> watch::Receiver<Option<(u32, BlockHash)>> {
        self.tip_tx.subscribe()
    }

    fn refresh_sync_state(&self) -> Result<(), Error> {
        let rotxn = self.env.read_txn()?;
        let sync_state = if self.state.try_get_genesis(&rotxn)?.is_some() {
            SyncState::Replaying
        } else {
            SyncState::AwaitingGenesis
        };
        let tip = match (
            self.state.try_get_height(&rotxn)?,
            self.state.try_get_tip(&rotxn)?,
        ) {
            (Some(height), Some(hash)) => Some((height, hash)),
            _ => None,
        };
        drop(rotxn);
        *self.sync_state.write() = sync_state;
        self.tip_tx.send_replace(tip);
        Ok(())
    }

    /// Apply a block atomically.
    pub fn connect_block(&self, block: &Block) -> Result<(), Error> {
        let mut rwtxn = self.env.write_txn()?;
        self.state.connect_block(
            &mut rwtxn,
            block,
            &self.anchor,
            &*self.registry,
        )?;
        rwtxn.commit()?;
        self.refresh_sync_state()?;
        tracing::debug!(
            height = block.height,
            hash = %block.hash,
            "connected block"
        );
        Ok(())
    }

    /// Roll back to just below the fork height. The rollback is a single
    /// atomic write; replay resumes with the new branch's blocks.
    pub fn handle_reorg(&self, fork_height: u32) -> Result<(), Error> {
        *self.sync_state.write() = SyncState::ReorgPending;
        let res = self.rollback_to(fork_height);
        self.refresh_sync_state()?;
        res
    }

    fn rollback_to(&self, fork_height: u32) -> Result<(), Error> {
        let mut rwtxn = self.env.write_txn()?;
        let Some(tip_height) = self.state.try_get_height(&rwtxn)? else {
            // nothing processed yet
            return Ok(());
        };
        if fork_height > tip_height {
            // fork above our tip, nothing to discard
            return Ok(());
        }
        let depth = tip_height - fork_height + 1;
        if depth > self.max_reorg_depth {
            return Err(state::Error::ReorgDepthExceeded {
                fork_height,
                tip_height,
                max_depth: self.max_reorg_depth,
            }
            .into());
        }
        while let Some(height) = self.state.try_get_height(&rwtxn)? {
            if height < fork_height {
                break;
            }
            self.state.disconnect_tip(&mut rwtxn)?;
        }
        rwtxn.commit()?;
        tracing::info!(fork_height, tip_height, "rolled back for reorg");
        Ok(())
    }

    /// Drive replay from the block source until the channel closes or
    /// shutdown is requested. Cancellation is observed only between
    /// events, so a block is never abandoned half-applied.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<BlockSourceEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, stopping replay");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(BlockSourceEvent::Block(block)) => {
                        self.connect_block(&block)?;
                    }
                    Some(BlockSourceEvent::Reorg { fork_height }) => {
                        self.handle_reorg(fork_height)?;
                    }
                    None => {
                        tracing::info!("block source closed, stopping replay");
                        return Ok(());
                    }
                },
            }
        }
    }

    pub fn try_get_tip(&self) -> Result<Option<BlockHash>, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.try_get_tip(&rotxn)?)
    }

    pub fn try_get_tip_height(&self) -> Result<Option<u32>, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.try_get_height(&rotxn)?)
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> Result<bool, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.is_unspent(&rotxn, outpoint)?)
    }

    pub fn tx_type(&self, txid: &Txid) -> Result<Option<TxType>, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.tx_type(&rotxn, txid)?)
    }

    pub fn colored_supply(&self) -> Result<bitcoin::Amount, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.colored_supply(&rotxn)?)
    }

    pub fn utxo_set_value(&self) -> Result<bitcoin::Amount, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.utxo_set_value(&rotxn)?)
    }

    pub fn get_utxos(&self) -> Result<HashMap<OutPoint, TxOutput>, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.get_utxos(&rotxn)?)
    }

    /// Capture the full ledger state for the persistence layer.
    pub fn snapshot(&self) -> Result<Snapshot, Error> {
        let rotxn = self.env.read_txn()?;
        Ok(self.state.snapshot(&rotxn)?)
    }

    /// Load a previously-stored snapshot, replacing the current state.
    /// Replay resumes from the snapshot's height.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let mut rwtxn = self.env.write_txn()?;
        self.state.restore(&mut rwtxn, snapshot)?;
        rwtxn.commit()?;
        self.refresh_sync_state()?;
        tracing::info!(height = ?snapshot.height, "restored ledger snapshot");
        Ok(())
    }
}
