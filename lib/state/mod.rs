use std::collections::{BTreeMap, HashMap};

use bitcoin::Amount;
use heed::{types::SerdeBincode, Database, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};

use crate::{
    types::{
        AmountOverflowError, Block, BlockHash, BlockRecord, InPoint, OutPoint,
        SpentOutput, Tx, TxOutput, TxType, Txid,
    },
    util::UnitKey,
};

mod classify;
pub mod error;
mod genesis;
#[cfg(test)]
mod test;

pub use classify::{classify_tx, ApprovedProposals, IssuanceRegistry};
pub use error::Error;
pub use genesis::GenesisAnchor;

/// Serializable image of the full ledger state, for persistence and for
/// determinism checks. Map fields are ordered so that equal states
/// serialize byte-identically.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    pub tip: Option<BlockHash>,
    pub height: Option<u32>,
    pub genesis: Option<Txid>,
    pub utxos: BTreeMap<OutPoint, TxOutput>,
    pub stxos: BTreeMap<OutPoint, SpentOutput>,
    pub txs: BTreeMap<Txid, Tx>,
    pub blocks: BTreeMap<u32, BlockRecord>,
}

#[derive(Clone)]
pub struct State {
    /// Current tip
    tip: Database<SerdeBincode<UnitKey>, SerdeBincode<BlockHash>>,
    /// Current height
    height: Database<SerdeBincode<UnitKey>, SerdeBincode<u32>>,
    /// Adopted genesis transaction
    genesis: Database<SerdeBincode<UnitKey>, SerdeBincode<Txid>>,
    /// Currently-unspent colored outputs
    utxos: Database<SerdeBincode<OutPoint>, SerdeBincode<TxOutput>>,
    /// Spent colored outputs, kept for rollback
    stxos: Database<SerdeBincode<OutPoint>, SerdeBincode<SpentOutput>>,
    /// Every transaction processed, with its classification
    txs: Database<SerdeBincode<Txid>, SerdeBincode<Tx>>,
    /// Block records by height, kept for rollback
    blocks: Database<SerdeBincode<u32>, SerdeBincode<BlockRecord>>,
}

impl State {
    pub const NUM_DBS: u32 = 7;

    pub fn new(env: &heed::Env) -> Result<Self, Error> {
        let mut rwtxn = env.write_txn()?;
        let tip = env.create_database(&mut rwtxn, Some("tip"))?;
        let height = env.create_database(&mut rwtxn, Some("height"))?;
        let genesis = env.create_database(&mut rwtxn, Some("genesis"))?;
        let utxos = env.create_database(&mut rwtxn, Some("utxos"))?;
        let stxos = env.create_database(&mut rwtxn, Some("stxos"))?;
        let txs = env.create_database(&mut rwtxn, Some("txs"))?;
        let blocks = env.create_database(&mut rwtxn, Some("blocks"))?;
        rwtxn.commit()?;
        Ok(Self {
            tip,
            height,
            genesis,
            utxos,
            stxos,
            txs,
            blocks,
        })
    }

    pub fn try_get_tip(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Option<BlockHash>, Error> {
        Ok(self.tip.get(rotxn, &UnitKey)?)
    }

    pub fn try_get_height(&self, rotxn: &RoTxn) -> Result<Option<u32>, Error> {
        Ok(self.height.get(rotxn, &UnitKey)?)
    }

    pub fn try_get_genesis(&self, rotxn: &RoTxn) -> Result<Option<Txid>, Error> {
        Ok(self.genesis.get(rotxn, &UnitKey)?)
    }

    /// Record the genesis transaction. Fails if one was already adopted.
    pub fn set_genesis(
        &self,
        rwtxn: &mut RwTxn,
        txid: Txid,
    ) -> Result<(), Error> {
        if let Some(existing) = self.genesis.get(rwtxn, &UnitKey)? {
            return Err(Error::GenesisAlreadySet {
                existing,
                candidate: txid,
            });
        }
        self.genesis.put(rwtxn, &UnitKey, &txid)?;
        Ok(())
    }

    pub fn is_unspent(
        &self,
        rotxn: &RoTxn,
        outpoint: &OutPoint,
    ) -> Result<bool, Error> {
        Ok(self.utxos.get(rotxn, outpoint)?.is_some())
    }

    pub fn try_get_utxo(
        &self,
        rotxn: &RoTxn,
        outpoint: &OutPoint,
    ) -> Result<Option<TxOutput>, Error> {
        Ok(self.utxos.get(rotxn, outpoint)?)
    }

    /// Register a verified output as unspent.
    pub fn add_utxo(
        &self,
        rwtxn: &mut RwTxn,
        output: &TxOutput,
    ) -> Result<(), Error> {
        self.utxos.put(rwtxn, &output.outpoint(), output)?;
        Ok(())
    }

    /// Consume an unspent colored output. The spent output is retained
    /// for rollback, and the producing transaction's record is updated so
    /// the tx index and the unspent set never disagree.
    pub fn spend_utxo(
        &self,
        rwtxn: &mut RwTxn,
        outpoint: &OutPoint,
        inpoint: InPoint,
    ) -> Result<(), Error> {
        let Some(mut output) = self.utxos.get(rwtxn, outpoint)? else {
            return Err(Error::NoUtxo {
                outpoint: *outpoint,
            });
        };
        self.utxos.delete(rwtxn, outpoint)?;
        output.is_unspent = false;
        self.stxos
            .put(rwtxn, outpoint, &SpentOutput { output, inpoint })?;
        self.set_output_unspent_flag(rwtxn, outpoint, false)?;
        Ok(())
    }

    fn set_output_unspent_flag(
        &self,
        rwtxn: &mut RwTxn,
        outpoint: &OutPoint,
        is_unspent: bool,
    ) -> Result<(), Error> {
        let mut producer = self
            .txs
            .get(rwtxn, &outpoint.txid)?
            .ok_or(Error::NoTx {
                txid: outpoint.txid,
            })?;
        let output = producer
            .outputs
            .get_mut(outpoint.vout as usize)
            .ok_or(Error::NoUtxo {
                outpoint: *outpoint,
            })?;
        output.is_unspent = is_unspent;
        self.txs.put(rwtxn, &outpoint.txid, &producer)?;
        Ok(())
    }

    /// Record a transaction, overwriting any previous record.
    pub fn put_tx(&self, rwtxn: &mut RwTxn, tx: &Tx) -> Result<(), Error> {
        self.txs.put(rwtxn, &tx.txid, tx)?;
        Ok(())
    }

    pub fn try_get_tx(
        &self,
        rotxn: &RoTxn,
        txid: &Txid,
    ) -> Result<Option<Tx>, Error> {
        Ok(self.txs.get(rotxn, txid)?)
    }

    pub fn tx_type(
        &self,
        rotxn: &RoTxn,
        txid: &Txid,
    ) -> Result<Option<TxType>, Error> {
        Ok(self.txs.get(rotxn, txid)?.map(|tx| tx.tx_type))
    }

    pub fn get_utxos(
        &self,
        rotxn: &RoTxn,
    ) -> Result<HashMap<OutPoint, TxOutput>, Error> {
        let mut utxos = HashMap::new();
        for item in self.utxos.iter(rotxn)? {
            let (outpoint, output) = item?;
            utxos.insert(outpoint, output);
        }
        Ok(utxos)
    }

    /// Total colored value issued by genesis and compensation issuance.
    /// Derived from the tx index rather than stored; burns do not reduce
    /// it.
    pub fn colored_supply(&self, rotxn: &RoTxn) -> Result<Amount, Error> {
        let mut supply = Amount::ZERO;
        for item in self.txs.iter(rotxn)? {
            let (_, tx) = item?;
            if !tx.tx_type.issues_supply() {
                continue;
            }
            for output in &tx.outputs {
                if output.is_verified {
                    supply = supply
                        .checked_add(output.value)
                        .ok_or(AmountOverflowError)?;
                }
            }
        }
        Ok(supply)
    }

    /// Outstanding unspent colored value.
    pub fn utxo_set_value(&self, rotxn: &RoTxn) -> Result<Amount, Error> {
        let mut total = Amount::ZERO;
        for item in self.utxos.iter(rotxn)? {
            let (_, output) = item?;
            total = total
                .checked_add(output.value)
                .ok_or(AmountOverflowError)?;
        }
        Ok(total)
    }

    /// Apply a block. The caller commits the write transaction, so a
    /// block is applied fully or not at all.
    pub fn connect_block(
        &self,
        rwtxn: &mut RwTxn,
        block: &Block,
        anchor: &GenesisAnchor,
        registry: &dyn IssuanceRegistry,
    ) -> Result<(), Error> {
        if let Some(tip_hash) = self.try_get_tip(rwtxn)? {
            if block.prev_hash != tip_hash {
                let err = error::InvalidHeader::PrevHash {
                    expected: tip_hash,
                    received: block.prev_hash,
                };
                return Err(Error::InvalidHeader(err));
            }
            let tip_height = self.try_get_height(rwtxn)?.ok_or(Error::NoTip)?;
            if block.height != tip_height + 1 {
                let err = error::InvalidHeader::Height {
                    expected: tip_height + 1,
                    received: block.height,
                };
                return Err(Error::InvalidHeader(err));
            }
        }
        for tx in &block.transactions {
            if block.height == anchor.block_height()
                && anchor.check_and_adopt(self, rwtxn, tx, block.height)?
            {
                continue;
            }
            if self.try_get_genesis(rwtxn)?.is_none() {
                // classification is suppressed until genesis is adopted
                self.put_tx(rwtxn, &Tx::from_raw(tx, block.height))?;
                continue;
            }
            let _tx_type =
                classify::classify_tx(self, rwtxn, registry, tx, block.height)?;
        }
        if self.try_get_genesis(rwtxn)?.is_none()
            && block.height >= anchor.block_height()
        {
            return Err(Error::GenesisNotFound {
                txid: anchor.txid(),
                block_height: anchor.block_height(),
            });
        }
        let record = BlockRecord {
            hash: block.hash,
            prev_hash: block.prev_hash,
            txids: block.transactions.iter().map(|tx| tx.txid).collect(),
        };
        self.blocks.put(rwtxn, &block.height, &record)?;
        self.tip.put(rwtxn, &UnitKey, &block.hash)?;
        self.height.put(rwtxn, &UnitKey, &block.height)?;
        Ok(())
    }

    /// Disconnect the tip block, restoring the ledger to its state before
    /// the block was connected.
    pub fn disconnect_tip(&self, rwtxn: &mut RwTxn) -> Result<(), Error> {
        let height = self.try_get_height(rwtxn)?.ok_or(Error::NoTip)?;
        let record = self
            .blocks
            .get(rwtxn, &height)?
            .ok_or(Error::NoBlockRecord { height })?;
        // revert txs, last-to-first
        for txid in record.txids.iter().rev() {
            let tx = self
                .txs
                .get(rwtxn, txid)?
                .ok_or(Error::NoTx { txid: *txid })?;
            // remove this tx's colored outputs, last-to-first
            for output in tx.outputs.iter().rev() {
                if !output.is_verified {
                    continue;
                }
                let outpoint = output.outpoint();
                if !self.utxos.delete(rwtxn, &outpoint)? {
                    return Err(Error::NoUtxo { outpoint });
                }
            }
            // restore this tx's consumed inputs, last-to-first
            for outpoint in tx.inputs.iter().rev() {
                let Some(spent) = self.stxos.get(rwtxn, outpoint)? else {
                    // nothing colored was consumed through this input
                    continue;
                };
                if spent.inpoint.txid != *txid {
                    // colored output spent by an earlier tx; this tx
                    // referenced it after it had left the unspent set
                    continue;
                }
                self.stxos.delete(rwtxn, outpoint)?;
                let mut output = spent.output;
                output.is_unspent = true;
                self.utxos.put(rwtxn, outpoint, &output)?;
                self.set_output_unspent_flag(rwtxn, outpoint, true)?;
            }
            if self.try_get_genesis(rwtxn)? == Some(*txid) {
                // rolling back past genesis re-enters the awaiting state
                self.genesis.delete(rwtxn, &UnitKey)?;
            }
            self.txs.delete(rwtxn, txid)?;
        }
        self.blocks.delete(rwtxn, &height)?;
        match height.checked_sub(1) {
            Some(prev_height)
                if self.blocks.get(rwtxn, &prev_height)?.is_some() =>
            {
                self.tip.put(rwtxn, &UnitKey, &record.prev_hash)?;
                self.height.put(rwtxn, &UnitKey, &prev_height)?;
            }
            _ => {
                self.tip.delete(rwtxn, &UnitKey)?;
                self.height.delete(rwtxn, &UnitKey)?;
            }
        }
        Ok(())
    }

    /// Capture the full ledger state.
    pub fn snapshot(&self, rotxn: &RoTxn) -> Result<Snapshot, Error> {
        let mut utxos = BTreeMap::new();
        for item in self.utxos.iter(rotxn)? {
            let (outpoint, output) = item?;
            utxos.insert(outpoint, output);
        }
        let mut stxos = BTreeMap::new();
        for item in self.stxos.iter(rotxn)? {
            let (outpoint, spent) = item?;
            stxos.insert(outpoint, spent);
        }
        let mut txs = BTreeMap::new();
        for item in self.txs.iter(rotxn)? {
            let (txid, tx) = item?;
            txs.insert(txid, tx);
        }
        let mut blocks = BTreeMap::new();
        for item in self.blocks.iter(rotxn)? {
            let (height, record) = item?;
            blocks.insert(height, record);
        }
        Ok(Snapshot {
            tip: self.try_get_tip(rotxn)?,
            height: self.try_get_height(rotxn)?,
            genesis: self.try_get_genesis(rotxn)?,
            utxos,
            stxos,
            txs,
            blocks,
        })
    }

    /// Replace the ledger state with a previously-captured snapshot.
    pub fn restore(
        &self,
        rwtxn: &mut RwTxn,
        snapshot: &Snapshot,
    ) -> Result<(), Error> {
        self.tip.clear(rwtxn)?;
        self.height.clear(rwtxn)?;
        self.genesis.clear(rwtxn)?;
        self.utxos.clear(rwtxn)?;
        self.stxos.clear(rwtxn)?;
        self.txs.clear(rwtxn)?;
        self.blocks.clear(rwtxn)?;
        if let Some(tip) = snapshot.tip {
            self.tip.put(rwtxn, &UnitKey, &tip)?;
        }
        if let Some(height) = snapshot.height {
            self.height.put(rwtxn, &UnitKey, &height)?;
        }
        if let Some(genesis) = snapshot.genesis {
            self.genesis.put(rwtxn, &UnitKey, &genesis)?;
        }
        for (outpoint, output) in &snapshot.utxos {
            self.utxos.put(rwtxn, outpoint, output)?;
        }
        for (outpoint, spent) in &snapshot.stxos {
            self.stxos.put(rwtxn, outpoint, spent)?;
        }
        for (txid, tx) in &snapshot.txs {
            self.txs.put(rwtxn, txid, tx)?;
        }
        for (height, record) in &snapshot.blocks {
            self.blocks.put(rwtxn, height, record)?;
        }
        Ok(())
    }
}
