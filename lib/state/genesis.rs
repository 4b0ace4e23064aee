//! Genesis anchoring

use heed::RwTxn;

use crate::{
    state::{Error, State},
    types::{Transaction, Tx, TxType, Txid},
};

/// The configuration-pinned transaction/height pair that seeds the
/// colored ledger. All colored value descends from it; it is never
/// discovered heuristically.
#[derive(Clone, Copy, Debug)]
pub struct GenesisAnchor {
    txid: Txid,
    block_height: u32,
}

impl GenesisAnchor {
    pub fn new(txid: Txid, block_height: u32) -> Self {
        Self { txid, block_height }
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    /// Returns `true` and adopts the tx as genesis iff it matches the
    /// configured txid/height pair. On a match after a genesis was
    /// already adopted, fails with a configuration error.
    pub fn check_and_adopt(
        &self,
        state: &State,
        rwtxn: &mut RwTxn,
        tx: &Transaction,
        block_height: u32,
    ) -> Result<bool, Error> {
        if tx.txid != self.txid || block_height != self.block_height {
            return Ok(false);
        }
        state.set_genesis(rwtxn, tx.txid)?;
        let mut tx = Tx::from_raw(tx, block_height);
        tx.tx_type = TxType::Genesis;
        for output in &mut tx.outputs {
            output.is_unspent = true;
            output.is_verified = true;
        }
        for output in &tx.outputs {
            state.add_utxo(rwtxn, output)?;
        }
        state.put_tx(rwtxn, &tx)?;
        tracing::info!(
            txid = %tx.txid,
            block_height,
            "adopted genesis transaction"
        );
        Ok(true)
    }
}
