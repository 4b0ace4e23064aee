//! Transaction type classification

use std::collections::HashSet;

use bitcoin::Amount;
use heed::RwTxn;

use crate::{
    state::{Error, State},
    types::{
        AmountOverflowError, CommitmentTag, InPoint, OutputPayload,
        Transaction, Tx, TxType, Txid,
    },
};

/// Read-only source of approved compensation issuance requests, keyed by
/// proposal id. Supplied by the proposal/voting subsystem.
pub trait IssuanceRegistry: Send + Sync {
    fn is_approved(&self, proposal: &Txid) -> bool;
}

/// In-memory issuance registry.
#[derive(Clone, Debug, Default)]
pub struct ApprovedProposals(HashSet<Txid>);

impl ApprovedProposals {
    pub fn insert(&mut self, proposal: Txid) -> bool {
        self.0.insert(proposal)
    }
}

impl FromIterator<Txid> for ApprovedProposals {
    fn from_iter<I: IntoIterator<Item = Txid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IssuanceRegistry for ApprovedProposals {
    fn is_approved(&self, proposal: &Txid) -> bool {
        self.0.contains(proposal)
    }
}

/// Classify a transaction against the current ledger state: spend its
/// colored inputs, color its outputs, and record it in the tx index.
/// Returns the assigned type. Rejection is the `Invalid` variant, not an
/// error.
pub fn classify_tx(
    state: &State,
    rwtxn: &mut RwTxn,
    registry: &dyn IssuanceRegistry,
    tx: &Transaction,
    height: u32,
) -> Result<TxType, Error> {
    let mut record = Tx::from_raw(tx, height);

    // Colored value entering through the inputs. A duplicate outpoint in
    // the input list counts once; references to outputs absent from the
    // unspent set contribute nothing.
    let mut spent = Vec::new();
    let mut seen = HashSet::new();
    let mut value_in = Amount::ZERO;
    for (vin, outpoint) in tx.inputs.iter().enumerate() {
        if !seen.insert(*outpoint) {
            continue;
        }
        let Some(utxo) = state.try_get_utxo(rwtxn, outpoint)? else {
            continue;
        };
        value_in = value_in
            .checked_add(utxo.value)
            .ok_or(AmountOverflowError)?;
        spent.push((vin as u32, utxo));
    }

    let commitment = tx.parsed_commitment();

    // A compensation request issues new colored value without consuming
    // any, provided its proposal was approved.
    let approved_issuance = commitment.as_ref().and_then(|commitment| {
        if commitment.tag != CommitmentTag::CompensationRequest {
            return None;
        }
        let proposal = commitment.proposal_id()?;
        registry.is_approved(&proposal).then_some(proposal)
    });

    if value_in == Amount::ZERO && approved_issuance.is_none() {
        record.tx_type = TxType::Invalid;
        state.put_tx(rwtxn, &record)?;
        return Ok(TxType::Invalid);
    }

    // Colored value entering a transaction is committed even if a
    // downstream rule rejects it.
    for (vin, utxo) in &spent {
        let inpoint = InPoint {
            txid: tx.txid,
            vin: *vin,
        };
        state.spend_utxo(rwtxn, &utxo.outpoint(), inpoint)?;
    }

    if tx.outputs.is_empty() {
        record.tx_type = TxType::Invalid;
        state.put_tx(rwtxn, &record)?;
        return Ok(TxType::Invalid);
    }

    record.tx_type = if let Some(proposal) = approved_issuance {
        // Issuance outputs are new supply, not allocated from inputs.
        for output in &mut record.outputs {
            output.is_verified = true;
            output.is_unspent = true;
            output.payload = Some(OutputPayload::Issuance { proposal });
        }
        TxType::CompensationIssuance
    } else {
        // First-output-first allocation: an output is colored only if its
        // full value is covered. Allocation stops at the first output it
        // cannot cover, and whatever remains is burned.
        let mut remaining = value_in;
        for output in &mut record.outputs {
            if remaining < output.value {
                break;
            }
            remaining = remaining
                .checked_sub(output.value)
                .expect("remaining covers the output");
            output.is_verified = true;
            output.is_unspent = true;
        }
        let tag_type = commitment
            .as_ref()
            .and_then(|commitment| TxType::from_tag(commitment.tag));
        match tag_type {
            Some(tx_type) => {
                // the commitment body rides on the first colored output
                if let (Some(commitment), Some(first)) = (
                    &commitment,
                    record.outputs.iter_mut().find(|output| output.is_verified),
                ) {
                    first.payload = Some(OutputPayload::Commitment {
                        tag: commitment.tag,
                        body: commitment.body.clone(),
                    });
                }
                tx_type
            }
            None if remaining > Amount::ZERO => TxType::FeePayment,
            None => TxType::Transfer,
        }
    };

    for output in &record.outputs {
        if output.is_verified {
            state.add_utxo(rwtxn, output)?;
        }
    }
    state.put_tx(rwtxn, &record)?;
    tracing::trace!(
        txid = %record.txid,
        tx_type = %record.tx_type,
        "classified transaction"
    );
    Ok(record.tx_type)
}
