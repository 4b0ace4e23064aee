use serde::{Deserialize, Serialize};
use thiserror::Error;

mod address;
pub mod constants;
pub mod hashes;
mod transaction;

pub use address::Address;
pub use hashes::{BlockHash, Hash, Txid};
pub use transaction::{
    Commitment, CommitmentTag, InPoint, OutPoint, Output, OutputPayload,
    SpentOutput, Transaction, Tx, TxInputs, TxOutput, TxOutputs, TxType,
};

/// (de)serialize as hex strings for human-readable forms like json,
/// and default serialization for non human-readable formats like bincode
mod serde_hexstr_human_readable {
    use hex::{FromHex, ToHex};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize + ToHex,
    {
        if serializer.is_human_readable() {
            hex::serde::serialize(data, serializer)
        } else {
            data.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromHex,
        <T as FromHex>::Error: std::fmt::Display,
    {
        if deserializer.is_human_readable() {
            hex::serde::deserialize(deserializer)
        } else {
            T::deserialize(deserializer)
        }
    }
}

#[derive(Debug, Error)]
#[error("amount overflow")]
pub struct AmountOverflowError;

/// A base-chain block as delivered by the block source.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Block {
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub height: u32,
    pub transactions: Vec<Transaction>,
}

/// Per-height block record kept for rollback.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockRecord {
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub txids: Vec<Txid>,
}
