use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::{
    address::Address, hashes::Txid, serde_hexstr_human_readable,
};

/// Reference to a transaction output.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Reference to a transaction input.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct InPoint {
    pub txid: Txid,
    /// index of the spend in the inputs of the consuming tx
    pub vin: u32,
}

/// A base-chain output as delivered by the block source.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Output {
    pub address: Address,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: bitcoin::Amount,
}

pub type TxInputs = Vec<OutPoint>;

pub type TxOutputs = Vec<Output>;

/// A base-chain transaction as delivered by the block source.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Transaction {
    pub txid: Txid,
    pub inputs: TxInputs,
    pub outputs: TxOutputs,
    /// embedded commitment payload, if the tx carries one
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub commitment: Option<Vec<u8>>,
}

impl Transaction {
    pub fn parsed_commitment(&self) -> Option<Commitment> {
        Commitment::parse(self.commitment.as_deref()?)
    }
}

/// Leading byte of a commitment payload, selecting the semantic subtype.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::Display,
)]
pub enum CommitmentTag {
    Proposal,
    CompensationRequest,
    BlindVote,
    VoteReveal,
    Lockup,
    Unlock,
    AssetListingFee,
}

impl CommitmentTag {
    pub const fn byte(self) -> u8 {
        match self {
            Self::Proposal => 0x10,
            Self::CompensationRequest => 0x11,
            Self::BlindVote => 0x12,
            Self::VoteReveal => 0x13,
            Self::Lockup => 0x14,
            Self::Unlock => 0x15,
            Self::AssetListingFee => 0x16,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::Proposal),
            0x11 => Some(Self::CompensationRequest),
            0x12 => Some(Self::BlindVote),
            0x13 => Some(Self::VoteReveal),
            0x14 => Some(Self::Lockup),
            0x15 => Some(Self::Unlock),
            0x16 => Some(Self::AssetListingFee),
            _ => None,
        }
    }
}

/// Decoded commitment payload: one tag byte followed by a tag-specific
/// body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Commitment {
    pub tag: CommitmentTag,
    pub body: Vec<u8>,
}

impl Commitment {
    /// Decode a raw payload. Empty or unrecognized payloads yield `None`;
    /// they never invalidate the carrying transaction.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (&tag_byte, body) = raw.split_first()?;
        let tag = CommitmentTag::from_byte(tag_byte)?;
        Some(Self {
            tag,
            body: body.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(1 + self.body.len());
        raw.push(self.tag.byte());
        raw.extend_from_slice(&self.body);
        raw
    }

    /// The proposal a compensation request commits to.
    pub fn proposal_id(&self) -> Option<Txid> {
        let bytes = <[u8; 32]>::try_from(self.body.as_slice()).ok()?;
        Some(Txid(bytes))
    }
}

/// Classification verdict for a transaction.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum::Display,
)]
pub enum TxType {
    /// not yet examined
    #[default]
    Undefined,
    /// examined and rejected
    Invalid,
    Genesis,
    Transfer,
    FeePayment,
    CompensationIssuance,
    Proposal,
    BlindVote,
    VoteReveal,
    Lockup,
    Unlock,
    AssetListingFee,
}

impl TxType {
    /// `true` if transactions of this type carry colored value.
    pub fn is_colored(self) -> bool {
        !matches!(self, Self::Undefined | Self::Invalid)
    }

    /// `true` if verified outputs of this type add to colored supply.
    pub fn issues_supply(self) -> bool {
        matches!(self, Self::Genesis | Self::CompensationIssuance)
    }

    /// The type selected by a recognized commitment tag. Compensation
    /// requests are resolved separately, against the issuance registry.
    pub fn from_tag(tag: CommitmentTag) -> Option<Self> {
        match tag {
            CommitmentTag::Proposal => Some(Self::Proposal),
            CommitmentTag::BlindVote => Some(Self::BlindVote),
            CommitmentTag::VoteReveal => Some(Self::VoteReveal),
            CommitmentTag::Lockup => Some(Self::Lockup),
            CommitmentTag::Unlock => Some(Self::Unlock),
            CommitmentTag::AssetListingFee => Some(Self::AssetListingFee),
            CommitmentTag::CompensationRequest => None,
        }
    }
}

/// Semantic payload attached to a colored output by classification.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutputPayload {
    /// commitment body carried by the first colored output of a tagged tx
    Commitment {
        tag: CommitmentTag,
        #[serde(with = "serde_hexstr_human_readable")]
        body: Vec<u8>,
    },
    /// the approved proposal that authorized an issuance
    Issuance { proposal: Txid },
}

/// A transaction output tracked by the ledger, with its colored-coin
/// status.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TxOutput {
    pub txid: Txid,
    pub vout: u32,
    pub address: Address,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: bitcoin::Amount,
    pub payload: Option<OutputPayload>,
    /// classified as colored at least once
    pub is_verified: bool,
    /// available for spending within the colored ledger
    pub is_unspent: bool,
}

impl TxOutput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// A spent colored output, kept for rollback.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpentOutput {
    pub output: TxOutput,
    pub inpoint: InPoint,
}

/// A transaction as recorded by the ledger, with its classification.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tx {
    pub txid: Txid,
    pub inputs: TxInputs,
    pub outputs: Vec<TxOutput>,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub commitment: Option<Vec<u8>>,
    pub tx_type: TxType,
    pub height: u32,
}

impl Tx {
    /// Record a raw transaction with all outputs uncolored and the type
    /// not yet assigned.
    pub fn from_raw(tx: &Transaction, height: u32) -> Self {
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(vout, output)| TxOutput {
                txid: tx.txid,
                vout: vout as u32,
                address: output.address,
                value: output.value,
                payload: None,
                is_verified: false,
                is_unspent: false,
            })
            .collect();
        Self {
            txid: tx.txid,
            inputs: tx.inputs.clone(),
            outputs,
            commitment: tx.commitment.clone(),
            tx_type: TxType::Undefined,
            height,
        }
    }

    pub fn parsed_commitment(&self) -> Option<Commitment> {
        Commitment::parse(self.commitment.as_deref()?)
    }
}
