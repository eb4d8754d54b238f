//! Core type definitions for Tessera

use crate::hash::{BlockHash, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a block producer
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WitnessId(pub String);

impl WitnessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for WitnessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WitnessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single contract call within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Contract the call is addressed to
    pub contract: String,

    /// Entry point name
    pub action_name: String,

    /// Opaque call argument, interpreted by the execution engine
    pub data: String,
}

impl Action {
    pub fn new(contract: &str, action_name: &str, data: &str) -> Self {
        Self {
            contract: contract.to_string(),
            action_name: action_name.to_string(),
            data: data.to_string(),
        }
    }
}

/// Transaction as carried in a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Creation time, unix nanoseconds
    pub time: i64,

    /// Account paying for and authorising the transaction
    pub publisher: String,

    /// Ordered contract calls
    pub actions: Vec<Action>,
}

impl Transaction {
    /// Content hash over time, publisher and every action
    pub fn hash(&self) -> TxHash {
        let mut preimage = Preimage::default();
        preimage
            .fixed(&self.time.to_le_bytes())
            .field(self.publisher.as_bytes())
            .count(self.actions.len());
        for action in &self.actions {
            preimage
                .field(action.contract.as_bytes())
                .field(action.action_name.as_bytes())
                .field(action.data.as_bytes());
        }
        TxHash::digest_of([preimage.as_bytes()])
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Sequence number - parent number + 1
    pub number: u64,

    /// Identity of the parent block
    pub parent_hash: BlockHash,

    /// Producer of this block
    pub witness: WitnessId,

    /// Production time, unix nanoseconds
    pub time: i64,
}

/// A block offered for ingestion. Immutable once constructed; the hash is
/// carried alongside the content so that a tampered copy can be detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBlock {
    header: BlockHeader,
    txs: Vec<Transaction>,
    hash: BlockHash,
}

impl CandidateBlock {
    /// Build a block, deriving its identity from the content
    pub fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        let hash = Self::content_hash(&header, &txs);
        Self { header, txs, hash }
    }

    /// Reassemble a block received with a claimed hash. The claim is not
    /// checked here - see `verify_integrity`.
    pub fn from_parts(header: BlockHeader, txs: Vec<Transaction>, hash: BlockHash) -> Self {
        Self { header, txs, hash }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> BlockHash {
        self.header.parent_hash
    }

    pub fn witness(&self) -> &WitnessId {
        &self.header.witness
    }

    pub fn time(&self) -> i64 {
        self.header.time
    }

    /// True if the carried hash matches the content
    pub fn verify_integrity(&self) -> bool {
        Self::content_hash(&self.header, &self.txs) == self.hash
    }

    fn content_hash(header: &BlockHeader, txs: &[Transaction]) -> BlockHash {
        let mut preimage = Preimage::default();
        preimage
            .fixed(&header.number.to_le_bytes())
            .fixed(header.parent_hash.as_ref())
            .field(header.witness.as_str().as_bytes())
            .fixed(&header.time.to_le_bytes())
            .count(txs.len());
        for tx in txs {
            preimage.fixed(tx.hash().as_ref());
        }
        BlockHash::digest_of([preimage.as_bytes()])
    }
}

/// Hash input where every variable-length field and list carries a u64 LE
/// length, so moving a boundary between fields changes the bytes hashed
#[derive(Default)]
struct Preimage(Vec<u8>);

impl Preimage {
    fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn count(&mut self, len: usize) -> &mut Self {
        self.fixed(&(len as u64).to_le_bytes())
    }

    fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.count(bytes.len()).fixed(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A witness roster scheduled to replace the active one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWitnesses {
    /// Number of the block whose execution scheduled the change
    pub number: u64,

    pub witnesses: Vec<WitnessId>,
}

/// Witness roster in force at a block
///
/// A pending roster only becomes active once the block that scheduled it is
/// irreversible, so every honest node switches at the same point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessList {
    pub active: Vec<WitnessId>,
    pub pending: Option<PendingWitnesses>,
}

impl WitnessList {
    pub fn new(active: Vec<WitnessId>) -> Self {
        Self {
            active,
            pending: None,
        }
    }

    pub fn active(&self) -> &[WitnessId] {
        &self.active
    }

    pub fn is_active(&self, witness: &WitnessId) -> bool {
        self.active.contains(witness)
    }

    /// Number of distinct witnesses needed to make a block irreversible
    pub fn confirm_threshold(&self) -> usize {
        self.active.len() * 2 / 3 + 1
    }

    /// Schedule a replacement roster, superseding any earlier schedule
    pub fn schedule(&mut self, number: u64, witnesses: Vec<WitnessId>) {
        self.pending = Some(PendingWitnesses { number, witnesses });
    }

    /// Promote the pending roster if its scheduling block is at or below the
    /// irreversible number. Returns true if the active roster changed.
    pub fn promote_if_final(&mut self, irreversible_number: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.number <= irreversible_number => {
                if let Some(pending) = self.pending.take() {
                    self.active = pending.witnesses;
                }
                true
            }
            _ => false,
        }
    }
}
