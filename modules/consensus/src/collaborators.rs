//! Interfaces the ingestion pipeline consumes from the rest of the node.

use anyhow::{bail, Result};
use tessera_common::{BlockHash, CandidateBlock, TxHash, WitnessId, WitnessList};
use tessera_module_state_store::StateAccess;

use crate::fork_node::ForkNode;

/// Result of one transaction replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx: TxHash,
    pub success: bool,
    pub message: String,
}

/// What a successful block execution produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub receipts: Vec<TxReceipt>,

    /// Replacement witness roster requested by the block, if any.
    /// Takes effect once the block is irreversible.
    pub witness_update: Option<Vec<WitnessId>>,
}

/// Reasons deterministic replay of a block failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// The producer is not in the active roster.
    #[error("witness {witness} is not active")]
    UnauthorizedWitness { witness: WitnessId },

    /// A transaction publisher lacked authority for an action.
    #[error("transaction {tx} not authorised: {reason}")]
    Unauthorized { tx: TxHash, reason: String },

    /// Transactions are not in a valid order.
    #[error("transaction {tx} out of order: {reason}")]
    Ordering { tx: TxHash, reason: String },

    /// Re-execution did not reproduce the declared outcome.
    #[error("transaction {tx} diverged: {reason}")]
    Diverged { tx: TxHash, reason: String },
}

/// Deterministic transaction replay against a working view.
pub trait ExecutionEngine: Send + Sync {
    fn execute(
        &self,
        block: &CandidateBlock,
        state: &mut dyn StateAccess,
        witnesses: &WitnessList,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Pool of not-yet-included transactions, told about every newly linked node.
pub trait TransactionPool: Send + Sync {
    fn pending_count(&self) -> usize;

    /// Recompute queued transaction validity against the linked node.
    fn on_node_linked(&self, node: &ForkNode);
}

/// Durable storage for irreversible blocks.
pub trait ChainStore: Send + Sync {
    fn get_by_hash(&self, hash: &BlockHash) -> Result<Option<CandidateBlock>>;

    fn get_hash_by_number(&self, number: u64) -> Result<Option<BlockHash>>;

    /// Store a block that has become irreversible. Storing the same block
    /// twice is not an error.
    fn persist(&self, block: &CandidateBlock) -> Result<()>;
}

/// Structural well-formedness check run before a block enters the tree.
pub trait BlockVerifier: Send + Sync {
    fn verify_self(&self, block: &CandidateBlock) -> Result<()>;
}

/// Checks the carried hash against the content and that a producer is named.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegrityVerifier;

impl BlockVerifier for IntegrityVerifier {
    fn verify_self(&self, block: &CandidateBlock) -> Result<()> {
        if block.witness().is_empty() {
            bail!("block {} has no witness", block.hash());
        }
        if !block.verify_integrity() {
            bail!("block {} content does not match its hash", block.hash());
        }
        Ok(())
    }
}
