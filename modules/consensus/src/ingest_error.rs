//! Error and outcome types for block ingestion.

use tessera_common::{BlockHash, WitnessId};
use tessera_module_state_store::StateStoreError;

use crate::collaborators::ExecutionError;
use crate::tree_error::ForkTreeError;

/// Accepted outcome of [`BlockIngest::add`](crate::block_ingest::BlockIngest::add).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The block was linked, along with any descendants that were waiting on it.
    Linked {
        hash: BlockHash,
        serial_num: u32,
        /// Previously queued descendants linked as a result, in link order
        descendants_linked: Vec<BlockHash>,
    },

    /// The parent is unknown or not yet linked. The block is held and will be
    /// linked automatically once the parent links.
    Orphaned { missing_parent: BlockHash },
}

/// Errors returned by block ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The block is already in the tree. Safe to ignore.
    #[error("duplicate block {hash}")]
    Duplicate { hash: BlockHash },

    /// The block is at or below the finalized root and cannot be added.
    #[error("block {hash} number {number} is not above finalized number {finalized}")]
    BelowFinalized {
        hash: BlockHash,
        number: u64,
        finalized: u64,
    },

    /// The structural self-check refused the block.
    #[error("self check failed for {hash}")]
    SelfCheckFailed {
        hash: BlockHash,
        #[source]
        source: anyhow::Error,
    },

    /// The witness exceeded its per-slot production limit.
    #[error("witness {witness} produced block {hash} with serial {serial_num}, limit {max}")]
    SlotLimitExceeded {
        hash: BlockHash,
        witness: WitnessId,
        serial_num: u32,
        max: u32,
    },

    /// Deterministic replay of the block failed.
    #[error("verification failed for {hash}")]
    VerificationFailed {
        hash: BlockHash,
        #[source]
        source: ExecutionError,
    },

    /// A linked block has no state checkpoint.
    #[error("no state checkpoint for linked block {hash}")]
    MissingCheckpoint { hash: BlockHash },

    /// Durable chain store failure.
    #[error("chain store: {0}")]
    ChainStore(#[source] anyhow::Error),

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Tree(#[from] ForkTreeError),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl IngestError {
    /// True if the error rejects one candidate rather than signalling a fault
    /// in the node itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IngestError::Duplicate { .. }
                | IngestError::BelowFinalized { .. }
                | IngestError::SelfCheckFailed { .. }
                | IngestError::SlotLimitExceeded { .. }
                | IngestError::VerificationFailed { .. }
                | IngestError::Tree(ForkTreeError::InvalidBlockNumber { .. })
        )
    }
}
