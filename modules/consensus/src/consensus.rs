//! Tessera consensus module
//! Holds candidate blocks in a fork tree, verifies them against isolated
//! state checkpoints, and advances the irreversible root as witnesses confirm

pub mod block_ingest;
pub mod chain_store;
pub mod collaborators;
pub mod finality;
pub mod fork_node;
pub mod fork_tree;
pub mod ingest_error;
pub mod ingest_observer;
pub mod tree_error;
pub mod witness_slot;

pub use block_ingest::{BlockIngest, ChainBlock, Collaborators};
pub use chain_store::MemoryChainStore;
pub use collaborators::{
    BlockVerifier, ChainStore, ExecutionEngine, ExecutionError, ExecutionOutcome,
    IntegrityVerifier, TransactionPool, TxReceipt,
};
pub use finality::{ConfirmationDepth, FinalityRule, WitnessQuorum};
pub use fork_node::{ForkNode, LinkState};
pub use fork_tree::{ForkTree, RootAdvance};
pub use ingest_error::{AddOutcome, IngestError};
pub use ingest_observer::{BlockIngestObserver, BlockOrigin, BlockStatus, TracingObserver};
pub use tree_error::ForkTreeError;
pub use witness_slot::{SlotLimitExceeded, WitnessSlotPolicy};
