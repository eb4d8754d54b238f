//! Tessera state snapshot store
//! Named checkpoints of key/value state, one per verified block, with a
//! single working view that is checked out from a checkpoint, mutated, and
//! then either committed under a new identity or rolled back.

pub mod memory_state_store;
pub mod typed;

pub use memory_state_store::MemoryStateStore;
pub use typed::TypedStateAccess;

use tessera_common::BlockHash;

/// Errors returned by [`StateStore`] operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateStoreError {
    /// The checkpoint was committed before with different content. Execution
    /// was not deterministic; the node cannot continue safely.
    #[error("divergent commit of checkpoint {id}")]
    DivergentCommit { id: BlockHash },

    /// The checkpoint does not exist
    #[error("unknown checkpoint {id}")]
    UnknownCheckpoint { id: BlockHash },
}

/// Key/value access to the active working view
pub trait StateAccess {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&mut self, key: &str, value: Vec<u8>);
    fn delete(&mut self, key: &str);
}

/// Checkpoint lifecycle over the working view
///
/// Working views are copy-on-write relative to the checkpoint they were
/// checked out from, so sibling blocks verified from the same parent never
/// see each other's writes.
pub trait StateStore: StateAccess + Send {
    /// Make the given checkpoint the working view. Returns false, leaving
    /// the working view untouched, if there is no such checkpoint.
    fn checkout(&mut self, id: &BlockHash) -> bool;

    /// Freeze the working view under `id` and keep it checked out.
    /// Re-committing identical content is a no-op.
    fn commit(&mut self, id: BlockHash) -> Result<(), StateStoreError>;

    /// Discard writes made since the last checkout or commit
    fn rollback(&mut self);

    fn has_checkpoint(&self, id: &BlockHash) -> bool;

    /// Drop a checkpoint no longer reachable from the fork tree.
    /// Returns false if it did not exist.
    fn release(&mut self, id: &BlockHash) -> bool;

    /// Checkpoint the working view was derived from, if any
    fn checked_out(&self) -> Option<BlockHash>;

    /// Read a key from a committed checkpoint without touching the working view
    fn get_at(&self, id: &BlockHash, key: &str) -> Result<Option<Vec<u8>>, StateStoreError>;

    /// The working view as plain key/value access, for handing to executors
    fn access(&mut self) -> &mut dyn StateAccess;
}
