//! Error types for fork tree operations.

use tessera_common::BlockHash;

/// Errors returned by [`ForkTree`](crate::fork_tree::ForkTree) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkTreeError {
    /// A node with this hash is already in the tree.
    #[error("duplicate block: {hash}")]
    Duplicate { hash: BlockHash },

    /// A block hash referenced by an operation is not in the tree.
    #[error("block not in tree: {hash}")]
    NotFound { hash: BlockHash },

    /// The block cannot follow the finalized root.
    #[error("block {number} at or below finalized root {root_number}")]
    BelowRoot { number: u64, root_number: u64 },

    /// Linking requires a linked parent.
    #[error("parent {parent} of {hash} is not linked")]
    ParentNotLinked { hash: BlockHash, parent: BlockHash },

    /// Block number does not follow its parent's.
    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidBlockNumber { expected: u64, got: u64 },

    /// The node is already linked.
    #[error("block already linked: {hash}")]
    AlreadyLinked { hash: BlockHash },

    /// Only pending nodes may be deleted.
    #[error("cannot delete linked block: {hash}")]
    CannotDeleteLinked { hash: BlockHash },

    /// A new root must be a linked descendant of the current root.
    #[error("cannot promote {hash} to root")]
    InvalidRoot { hash: BlockHash },
}
