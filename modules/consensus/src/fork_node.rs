//! Block representation within the fork tree.

use std::sync::Arc;
use tessera_common::{BlockHash, CandidateBlock, WitnessId, WitnessList};

/// Whether a node has been connected to the finalized root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Inserted, not yet verified; parent may be unknown or unverified.
    Pending,
    /// Verified, with its state checkpoint committed, and every ancestor
    /// back to the root linked too.
    Linked,
}

/// A node in the fork tree wrapping one candidate block.
///
/// Parent and children are stored as hashes resolved through the tree;
/// the tree alone owns nodes.
#[derive(Debug, Clone)]
pub struct ForkNode {
    /// Shared immutable block.
    pub block: Arc<CandidateBlock>,
    /// Block hash (identity key).
    pub hash: BlockHash,
    /// Block number.
    pub number: u64,
    /// Parent block hash. May not be present in the tree.
    pub parent: BlockHash,
    /// Child block hashes present in the tree.
    pub children: Vec<BlockHash>,
    /// Linkage state.
    pub state: LinkState,
    /// Consecutive blocks by this witness in this slot, counting from 0.
    pub serial_num: u32,
    /// Witness roster in force from this block; set at link time.
    pub witness_list: WitnessList,
}

impl ForkNode {
    /// Create a pending node with no children.
    pub fn pending(block: Arc<CandidateBlock>) -> Self {
        Self {
            hash: block.hash(),
            number: block.number(),
            parent: block.parent_hash(),
            block,
            children: Vec::new(),
            state: LinkState::Pending,
            serial_num: 0,
            witness_list: WitnessList::default(),
        }
    }

    /// Create an already linked node, used for the tree root.
    pub fn linked_root(block: Arc<CandidateBlock>, witness_list: WitnessList) -> Self {
        let mut node = Self::pending(block);
        node.state = LinkState::Linked;
        node.witness_list = witness_list;
        node
    }

    pub fn is_linked(&self) -> bool {
        self.state == LinkState::Linked
    }

    pub fn witness(&self) -> &WitnessId {
        self.block.witness()
    }

    pub fn time(&self) -> i64 {
        self.block.time()
    }
}
