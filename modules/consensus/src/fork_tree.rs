//! Fork tree of candidate blocks rooted at the finalized block.
//!
//! Every node is keyed by hash in a single arena. Linked nodes always form
//! one connected subtree under the root; pending nodes may hang below a
//! linked or pending parent, or wait in the orphan index for a parent that
//! has not arrived yet.
//!
//! The best chain ends at the linked node with the greatest block number,
//! ties broken in favour of the lowest hash so every node picks the same
//! head from the same tree.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tessera_common::{BlockHash, CandidateBlock, WitnessList};
use tracing::debug;

use crate::finality::FinalityRule;
use crate::fork_node::{ForkNode, LinkState};
use crate::tree_error::ForkTreeError;

/// Result of moving the finalized root.
#[derive(Debug, Clone)]
pub struct RootAdvance {
    /// Root before the move.
    pub old_root: BlockHash,
    /// Root after the move.
    pub new_root: BlockHash,
    /// Number of the new root.
    pub new_root_number: u64,
    /// Blocks that became irreversible, ascending, ending at the new root.
    pub finalized: Vec<Arc<CandidateBlock>>,
    /// Every node dropped from the tree, including the old root.
    pub removed: Vec<BlockHash>,
}

/// The top-level data structure holding all non-finalized blocks.
///
/// Operations are single-threaded; the owning pipeline serialises writers.
pub struct ForkTree {
    /// All nodes keyed by hash.
    nodes: HashMap<BlockHash, ForkNode>,
    /// Pending nodes waiting for a parent not in the tree, keyed by that parent.
    orphans: HashMap<BlockHash, Vec<BlockHash>>,
    /// Finalized root.
    root: BlockHash,
    /// Tip of the best chain.
    head: BlockHash,
    /// Decides how far the root may advance.
    finality: Box<dyn FinalityRule>,
}

impl ForkTree {
    /// Create a tree containing only the finalized root.
    pub fn new(
        root_block: Arc<CandidateBlock>,
        witness_list: WitnessList,
        finality: Box<dyn FinalityRule>,
    ) -> Self {
        let root = root_block.hash();
        let mut nodes = HashMap::new();
        nodes.insert(root, ForkNode::linked_root(root_block, witness_list));
        Self {
            nodes,
            orphans: HashMap::new(),
            root,
            head: root,
            finality,
        }
    }

    /// Look up a node by hash.
    pub fn find(&self, hash: &BlockHash) -> Option<&ForkNode> {
        self.nodes.get(hash)
    }

    fn get(&self, hash: &BlockHash) -> Result<&ForkNode, ForkTreeError> {
        self.nodes.get(hash).ok_or(ForkTreeError::NotFound { hash: *hash })
    }

    pub fn root(&self) -> &ForkNode {
        &self.nodes[&self.root]
    }

    pub fn root_hash(&self) -> BlockHash {
        self.root
    }

    /// Tip of the best chain.
    pub fn head(&self) -> &ForkNode {
        &self.nodes[&self.head]
    }

    /// Total number of nodes, pending and linked.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes waiting on a parent not in the tree.
    pub fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    /// Number of nodes not linked yet, whether their parent is missing or
    /// itself pending.
    pub fn pending_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.is_linked()).count()
    }

    /// Insert a block as a pending node.
    ///
    /// If the parent is in the tree the node becomes its child; otherwise it
    /// is indexed as an orphan under the missing parent hash. Any orphans
    /// already waiting on this block are adopted as its children.
    pub fn insert(&mut self, block: Arc<CandidateBlock>) -> Result<(), ForkTreeError> {
        let hash = block.hash();
        if self.nodes.contains_key(&hash) {
            return Err(ForkTreeError::Duplicate { hash });
        }

        let root_number = self.root().number;
        if block.number() <= root_number {
            return Err(ForkTreeError::BelowRoot {
                number: block.number(),
                root_number,
            });
        }

        let mut node = ForkNode::pending(block);
        node.children = self.orphans.remove(&hash).unwrap_or_default();
        let parent = node.parent;

        match self.nodes.get_mut(&parent) {
            Some(parent_node) => parent_node.children.push(hash),
            None => self.orphans.entry(parent).or_default().push(hash),
        }

        debug!(
            number = node.number,
            %hash,
            adopted = node.children.len(),
            "Inserted pending block"
        );
        self.nodes.insert(hash, node);
        Ok(())
    }

    /// Transition a pending node to linked.
    ///
    /// The caller must already have committed the node's state checkpoint.
    /// Updates the head if the node now ends the best chain.
    pub fn link(
        &mut self,
        hash: &BlockHash,
        serial_num: u32,
        witness_list: WitnessList,
    ) -> Result<(), ForkTreeError> {
        let node = self.get(hash)?;
        if node.is_linked() {
            return Err(ForkTreeError::AlreadyLinked { hash: *hash });
        }

        let parent = self.nodes.get(&node.parent).filter(|p| p.is_linked()).ok_or(
            ForkTreeError::ParentNotLinked {
                hash: *hash,
                parent: node.parent,
            },
        )?;
        if node.number != parent.number + 1 {
            return Err(ForkTreeError::InvalidBlockNumber {
                expected: parent.number + 1,
                got: node.number,
            });
        }

        if let Some(node) = self.nodes.get_mut(hash) {
            node.state = LinkState::Linked;
            node.serial_num = serial_num;
            node.witness_list = witness_list;
        }

        if Self::outranks(&self.nodes[hash], self.head()) {
            self.head = *hash;
        }
        Ok(())
    }

    /// Remove a pending node.
    ///
    /// Its children are not deleted; they go back to waiting on this hash
    /// in the orphan index until the block arrives again.
    pub fn delete(&mut self, hash: &BlockHash) -> Result<(), ForkTreeError> {
        let node = self.get(hash)?;
        if node.is_linked() {
            return Err(ForkTreeError::CannotDeleteLinked { hash: *hash });
        }

        let Some(node) = self.nodes.remove(hash) else {
            return Err(ForkTreeError::NotFound { hash: *hash });
        };

        if let Some(parent) = self.nodes.get_mut(&node.parent) {
            parent.children.retain(|h| h != hash);
        } else if let Some(waiting) = self.orphans.get_mut(&node.parent) {
            waiting.retain(|h| h != hash);
            if waiting.is_empty() {
                self.orphans.remove(&node.parent);
            }
        }

        if !node.children.is_empty() {
            self.orphans.entry(*hash).or_default().extend(node.children);
        }

        debug!(number = node.number, %hash, "Deleted pending block");
        Ok(())
    }

    /// Pending children of a node, in arrival order.
    pub fn pending_children(&self, hash: &BlockHash) -> Vec<BlockHash> {
        self.nodes
            .get(hash)
            .map(|node| {
                node.children
                    .iter()
                    .filter(|c| self.nodes.get(c).is_some_and(|n| !n.is_linked()))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes from `hash` back to the root, both inclusive. Empty if `hash`
    /// is not connected to the root.
    pub fn path_to_root(&self, hash: &BlockHash) -> Vec<&ForkNode> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(hash);
        while let Some(node) = current {
            path.push(node);
            if node.hash == self.root {
                return path;
            }
            current = self.nodes.get(&node.parent);
        }
        Vec::new()
    }

    /// Block at `number` on the best chain.
    pub fn block_by_number(&self, number: u64) -> Option<&ForkNode> {
        if number < self.root().number || number > self.head().number {
            return None;
        }
        self.path_to_root(&self.head).into_iter().find(|n| n.number == number)
    }

    /// Ask the finality rule how far the root may advance given `linked`.
    /// Returns `None` if the root stays where it is.
    pub fn finality_target(&self, linked: &BlockHash) -> Option<BlockHash> {
        let node = self.nodes.get(linked).filter(|n| n.is_linked())?;
        let target = self.finality.finalized_ancestor(self, &node.hash)?;
        let target_node = self.nodes.get(&target).filter(|n| n.is_linked())?;
        (target_node.number > self.root().number).then_some(target)
    }

    /// Blocks that a move of the root to `target` makes irreversible,
    /// ascending and excluding the current root.
    pub fn finalized_path(&self, target: &BlockHash) -> Vec<Arc<CandidateBlock>> {
        let mut path: Vec<Arc<CandidateBlock>> = self
            .path_to_root(target)
            .into_iter()
            .filter(|n| n.hash != self.root)
            .map(|n| n.block.clone())
            .collect();
        path.reverse();
        path
    }

    /// Recompute finality after `linked` was linked and promote the root if
    /// it progressed.
    pub fn advance_root(
        &mut self,
        linked: &BlockHash,
    ) -> Result<Option<RootAdvance>, ForkTreeError> {
        match self.finality_target(linked) {
            Some(target) => self.promote_root(&target).map(Some),
            None => Ok(None),
        }
    }

    /// Make `target` the finalized root.
    ///
    /// Prunes every subtree that does not contain `target`, drops orphans
    /// that can no longer attach above the new root, and promotes pending
    /// witness rosters whose scheduling block is now final.
    pub fn promote_root(&mut self, target: &BlockHash) -> Result<RootAdvance, ForkTreeError> {
        let target_node = self.get(target)?;
        if !target_node.is_linked() || self.path_to_root(target).is_empty() {
            return Err(ForkTreeError::InvalidRoot { hash: *target });
        }
        let new_root_number = target_node.number;
        let old_root = self.root;
        let finalized = self.finalized_path(target);

        // Everything reachable from the old root but not from the new one
        let keep: HashSet<BlockHash> = self.collect_all_from(*target).into_iter().collect();
        let mut removed: Vec<BlockHash> = self
            .collect_all_from(old_root)
            .into_iter()
            .filter(|h| !keep.contains(h))
            .collect();

        // Orphans that would have to attach at or below the new root
        let dead_orphans: Vec<BlockHash> = self
            .orphans
            .iter()
            .filter(|(_, waiting)| {
                waiting
                    .iter()
                    .all(|h| self.nodes.get(h).is_none_or(|n| n.number <= new_root_number + 1))
            })
            .map(|(parent, _)| *parent)
            .collect();
        for parent in dead_orphans {
            if let Some(waiting) = self.orphans.remove(&parent) {
                for h in waiting {
                    removed.extend(self.collect_all_from(h));
                }
            }
        }

        for h in &removed {
            self.nodes.remove(h);
        }

        self.root = *target;
        for node in self.nodes.values_mut() {
            if node.is_linked() {
                node.witness_list.promote_if_final(new_root_number);
            }
        }

        if !self.nodes.contains_key(&self.head) {
            self.head = self.best_linked();
        }

        debug!(
            old_root = %old_root,
            new_root = %target,
            number = new_root_number,
            removed = removed.len(),
            "Promoted finalized root"
        );

        Ok(RootAdvance {
            old_root,
            new_root: *target,
            new_root_number,
            finalized,
            removed,
        })
    }

    /// Total order used for head selection.
    fn outranks(a: &ForkNode, b: &ForkNode) -> bool {
        (a.number, Reverse(a.hash)) > (b.number, Reverse(b.hash))
    }

    /// Best linked node in the tree.
    fn best_linked(&self) -> BlockHash {
        self.nodes
            .values()
            .filter(|n| n.is_linked())
            .max_by_key(|n| (n.number, Reverse(n.hash)))
            .map(|n| n.hash)
            .unwrap_or(self.root)
    }

    /// Collect `hash` and every hash reachable below it.
    fn collect_all_from(&self, hash: BlockHash) -> Vec<BlockHash> {
        let mut result = vec![hash];
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.get(&h) {
                for &child in &node.children {
                    result.push(child);
                    stack.push(child);
                }
            }
        }
        result
    }
}
