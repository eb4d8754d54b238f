//! Finality rules deciding how far the fork tree root may advance.

use std::collections::HashSet;

use tessera_common::{BlockHash, ChainParams, FinalityRuleKind};

use crate::fork_tree::ForkTree;

/// Picks the deepest block made irreversible by linking a node.
pub trait FinalityRule: Send + Sync {
    /// Given a freshly linked node, return the ancestor that should become
    /// the new root, or `None` if nothing new is final. The returned hash
    /// must lie on the path from `linked` to the current root.
    fn finalized_ancestor(&self, tree: &ForkTree, linked: &BlockHash) -> Option<BlockHash>;

    fn name(&self) -> &'static str;
}

/// Build the rule selected in the chain parameters.
pub fn from_params(params: &ChainParams) -> Box<dyn FinalityRule> {
    match params.finality_rule {
        FinalityRuleKind::WitnessQuorum => Box::new(WitnessQuorum),
        FinalityRuleKind::ConfirmationDepth => {
            Box::new(ConfirmationDepth::new(params.confirmation_depth))
        }
    }
}

/// A block is final once more than two thirds of the active witnesses have
/// produced a block on top of it, counting the block itself.
///
/// Walks from the linked node back towards the root, accumulating distinct
/// active producers, and stops at the first node where the tally reaches
/// the roster's confirmation threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct WitnessQuorum;

impl FinalityRule for WitnessQuorum {
    fn finalized_ancestor(&self, tree: &ForkTree, linked: &BlockHash) -> Option<BlockHash> {
        let roster = &tree.find(linked)?.witness_list;
        let threshold = roster.confirm_threshold();
        let root = tree.root_hash();

        let mut confirmed = HashSet::new();
        for node in tree.path_to_root(linked) {
            if node.hash == root {
                break;
            }
            if roster.is_active(node.witness()) {
                confirmed.insert(node.witness());
            }
            if confirmed.len() >= threshold {
                return Some(node.hash);
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "witness-quorum"
    }
}

/// A block is final once `depth` blocks have been linked on top of it.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationDepth {
    depth: u64,
}

impl ConfirmationDepth {
    pub fn new(depth: u64) -> Self {
        Self { depth }
    }
}

impl FinalityRule for ConfirmationDepth {
    fn finalized_ancestor(&self, tree: &ForkTree, linked: &BlockHash) -> Option<BlockHash> {
        let number = tree.find(linked)?.number;
        let target = number.checked_sub(self.depth)?;
        if target <= tree.root().number {
            return None;
        }
        tree.path_to_root(linked)
            .into_iter()
            .find(|node| node.number == target)
            .map(|node| node.hash)
    }

    fn name(&self) -> &'static str {
        "confirmation-depth"
    }
}
