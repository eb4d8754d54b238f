//! Production-serial accounting per witness and slot.

use tessera_common::{CandidateBlock, ChainParams};

use crate::fork_node::ForkNode;

/// Serial number that breached the per-slot production limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLimitExceeded {
    pub serial_num: u32,
    pub max: u32,
}

/// Bounds how many consecutive blocks one witness may produce in one slot.
#[derive(Debug, Clone)]
pub struct WitnessSlotPolicy {
    params: ChainParams,
}

impl WitnessSlotPolicy {
    pub fn new(params: &ChainParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub fn max_blocks(&self) -> u32 {
        self.params.max_blocks_per_witness_slot
    }

    /// Serial of `block` on top of `parent`: zero if the witness or the slot
    /// changed, otherwise one more than the parent's.
    pub fn compute_serial(&self, parent: &ForkNode, block: &CandidateBlock) -> u32 {
        let same_witness = block.witness() == parent.witness();
        let same_slot = self.params.slot_of(block.time()) == self.params.slot_of(parent.time());
        if same_witness && same_slot {
            parent.serial_num.saturating_add(1)
        } else {
            0
        }
    }

    /// Compute the serial and check it against the limit.
    pub fn serial_for(
        &self,
        parent: &ForkNode,
        block: &CandidateBlock,
    ) -> Result<u32, SlotLimitExceeded> {
        let serial_num = self.compute_serial(parent, block);
        self.check(serial_num)
    }

    pub fn check(&self, serial_num: u32) -> Result<u32, SlotLimitExceeded> {
        let max = self.max_blocks();
        if serial_num >= max {
            Err(SlotLimitExceeded { serial_num, max })
        } else {
            Ok(serial_num)
        }
    }
}
