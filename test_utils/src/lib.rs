//! Builders for blocks, chains and witness rosters used across Tessera tests

use tessera_common::{
    Action, BlockHash, BlockHeader, CandidateBlock, Transaction, WitnessId, WitnessList,
};

/// Slot length matching the default chain parameters
pub const SLOT_NS: i64 = 3_000_000_000;

/// Gap between consecutive test blocks in the same slot
pub const BLOCK_GAP_NS: i64 = 1_000_000;

pub fn witness_list(names: &[&str]) -> WitnessList {
    WitnessList::new(names.iter().map(|n| WitnessId::from(*n)).collect())
}

/// Block 0 produced by `witness` at time zero
pub fn genesis(witness: &str) -> CandidateBlock {
    CandidateBlock::new(
        BlockHeader {
            number: 0,
            parent_hash: BlockHash::default(),
            witness: witness.into(),
            time: 0,
        },
        vec![],
    )
}

/// A transaction carrying `(contract, action, data)` calls
pub fn tx(publisher: &str, actions: &[(&str, &str, &str)]) -> Transaction {
    Transaction {
        time: 0,
        publisher: publisher.to_string(),
        actions: actions
            .iter()
            .map(|(contract, name, data)| Action::new(contract, name, data))
            .collect(),
    }
}

/// Builds a block on top of a parent. Defaults to the parent's witness,
/// one block gap later, with no transactions.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    header: BlockHeader,
    txs: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn child_of(parent: &CandidateBlock) -> Self {
        Self {
            header: BlockHeader {
                number: parent.number() + 1,
                parent_hash: parent.hash(),
                witness: parent.witness().clone(),
                time: parent.time() + BLOCK_GAP_NS,
            },
            txs: Vec::new(),
        }
    }

    pub fn witness(mut self, witness: &str) -> Self {
        self.header.witness = witness.into();
        self
    }

    pub fn time(mut self, time: i64) -> Self {
        self.header.time = time;
        self
    }

    /// Move into the following production slot
    pub fn next_slot(mut self) -> Self {
        self.header.time = (self.header.time.div_euclid(SLOT_NS) + 1) * SLOT_NS;
        self
    }

    pub fn number(mut self, number: u64) -> Self {
        self.header.number = number;
        self
    }

    pub fn tx(mut self, tx: Transaction) -> Self {
        self.txs.push(tx);
        self
    }

    pub fn build(self) -> CandidateBlock {
        CandidateBlock::new(self.header, self.txs)
    }
}

/// Builds linear runs of blocks
pub struct ChainBuilder {
    tip: CandidateBlock,
}

impl ChainBuilder {
    pub fn on(tip: &CandidateBlock) -> Self {
        Self { tip: tip.clone() }
    }

    /// Append one block from `witness` in the current slot
    pub fn push(&mut self, witness: &str) -> CandidateBlock {
        let block = BlockBuilder::child_of(&self.tip).witness(witness).build();
        self.tip = block.clone();
        block
    }

    /// Append one block from each witness in turn, each in a fresh slot
    pub fn rotate(&mut self, witnesses: &[&str]) -> Vec<CandidateBlock> {
        witnesses
            .iter()
            .map(|w| {
                let block = BlockBuilder::child_of(&self.tip).witness(w).next_slot().build();
                self.tip = block.clone();
                block
            })
            .collect()
    }

    /// Append `count` blocks from the same witness in the current slot
    pub fn run(&mut self, witness: &str, count: usize) -> Vec<CandidateBlock> {
        (0..count).map(|_| self.push(witness)).collect()
    }

    pub fn tip(&self) -> &CandidateBlock {
        &self.tip
    }
}
