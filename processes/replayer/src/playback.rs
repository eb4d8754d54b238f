//! Block log playback through the ingestion pipeline

use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tessera_common::{CandidateBlock, ChainParams, WitnessId, WitnessList};
use tessera_module_consensus::{
    AddOutcome, BlockIngest, BlockOrigin, Collaborators, ForkNode, IngestError, MemoryChainStore,
    TransactionPool,
};
use tessera_module_state_store::MemoryStateStore;
use tracing::{info, warn};

use crate::kv_engine::KvEngine;
use crate::replayer_config::ReplayerConfig;

/// Recorded chain: the starting block, its roster, and every block after it
/// in the order they were received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLog {
    pub genesis: CandidateBlock,
    pub witnesses: Vec<WitnessId>,
    pub blocks: Vec<CandidateBlock>,
}

impl BlockLog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = read_to_string(path)
            .with_context(|| format!("Failed to read block log {path:?}"))?;
        serde_json::from_str(&file).with_context(|| format!("Failed to parse block log {path:?}"))
    }
}

/// Pool with nothing queued, as a replay has no live transactions
struct IdlePool;

impl TransactionPool for IdlePool {
    fn pending_count(&self) -> usize {
        0
    }

    fn on_node_linked(&self, _node: &ForkNode) {}
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Blocks linked, including held blocks linked by a later parent
    pub linked: usize,
    /// Blocks still waiting on a parent at the end of the log
    pub orphaned: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub head_number: u64,
    pub lib_number: u64,
}

pub fn replay(log: BlockLog, params: &ChainParams, cfg: &ReplayerConfig) -> Result<ReplaySummary> {
    let state = MemoryStateStore::new(log.genesis.hash());
    let collaborators = Collaborators::new(
        Arc::new(KvEngine),
        Arc::new(IdlePool),
        Arc::new(MemoryChainStore::new()),
    );
    let ingest = BlockIngest::new(
        params,
        log.genesis,
        WitnessList::new(log.witnesses),
        Box::new(state),
        collaborators,
    )?;

    let mut summary = ReplaySummary::default();
    for block in log.blocks {
        let number = block.number();
        match ingest.add(block, BlockOrigin::Recovered) {
            Ok(AddOutcome::Linked {
                descendants_linked, ..
            }) => summary.linked += 1 + descendants_linked.len(),
            Ok(AddOutcome::Orphaned { .. }) => {}
            Err(IngestError::Duplicate { .. }) => summary.duplicates += 1,
            Err(e) if e.is_rejection() => {
                if cfg.stop_on_rejection {
                    bail!("Block {number} rejected: {e}");
                }
                warn!(number, error = %e, "Skipping rejected block");
                summary.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    summary.orphaned = ingest.with_tree(|tree| tree.pending_count())?;
    summary.head_number = ingest.head_block()?.number();
    summary.lib_number = ingest.lib_block()?.number();
    info!(
        linked = summary.linked,
        orphaned = summary.orphaned,
        rejected = summary.rejected,
        duplicates = summary.duplicates,
        head = summary.head_number,
        lib = summary.lib_number,
        "Replay complete"
    );
    Ok(summary)
}
