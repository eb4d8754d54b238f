//! Observer trait for block ingestion events.

use chrono::Utc;
use tessera_common::{BlockHash, WitnessId};
use tracing::{info, warn};

use crate::fork_node::ForkNode;

/// Where a block handed to the pipeline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
    /// Received from a peer
    Received,
    /// Produced by this node
    Generated,
    /// Replayed from local storage on startup
    Recovered,
}

impl BlockOrigin {
    pub fn action(&self) -> &'static str {
        match self {
            BlockOrigin::Received => "Receive",
            BlockOrigin::Generated => "Generate",
            BlockOrigin::Recovered => "Recover",
        }
    }
}

/// Status record emitted for every linked block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStatus {
    pub origin: BlockOrigin,
    pub number: u64,
    pub hash: BlockHash,
    pub witness: WitnessId,
    /// Production time, unix nanoseconds
    pub time: i64,
    pub serial_num: u32,
    /// Number of the finalized root after this block was linked
    pub confirmed_number: u64,
    pub tx_count: usize,
    pub pending_tx_count: usize,
    /// Milliseconds between production and linking
    pub latency_ms: i64,
}

impl BlockStatus {
    pub fn new(
        origin: BlockOrigin,
        node: &ForkNode,
        confirmed_number: u64,
        pending_tx_count: usize,
    ) -> Self {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        Self {
            origin,
            number: node.number,
            hash: node.hash,
            witness: node.witness().clone(),
            time: node.time(),
            serial_num: node.serial_num,
            confirmed_number,
            tx_count: node.block.txs().len(),
            pending_tx_count,
            latency_ms: now.saturating_sub(node.time()) / 1_000_000,
        }
    }
}

/// Callback receiver for ingestion events.
///
/// Calls are made while the pipeline holds its writer lock, so
/// implementations must not call back into the pipeline.
pub trait BlockIngestObserver: Send + Sync {
    /// A block was linked into the tree.
    fn block_linked(&self, status: &BlockStatus);

    /// A candidate was discarded.
    fn block_rejected(&self, hash: BlockHash, reason: &str);

    /// The finalized root moved.
    fn root_advanced(&self, number: u64, hash: BlockHash);
}

/// Observer that writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BlockIngestObserver for TracingObserver {
    fn block_linked(&self, status: &BlockStatus) {
        info!(
            action = status.origin.action(),
            number = status.number,
            hash = %status.hash,
            witness = %status.witness,
            time = status.time,
            serial = status.serial_num,
            confirmed = status.confirmed_number,
            txs = status.tx_count,
            pending_txs = status.pending_tx_count,
            latency_ms = status.latency_ms,
            "Linked block"
        );
    }

    fn block_rejected(&self, hash: BlockHash, reason: &str) {
        warn!(%hash, reason, "Rejected block");
    }

    fn root_advanced(&self, number: u64, hash: BlockHash) {
        info!(number, %hash, "Finalized root advanced");
    }
}
