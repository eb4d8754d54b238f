//! In-memory durable chain store

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use tessera_common::{BlockHash, CandidateBlock};
use tracing::debug;

use crate::collaborators::ChainStore;

#[derive(Default)]
struct Inner {
    blocks: HashMap<BlockHash, CandidateBlock>,
    by_number: BTreeMap<u64, BlockHash>,
}

/// Chain store keeping irreversible blocks in memory, indexed by hash and
/// by number.
#[derive(Default)]
pub struct MemoryChainStore {
    inner: RwLock<Inner>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.blocks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest stored block number
    pub fn tip_number(&self) -> Option<u64> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.by_number.keys().next_back().copied())
    }
}

impl ChainStore for MemoryChainStore {
    fn get_by_hash(&self, hash: &BlockHash) -> Result<Option<CandidateBlock>> {
        let inner = self.inner.read().map_err(|_| anyhow!("chain store lock poisoned"))?;
        Ok(inner.blocks.get(hash).cloned())
    }

    fn get_hash_by_number(&self, number: u64) -> Result<Option<BlockHash>> {
        let inner = self.inner.read().map_err(|_| anyhow!("chain store lock poisoned"))?;
        Ok(inner.by_number.get(&number).copied())
    }

    fn persist(&self, block: &CandidateBlock) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("chain store lock poisoned"))?;
        let hash = block.hash();
        match inner.by_number.get(&block.number()) {
            Some(existing) if *existing == hash => return Ok(()),
            Some(existing) => bail!(
                "block {} conflicts with stored block {} at number {}",
                hash,
                existing,
                block.number()
            ),
            None => {}
        }
        debug!(number = block.number(), %hash, "Persisting block");
        inner.by_number.insert(block.number(), hash);
        inner.blocks.insert(hash, block.clone());
        Ok(())
    }
}
