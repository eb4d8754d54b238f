//! In-memory state store built on imbl persistent maps
//! Cloning a map is O(1) and shares structure, so every checkpoint costs
//! only the entries written by its own block.

use crate::{StateAccess, StateStore, StateStoreError};
use imbl::HashMap;
use std::collections::HashMap as StdHashMap;
use tessera_common::BlockHash;
use tracing::{debug, error};

type KvMap = HashMap<String, Vec<u8>>;

struct Checkpoint {
    /// Checkpoint this one was derived from; `None` for the base state
    parent: Option<BlockHash>,
    state: KvMap,
}

pub struct MemoryStateStore {
    /// Committed checkpoints keyed by block hash
    checkpoints: StdHashMap<BlockHash, Checkpoint>,

    /// Checkpoint the working view was derived from
    base: Option<BlockHash>,

    /// Mutable working view
    working: KvMap,
}

impl MemoryStateStore {
    /// Create a store whose only checkpoint is the empty state of `genesis`
    pub fn new(genesis: BlockHash) -> Self {
        Self::with_state(genesis, std::iter::empty())
    }

    /// Create a store whose only checkpoint holds the given entries
    pub fn with_state(
        genesis: BlockHash,
        entries: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Self {
        let state: KvMap = entries.into_iter().collect();
        let mut checkpoints = StdHashMap::new();
        checkpoints.insert(
            genesis,
            Checkpoint {
                parent: None,
                state: state.clone(),
            },
        );
        Self {
            checkpoints,
            base: Some(genesis),
            working: state,
        }
    }

    /// Number of live checkpoints
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Logical parent of a checkpoint
    pub fn parent_of(&self, id: &BlockHash) -> Option<BlockHash> {
        self.checkpoints.get(id).and_then(|c| c.parent)
    }
}

impl StateAccess for MemoryStateStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.working.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.working.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.working.remove(key);
    }
}

impl StateStore for MemoryStateStore {
    fn checkout(&mut self, id: &BlockHash) -> bool {
        match self.checkpoints.get(id) {
            Some(checkpoint) => {
                self.working = checkpoint.state.clone();
                self.base = Some(*id);
                true
            }
            None => false,
        }
    }

    fn commit(&mut self, id: BlockHash) -> Result<(), StateStoreError> {
        if let Some(existing) = self.checkpoints.get(&id) {
            if existing.state != self.working {
                error!(%id, "Checkpoint committed twice with different content");
                return Err(StateStoreError::DivergentCommit { id });
            }
            debug!(%id, "Checkpoint already committed with identical content");
            self.base = Some(id);
            return Ok(());
        }

        debug!(%id, parent = ?self.base, entries = self.working.len(), "Committing checkpoint");
        self.checkpoints.insert(
            id,
            Checkpoint {
                parent: self.base,
                state: self.working.clone(),
            },
        );
        self.base = Some(id);
        Ok(())
    }

    fn rollback(&mut self) {
        self.working = self
            .base
            .and_then(|id| self.checkpoints.get(&id))
            .map(|c| c.state.clone())
            .unwrap_or_default();
    }

    fn has_checkpoint(&self, id: &BlockHash) -> bool {
        self.checkpoints.contains_key(id)
    }

    fn release(&mut self, id: &BlockHash) -> bool {
        let released = self.checkpoints.remove(id).is_some();
        if released {
            debug!(%id, "Released checkpoint");
            if self.base == Some(*id) {
                self.base = None;
            }
        }
        released
    }

    fn checked_out(&self) -> Option<BlockHash> {
        self.base
    }

    fn get_at(&self, id: &BlockHash, key: &str) -> Result<Option<Vec<u8>>, StateStoreError> {
        self.checkpoints
            .get(id)
            .map(|c| c.state.get(key).cloned())
            .ok_or(StateStoreError::UnknownCheckpoint { id: *id })
    }

    fn access(&mut self) -> &mut dyn StateAccess {
        self
    }
}
