//! Block ingestion pipeline.
//!
//! Takes candidate blocks in any order, verifies each one against the state
//! of its parent, links it into the fork tree and advances finality. Blocks
//! whose parent is not linked yet are held in the tree and linked as soon as
//! the parent is.
//!
//! Writers are serialised by the state store mutex, which is held for the
//! whole of an `add`. The fork tree sits behind its own read/write lock that
//! the writer only takes for short mutation steps, so queries keep running
//! while a block executes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_common::{BlockHash, CandidateBlock, ChainParams, WitnessList};
use tessera_module_state_store::{StateStore, StateStoreError};
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    BlockVerifier, ChainStore, ExecutionEngine, IntegrityVerifier, TransactionPool,
};
use crate::finality;
use crate::fork_node::ForkNode;
use crate::fork_tree::{ForkTree, RootAdvance};
use crate::ingest_error::{AddOutcome, IngestError};
use crate::ingest_observer::{BlockIngestObserver, BlockOrigin, BlockStatus, TracingObserver};
use crate::tree_error::ForkTreeError;
use crate::witness_slot::{SlotLimitExceeded, WitnessSlotPolicy};

/// External services the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ExecutionEngine>,
    pub tx_pool: Arc<dyn TransactionPool>,
    pub chain_store: Arc<dyn ChainStore>,
    pub verifier: Arc<dyn BlockVerifier>,
    pub observer: Arc<dyn BlockIngestObserver>,
}

impl Collaborators {
    /// Collaborators with hash-integrity self checks and a tracing observer
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        tx_pool: Arc<dyn TransactionPool>,
        chain_store: Arc<dyn ChainStore>,
    ) -> Self {
        Self {
            engine,
            tx_pool,
            chain_store,
            verifier: Arc::new(IntegrityVerifier),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn BlockVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BlockIngestObserver>) -> Self {
        self.observer = observer;
        self
    }
}

/// A block returned by a query, from the tree or from durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub block: Arc<CandidateBlock>,
    /// Roster in force from this block; only known for linked tree nodes
    pub witness_list: Option<WitnessList>,
    /// True if the block is the finalized root or below it
    pub irreversible: bool,
}

pub struct BlockIngest {
    tree: RwLock<ForkTree>,
    state: Mutex<Box<dyn StateStore>>,
    slot_policy: WitnessSlotPolicy,
    collaborators: Collaborators,
}

impl BlockIngest {
    /// Create a pipeline rooted at an irreversible block.
    ///
    /// The state store must already hold a checkpoint for `root`. The root
    /// is written to the chain store if it is not there yet.
    pub fn new(
        params: &ChainParams,
        root: CandidateBlock,
        witnesses: WitnessList,
        state: Box<dyn StateStore>,
        collaborators: Collaborators,
    ) -> Result<Self, IngestError> {
        let hash = root.hash();
        if !state.has_checkpoint(&hash) {
            return Err(IngestError::MissingCheckpoint { hash });
        }

        let store = &collaborators.chain_store;
        if store.get_by_hash(&hash).map_err(IngestError::ChainStore)?.is_none() {
            store.persist(&root).map_err(IngestError::ChainStore)?;
        }

        let rule = finality::from_params(params);
        info!(
            number = root.number(),
            %hash,
            witnesses = witnesses.active().len(),
            finality = rule.name(),
            max_blocks_per_slot = params.max_blocks_per_witness_slot,
            "Block ingestion started"
        );

        Ok(Self {
            tree: RwLock::new(ForkTree::new(Arc::new(root), witnesses, rule)),
            state: Mutex::new(state),
            slot_policy: WitnessSlotPolicy::new(params),
            collaborators,
        })
    }

    /// Ingest a candidate block.
    ///
    /// Returns `Linked` if the block was verified and linked, together with
    /// any held descendants it unblocked, or `Orphaned` if it has to wait for
    /// its parent. Rejections of descendants are reported to the observer;
    /// only rejections of `block` itself are returned.
    ///
    /// A chain store failure while finalizing does not undo any link. Every
    /// unblocked descendant is still linked, then the store error is
    /// returned. The root stays put until a later link or
    /// `advance_finality` persists the finalized path.
    pub fn add(
        &self,
        block: CandidateBlock,
        origin: BlockOrigin,
    ) -> Result<AddOutcome, IngestError> {
        let block = Arc::new(block);
        let hash = block.hash();
        let mut state = self
            .state
            .lock()
            .map_err(|_| IngestError::LockPoisoned("state store"))?;

        {
            let tree = self.read_tree()?;
            if tree.find(&hash).is_some() {
                debug!(%hash, "Ignoring duplicate block");
                return Err(IngestError::Duplicate { hash });
            }
            let finalized = tree.root().number;
            if block.number() <= finalized {
                return Err(self.reject(
                    hash,
                    IngestError::BelowFinalized {
                        hash,
                        number: block.number(),
                        finalized,
                    },
                ));
            }
        }

        if let Err(source) = self.collaborators.verifier.verify_self(&block) {
            return Err(self.reject(hash, IngestError::SelfCheckFailed { hash, source }));
        }

        let parent_hash = block.parent_hash();
        let parent_linked = {
            let mut tree = self.write_tree()?;
            tree.insert(block)?;
            tree.find(&parent_hash).is_some_and(ForkNode::is_linked)
        };
        if !parent_linked {
            debug!(%hash, parent = %parent_hash, "Holding block until parent links");
            return Ok(AddOutcome::Orphaned {
                missing_parent: parent_hash,
            });
        }

        let mut store_error = None;
        let serial_num = self.link_one(&mut **state, &hash, origin, &mut store_error)?;

        let mut descendants_linked = Vec::new();
        let mut queue: VecDeque<BlockHash> = self.read_tree()?.pending_children(&hash).into();
        while let Some(child) = queue.pop_front() {
            if self.read_tree()?.find(&child).is_none() {
                // pruned by a root advance while queued
                continue;
            }
            match self.link_one(&mut **state, &child, origin, &mut store_error) {
                Ok(_) => {
                    descendants_linked.push(child);
                    queue.extend(self.read_tree()?.pending_children(&child));
                }
                Err(e) if e.is_rejection() => {
                    debug!(hash = %child, error = %e, "Held descendant rejected");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(err) = store_error {
            return Err(err);
        }
        Ok(AddOutcome::Linked {
            hash,
            serial_num,
            descendants_linked,
        })
    }

    /// Retry finality from the head, after a chain store failure left the
    /// root behind. Returns the number of the last irreversible block.
    pub fn advance_finality(&self) -> Result<u64, IngestError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| IngestError::LockPoisoned("state store"))?;
        let head = self.read_tree()?.head().hash;
        self.finalize_from(&mut **state, &head)?;
        Ok(self.read_tree()?.root().number)
    }

    /// Verify and link a pending node whose parent is linked.
    ///
    /// A chain store failure while finalizing is left in `store_error`
    /// rather than returned, as the link itself stands.
    fn link_one(
        &self,
        state: &mut dyn StateStore,
        hash: &BlockHash,
        origin: BlockOrigin,
        store_error: &mut Option<IngestError>,
    ) -> Result<u32, IngestError> {
        let (block, parent) = {
            let tree = self.read_tree()?;
            let node = tree.find(hash).ok_or(ForkTreeError::NotFound { hash: *hash })?;
            let parent = tree.find(&node.parent).filter(|p| p.is_linked()).ok_or(
                ForkTreeError::ParentNotLinked {
                    hash: *hash,
                    parent: node.parent,
                },
            )?;
            (node.block.clone(), parent.clone())
        };

        if block.number() != parent.number + 1 {
            let err = ForkTreeError::InvalidBlockNumber {
                expected: parent.number + 1,
                got: block.number(),
            };
            return Err(self.discard(hash, err.into()));
        }

        let serial_num = match self.slot_policy.serial_for(&parent, &block) {
            Ok(serial_num) => serial_num,
            Err(SlotLimitExceeded { serial_num, max }) => {
                let err = IngestError::SlotLimitExceeded {
                    hash: *hash,
                    witness: block.witness().clone(),
                    serial_num,
                    max,
                };
                return Err(self.discard(hash, err));
            }
        };

        let mut witness_list = parent.witness_list.clone();
        if state.checkout(hash) {
            debug!(%hash, "Reusing existing checkpoint");
        } else {
            if !state.checkout(&parent.hash) {
                return Err(IngestError::MissingCheckpoint { hash: parent.hash });
            }
            let outcome = match self.collaborators.engine.execute(
                &block,
                state.access(),
                &parent.witness_list,
            ) {
                Ok(outcome) => outcome,
                Err(source) => {
                    state.rollback();
                    let err = IngestError::VerificationFailed {
                        hash: *hash,
                        source,
                    };
                    return Err(self.discard(hash, err));
                }
            };
            if let Some(witnesses) = outcome.witness_update {
                debug!(%hash, count = witnesses.len(), "Witness change scheduled");
                witness_list.schedule(block.number(), witnesses);
            }
            match state.commit(*hash) {
                Ok(()) => {}
                Err(StateStoreError::DivergentCommit { id }) => {
                    error!(%id, "Block execution is not deterministic");
                    panic!("divergent commit of checkpoint {id}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.write_tree()?.link(hash, serial_num, witness_list)?;

        match self.finalize_from(state, hash) {
            Ok(true) => *store_error = None,
            Ok(false) => {}
            Err(IngestError::ChainStore(source)) => {
                warn!(%hash, error = %source, "Chain store write failed, finality deferred");
                *store_error = Some(IngestError::ChainStore(source));
            }
            Err(e) => return Err(e),
        }

        let (node, confirmed_number) = {
            let tree = self.read_tree()?;
            let node = tree
                .find(hash)
                .cloned()
                .ok_or(ForkTreeError::NotFound { hash: *hash })?;
            (node, tree.root().number)
        };

        self.collaborators.tx_pool.on_node_linked(&node);
        if origin == BlockOrigin::Recovered {
            debug!(
                number = node.number,
                witnesses = ?node.witness_list.active(),
                "Recovered block roster"
            );
        }

        let pending = self.collaborators.tx_pool.pending_count();
        let status = BlockStatus::new(origin, &node, confirmed_number, pending);
        self.collaborators.observer.block_linked(&status);
        Ok(serial_num)
    }

    /// Persist and promote whatever a linked node makes irreversible.
    /// Returns true if the root moved.
    fn finalize_from(
        &self,
        state: &mut dyn StateStore,
        hash: &BlockHash,
    ) -> Result<bool, IngestError> {
        let finalizing = {
            let tree = self.read_tree()?;
            tree.finality_target(hash).map(|target| (target, tree.finalized_path(&target)))
        };
        let Some((target, path)) = finalizing else {
            return Ok(false);
        };

        // durable storage must hold the whole path before the root moves
        for finalized in &path {
            self.collaborators
                .chain_store
                .persist(finalized)
                .map_err(IngestError::ChainStore)?;
        }
        let advance = self.write_tree()?.promote_root(&target)?;
        self.release_pruned(state, &advance);
        self.collaborators
            .observer
            .root_advanced(advance.new_root_number, advance.new_root);
        Ok(true)
    }

    fn release_pruned(&self, state: &mut dyn StateStore, advance: &RootAdvance) {
        let released = advance.removed.iter().filter(|id| state.release(id)).count();
        debug!(
            from = %advance.old_root,
            to = %advance.new_root,
            pruned = advance.removed.len(),
            released,
            "Released pruned checkpoints"
        );
    }

    /// Report a rejection of a block that never entered the tree
    fn reject(&self, hash: BlockHash, err: IngestError) -> IngestError {
        self.collaborators.observer.block_rejected(hash, &err.to_string());
        err
    }

    /// Remove a rejected pending node and report it
    fn discard(&self, hash: &BlockHash, err: IngestError) -> IngestError {
        match self.tree.write() {
            Ok(mut tree) => {
                if let Err(e) = tree.delete(hash) {
                    warn!(%hash, error = %e, "Could not remove rejected block");
                }
            }
            Err(_) => return IngestError::LockPoisoned("fork tree"),
        }
        self.reject(*hash, err)
    }

    fn read_tree(&self) -> Result<RwLockReadGuard<'_, ForkTree>, IngestError> {
        self.tree.read().map_err(|_| IngestError::LockPoisoned("fork tree"))
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, ForkTree>, IngestError> {
        self.tree.write().map_err(|_| IngestError::LockPoisoned("fork tree"))
    }

    /// Run a read-only closure against a consistent view of the tree
    pub fn with_tree<R>(&self, f: impl FnOnce(&ForkTree) -> R) -> Result<R, IngestError> {
        Ok(f(&*self.read_tree()?))
    }

    pub fn find(&self, hash: &BlockHash) -> Result<Option<ForkNode>, IngestError> {
        self.with_tree(|tree| tree.find(hash).cloned())
    }

    /// Tip of the best chain
    pub fn head_block(&self) -> Result<Arc<CandidateBlock>, IngestError> {
        self.with_tree(|tree| tree.head().block.clone())
    }

    /// Last irreversible block
    pub fn lib_block(&self) -> Result<Arc<CandidateBlock>, IngestError> {
        self.with_tree(|tree| tree.root().block.clone())
    }

    /// Look a block up in the tree, then in durable storage
    pub fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<ChainBlock>, IngestError> {
        let cached = self.with_tree(|tree| {
            tree.find(hash).map(|node| ChainBlock {
                block: node.block.clone(),
                witness_list: node.is_linked().then(|| node.witness_list.clone()),
                irreversible: node.hash == tree.root_hash(),
            })
        })?;
        if cached.is_some() {
            return Ok(cached);
        }

        let stored = self
            .collaborators
            .chain_store
            .get_by_hash(hash)
            .map_err(IngestError::ChainStore)?;
        Ok(stored.map(|block| ChainBlock {
            block: Arc::new(block),
            witness_list: None,
            irreversible: true,
        }))
    }

    /// Hash of the block at `number` on the best chain, or in durable
    /// storage below the finalized root
    pub fn hash_by_number(&self, number: u64) -> Result<Option<BlockHash>, IngestError> {
        let cached = self.with_tree(|tree| tree.block_by_number(number).map(|n| n.hash))?;
        if cached.is_some() {
            return Ok(cached);
        }
        self.collaborators
            .chain_store
            .get_hash_by_number(number)
            .map_err(IngestError::ChainStore)
    }

    /// Read a key from the committed state of a block
    pub fn state_at(&self, id: &BlockHash, key: &str) -> Result<Option<Vec<u8>>, IngestError> {
        let state = self
            .state
            .lock()
            .map_err(|_| IngestError::LockPoisoned("state store"))?;
        Ok(state.get_at(id, key)?)
    }
}
