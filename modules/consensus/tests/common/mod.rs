//! Shared fixtures for block ingestion tests.
//!
//! `ScriptedEngine` interprets a tiny key/value contract so tests can make
//! blocks that write state, fail verification, or change the witness roster:
//!
//! - `kv.set` with `key=value` stores a text value
//! - `kv.incr` with `key` adds one to an integer value
//! - `kv.fail` with a reason always diverges
//! - `system.witnesses` with `a,b,c` schedules a new roster; the publisher
//!   must be an active witness
//!
//! `FlakyStore` lets a test take durable storage offline, and `GatedEngine`
//! parks execution of one block so a test can read while `add` is running.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use anyhow::{bail, Result};

use tessera_codec::Value;
use tessera_common::{
    BlockHash, CandidateBlock, ChainParams, FinalityRuleKind, WitnessId, WitnessList,
};
use tessera_module_consensus::{
    BlockIngest, BlockIngestObserver, BlockStatus, ChainStore, Collaborators, ExecutionEngine,
    ExecutionError, ExecutionOutcome, ForkNode, MemoryChainStore, TransactionPool,
    TxReceipt,
};
use tessera_module_state_store::{MemoryStateStore, StateAccess, TypedStateAccess};
use tessera_test_utils::{genesis, witness_list};

#[derive(Default)]
pub struct ScriptedEngine {
    executions: AtomicUsize,
}

impl ScriptedEngine {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(
        &self,
        block: &CandidateBlock,
        state: &mut dyn StateAccess,
        witnesses: &WitnessList,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        if !witnesses.is_active(block.witness()) {
            return Err(ExecutionError::UnauthorizedWitness {
                witness: block.witness().clone(),
            });
        }

        let mut outcome = ExecutionOutcome::default();
        for tx in block.txs() {
            let tx_hash = tx.hash();
            for action in &tx.actions {
                match (action.contract.as_str(), action.action_name.as_str()) {
                    ("kv", "set") => {
                        let (key, value) = action.data.split_once('=').ok_or_else(|| {
                            ExecutionError::Diverged {
                                tx: tx_hash,
                                reason: format!("bad set argument {}", action.data),
                            }
                        })?;
                        state.put_value(key, &Value::Text(value.to_string()));
                    }
                    ("kv", "incr") => {
                        let current = state
                            .get_value(&action.data)
                            .ok()
                            .flatten()
                            .and_then(|v| v.as_int())
                            .unwrap_or(0);
                        state.put_value(&action.data, &Value::Int(current + 1));
                    }
                    ("kv", "fail") => {
                        return Err(ExecutionError::Diverged {
                            tx: tx_hash,
                            reason: action.data.clone(),
                        });
                    }
                    ("system", "witnesses") => {
                        if !witnesses.is_active(&WitnessId::new(tx.publisher.clone())) {
                            return Err(ExecutionError::Unauthorized {
                                tx: tx_hash,
                                reason: format!("{} is not a witness", tx.publisher),
                            });
                        }
                        outcome.witness_update =
                            Some(action.data.split(',').map(WitnessId::from).collect());
                    }
                    (contract, name) => {
                        return Err(ExecutionError::Diverged {
                            tx: tx_hash,
                            reason: format!("unknown action {contract}.{name}"),
                        });
                    }
                }
            }
            outcome.receipts.push(TxReceipt {
                tx: tx_hash,
                success: true,
                message: String::new(),
            });
        }
        Ok(outcome)
    }
}

/// Rendezvous for the execution of one block number
pub struct Gate {
    number: u64,
    /// Passed once execution of the gated block has started
    pub entered: Barrier,
    /// Passed to let the gated block finish executing
    pub release: Barrier,
}

impl Gate {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

/// Engine that holds execution of the gated block between two barriers
pub struct GatedEngine {
    inner: Arc<ScriptedEngine>,
    gate: Arc<Gate>,
}

impl ExecutionEngine for GatedEngine {
    fn execute(
        &self,
        block: &CandidateBlock,
        state: &mut dyn StateAccess,
        witnesses: &WitnessList,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if block.number() == self.gate.number {
            self.gate.entered.wait();
            self.gate.release.wait();
        }
        self.inner.execute(block, state, witnesses)
    }
}

/// Chain store that can be switched offline; reads and writes then fail
pub struct FlakyStore {
    inner: Arc<MemoryChainStore>,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryChainStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("disk unreachable");
        }
        Ok(())
    }
}

impl ChainStore for FlakyStore {
    fn get_by_hash(&self, hash: &BlockHash) -> Result<Option<CandidateBlock>> {
        self.check()?;
        self.inner.get_by_hash(hash)
    }

    fn get_hash_by_number(&self, number: u64) -> Result<Option<BlockHash>> {
        self.check()?;
        self.inner.get_hash_by_number(number)
    }

    fn persist(&self, block: &CandidateBlock) -> Result<()> {
        self.check()?;
        self.inner.persist(block)
    }
}

/// Pool recording every linked node it is told about
pub struct RecordingPool {
    pub pending: usize,
    pub linked: Mutex<Vec<(BlockHash, Vec<WitnessId>)>>,
}

impl RecordingPool {
    pub fn new(pending: usize) -> Self {
        Self {
            pending,
            linked: Mutex::new(Vec::new()),
        }
    }

    pub fn linked_hashes(&self) -> Vec<BlockHash> {
        self.linked.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    pub fn roster_seen(&self, hash: &BlockHash) -> Option<Vec<WitnessId>> {
        self.linked
            .lock()
            .unwrap()
            .iter()
            .find(|(h, _)| h == hash)
            .map(|(_, roster)| roster.clone())
    }
}

impl TransactionPool for RecordingPool {
    fn pending_count(&self) -> usize {
        self.pending
    }

    fn on_node_linked(&self, node: &ForkNode) {
        self.linked
            .lock()
            .unwrap()
            .push((node.hash, node.witness_list.active().to_vec()));
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub linked: Mutex<Vec<BlockStatus>>,
    pub rejected: Mutex<Vec<(BlockHash, String)>>,
    pub roots: Mutex<Vec<(u64, BlockHash)>>,
}

impl RecordingObserver {
    pub fn rejected_hashes(&self) -> Vec<BlockHash> {
        self.rejected.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    pub fn status_of(&self, hash: &BlockHash) -> Option<BlockStatus> {
        self.linked.lock().unwrap().iter().find(|s| s.hash == *hash).cloned()
    }
}

impl BlockIngestObserver for RecordingObserver {
    fn block_linked(&self, status: &BlockStatus) {
        self.linked.lock().unwrap().push(status.clone());
    }

    fn block_rejected(&self, hash: BlockHash, reason: &str) {
        self.rejected.lock().unwrap().push((hash, reason.to_string()));
    }

    fn root_advanced(&self, number: u64, hash: BlockHash) {
        self.roots.lock().unwrap().push((number, hash));
    }
}

pub const PENDING_TXS: usize = 7;

/// Pipeline wired to recording collaborators
pub struct Harness {
    pub ingest: BlockIngest,
    pub genesis: CandidateBlock,
    pub engine: Arc<ScriptedEngine>,
    pub pool: Arc<RecordingPool>,
    pub observer: Arc<RecordingObserver>,
    pub store: Arc<MemoryChainStore>,
    /// The store as the pipeline sees it
    pub chain: Arc<FlakyStore>,
}

impl Harness {
    pub fn new(params: ChainParams, roster: &[&str]) -> Self {
        let genesis = genesis("genesis");
        let state = MemoryStateStore::new(genesis.hash());
        Self::with_state(params, roster, genesis, state)
    }

    pub fn with_state(
        params: ChainParams,
        roster: &[&str],
        genesis: CandidateBlock,
        state: MemoryStateStore,
    ) -> Self {
        Self::assemble(params, roster, genesis, state, |engine| engine)
    }

    /// Harness whose engine parks on `Gate` when executing block `number`
    pub fn gated(params: ChainParams, roster: &[&str], number: u64) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::new(number));
        let genesis = genesis("genesis");
        let state = MemoryStateStore::new(genesis.hash());
        let harness = Self::assemble(params, roster, genesis, state, |inner| {
            Arc::new(GatedEngine {
                inner,
                gate: gate.clone(),
            })
        });
        (harness, gate)
    }

    fn assemble(
        params: ChainParams,
        roster: &[&str],
        genesis: CandidateBlock,
        state: MemoryStateStore,
        wrap: impl FnOnce(Arc<ScriptedEngine>) -> Arc<dyn ExecutionEngine>,
    ) -> Self {
        let engine = Arc::new(ScriptedEngine::default());
        let pool = Arc::new(RecordingPool::new(PENDING_TXS));
        let observer = Arc::new(RecordingObserver::default());
        let store = Arc::new(MemoryChainStore::new());
        let chain = Arc::new(FlakyStore::new(store.clone()));

        let collaborators = Collaborators::new(wrap(engine.clone()), pool.clone(), chain.clone())
            .with_observer(observer.clone());
        let ingest = BlockIngest::new(
            &params,
            genesis.clone(),
            witness_list(roster),
            Box::new(state),
            collaborators,
        )
        .unwrap();

        Self {
            ingest,
            genesis,
            engine,
            pool,
            observer,
            store,
            chain,
        }
    }
}

/// Parameters where nothing finalizes within a short test
pub fn no_finality() -> ChainParams {
    ChainParams {
        finality_rule: FinalityRuleKind::ConfirmationDepth,
        confirmation_depth: 1_000,
        ..ChainParams::default()
    }
}

pub fn quorum() -> ChainParams {
    ChainParams::default()
}

/// Decoded text value stored under `key` at a block
pub fn text_at(harness: &Harness, block: &BlockHash, key: &str) -> Option<String> {
    harness
        .ingest
        .state_at(block, key)
        .unwrap()
        .map(|bytes| tessera_codec::decode(&bytes).unwrap())
        .and_then(|v| v.as_text().map(str::to_string))
}
