//! End-to-end block ingestion scenarios

mod common;

use common::{
    no_finality, quorum, text_at, FlakyStore, Harness, RecordingPool, ScriptedEngine, PENDING_TXS,
};
use std::sync::Arc;
use std::thread;

use tessera_common::{BlockHash, CandidateBlock, ChainParams, WitnessId};
use tessera_module_consensus::{
    AddOutcome, BlockIngest, BlockOrigin, Collaborators, ExecutionError, ForkTreeError,
    IngestError, LinkState, MemoryChainStore,
};
use tessera_module_state_store::{MemoryStateStore, StateAccess, StateStore, StateStoreError};
use tessera_test_utils::{genesis, tx, witness_list, BlockBuilder, ChainBuilder};

fn add(h: &Harness, block: &CandidateBlock) -> Result<AddOutcome, IngestError> {
    h.ingest.add(block.clone(), BlockOrigin::Received)
}

fn assert_linked(h: &Harness, block: &CandidateBlock) {
    let node = h.ingest.find(&block.hash()).unwrap().expect("block in tree");
    assert_eq!(node.state, LinkState::Linked);
}

fn serial_of(h: &Harness, block: &CandidateBlock) -> u32 {
    h.ingest.find(&block.hash()).unwrap().unwrap().serial_num
}

#[test]
fn slot_limit_rejects_seventh_block() {
    let h = Harness::new(no_finality(), &["w"]);
    let blocks = ChainBuilder::on(&h.genesis).run("w", 7);

    for (i, block) in blocks[..6].iter().enumerate() {
        assert_eq!(
            add(&h, block).unwrap(),
            AddOutcome::Linked {
                hash: block.hash(),
                serial_num: i as u32,
                descendants_linked: vec![],
            }
        );
    }

    let err = add(&h, &blocks[6]).unwrap_err();
    assert!(matches!(
        err,
        IngestError::SlotLimitExceeded { serial_num: 6, max: 6, .. }
    ));
    assert!(h.ingest.find(&blocks[6].hash()).unwrap().is_none());
    assert_eq!(h.ingest.head_block().unwrap().hash(), blocks[5].hash());
    assert_eq!(h.observer.rejected_hashes(), vec![blocks[6].hash()]);
}

#[test]
fn serial_resets_on_slot_or_witness_change() {
    let h = Harness::new(no_finality(), &["a", "b"]);
    let a1 = BlockBuilder::child_of(&h.genesis).witness("a").build();
    let a2 = BlockBuilder::child_of(&a1).build();
    let a3 = BlockBuilder::child_of(&a2).next_slot().build();
    let b4 = BlockBuilder::child_of(&a3).witness("b").build();
    let b5 = BlockBuilder::child_of(&b4).build();

    for block in [&a1, &a2, &a3, &b4, &b5] {
        add(&h, block).unwrap();
    }

    assert_eq!(serial_of(&h, &a1), 0);
    assert_eq!(serial_of(&h, &a2), 1);
    assert_eq!(serial_of(&h, &a3), 0);
    assert_eq!(serial_of(&h, &b4), 0);
    assert_eq!(serial_of(&h, &b5), 1);
}

#[test]
fn orphan_links_when_parent_arrives() {
    let h = Harness::new(no_finality(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let x = BlockBuilder::child_of(&b1).build();

    assert_eq!(
        add(&h, &x).unwrap(),
        AddOutcome::Orphaned {
            missing_parent: b1.hash()
        }
    );
    assert_eq!(
        h.ingest.find(&x.hash()).unwrap().unwrap().state,
        LinkState::Pending
    );

    assert_eq!(
        add(&h, &b1).unwrap(),
        AddOutcome::Linked {
            hash: b1.hash(),
            serial_num: 0,
            descendants_linked: vec![x.hash()],
        }
    );
    assert_linked(&h, &x);
    assert_eq!(h.ingest.head_block().unwrap().hash(), x.hash());
}

#[test]
fn reversed_chain_links_transitively() {
    let h = Harness::new(no_finality(), &["w"]);
    let blocks = ChainBuilder::on(&h.genesis).run("w", 5);

    for block in blocks[1..].iter().rev() {
        assert!(matches!(add(&h, block).unwrap(), AddOutcome::Orphaned { .. }));
    }

    let outcome = add(&h, &blocks[0]).unwrap();
    let expected: Vec<BlockHash> = blocks[1..].iter().map(|b| b.hash()).collect();
    assert_eq!(
        outcome,
        AddOutcome::Linked {
            hash: blocks[0].hash(),
            serial_num: 0,
            descendants_linked: expected.clone(),
        }
    );
    assert_eq!(&h.pool.linked_hashes()[1..], expected.as_slice());
}

#[test]
fn siblings_link_and_head_is_deterministic() {
    let h = Harness::new(quorum(), &["a", "b", "c"]);
    let x = BlockBuilder::child_of(&h.genesis)
        .witness("a")
        .tx(tx("alice", &[("kv", "set", "k=left")]))
        .build();
    let y = BlockBuilder::child_of(&h.genesis)
        .witness("b")
        .tx(tx("bob", &[("kv", "set", "k=right")]))
        .build();

    add(&h, &x).unwrap();
    add(&h, &y).unwrap();
    assert_linked(&h, &x);
    assert_linked(&h, &y);

    let (winner, loser) = if x.hash() < y.hash() { (&x, &y) } else { (&y, &x) };
    assert_eq!(h.ingest.head_block().unwrap().hash(), winner.hash());

    // sibling writes never leak into each other's checkpoint
    assert_eq!(text_at(&h, &x.hash(), "k").as_deref(), Some("left"));
    assert_eq!(text_at(&h, &y.hash(), "k").as_deref(), Some("right"));
    assert_eq!(text_at(&h, &h.genesis.hash(), "k"), None);

    // confirm the winner with the remaining witnesses
    let others: Vec<&str> = ["a", "b", "c"]
        .into_iter()
        .filter(|w| *w != winner.witness().as_str())
        .collect();
    let mut chain = ChainBuilder::on(winner);
    for block in chain.rotate(&others) {
        add(&h, &block).unwrap();
    }

    assert_eq!(h.ingest.lib_block().unwrap().hash(), winner.hash());
    assert!(h.ingest.find(&loser.hash()).unwrap().is_none());
    assert!(matches!(
        h.ingest.state_at(&loser.hash(), "k"),
        Err(IngestError::State(StateStoreError::UnknownCheckpoint { .. }))
    ));
    assert_eq!(
        h.observer.roots.lock().unwrap().as_slice(),
        &[(1, winner.hash())]
    );
}

#[test]
fn duplicate_add_changes_nothing() {
    let h = Harness::new(no_finality(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "incr", "n")]))
        .build();
    add(&h, &b1).unwrap();
    let executions = h.engine.executions();
    let size = h.ingest.with_tree(|t| t.len()).unwrap();

    assert!(matches!(
        add(&h, &b1),
        Err(IngestError::Duplicate { hash }) if hash == b1.hash()
    ));
    assert_eq!(h.engine.executions(), executions);
    assert_eq!(h.ingest.with_tree(|t| t.len()).unwrap(), size);
    assert!(h.observer.rejected_hashes().is_empty());
}

#[test]
fn failed_verification_leaves_no_trace() {
    let h = Harness::new(no_finality(), &["w"]);
    let bad = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "set", "k=dirty"), ("kv", "fail", "nope")]))
        .build();

    let err = add(&h, &bad).unwrap_err();
    assert!(matches!(
        err,
        IngestError::VerificationFailed {
            source: ExecutionError::Diverged { .. },
            ..
        }
    ));
    assert!(h.ingest.find(&bad.hash()).unwrap().is_none());
    assert!(h.ingest.state_at(&bad.hash(), "k").is_err());

    let good = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "incr", "n")]))
        .build();
    add(&h, &good).unwrap();
    assert_eq!(text_at(&h, &good.hash(), "k"), None);
}

#[test]
fn forged_block_fails_self_check() {
    let h = Harness::new(no_finality(), &["w"]);
    let real = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let forged = CandidateBlock::from_parts(
        BlockBuilder::child_of(&h.genesis).witness("mallory").build().header().clone(),
        vec![],
        real.hash(),
    );

    assert!(matches!(
        add(&h, &forged),
        Err(IngestError::SelfCheckFailed { .. })
    ));
    assert!(h.ingest.find(&real.hash()).unwrap().is_none());
    add(&h, &real).unwrap();
}

#[test]
fn unauthorised_witness_is_rejected() {
    let h = Harness::new(no_finality(), &["w"]);
    let block = BlockBuilder::child_of(&h.genesis).witness("intruder").build();
    assert!(matches!(
        add(&h, &block),
        Err(IngestError::VerificationFailed {
            source: ExecutionError::UnauthorizedWitness { .. },
            ..
        })
    ));
}

#[test]
fn wrong_block_number_is_rejected() {
    let h = Harness::new(no_finality(), &["w"]);
    let block = BlockBuilder::child_of(&h.genesis).witness("w").number(5).build();
    let err = add(&h, &block).unwrap_err();
    assert!(matches!(
        err,
        IngestError::Tree(ForkTreeError::InvalidBlockNumber { expected: 1, got: 5 })
    ));
    assert!(err.is_rejection());
    assert!(h.ingest.find(&block.hash()).unwrap().is_none());
}

#[test]
fn rejected_descendant_does_not_fail_parent() {
    let h = Harness::new(no_finality(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let bad = BlockBuilder::child_of(&b1)
        .tx(tx("alice", &[("kv", "fail", "boom")]))
        .build();
    let after_bad = BlockBuilder::child_of(&bad).build();

    add(&h, &after_bad).unwrap();
    add(&h, &bad).unwrap();
    assert_eq!(
        add(&h, &b1).unwrap(),
        AddOutcome::Linked {
            hash: b1.hash(),
            serial_num: 0,
            descendants_linked: vec![],
        }
    );
    assert!(h.ingest.find(&bad.hash()).unwrap().is_none());
    assert_eq!(
        h.ingest.find(&after_bad.hash()).unwrap().unwrap().state,
        LinkState::Pending
    );
    assert_eq!(h.observer.rejected_hashes(), vec![bad.hash()]);
}

#[test]
fn finalized_path_is_never_undone() {
    // A single witness confirms each block on its own
    let h = Harness::new(quorum(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let rival1 = BlockBuilder::child_of(&h.genesis).witness("w").time(5).build();
    let rival2 = BlockBuilder::child_of(&rival1).build();

    add(&h, &b1).unwrap();
    assert_eq!(h.ingest.lib_block().unwrap().hash(), b1.hash());

    assert!(matches!(
        add(&h, &rival1),
        Err(IngestError::BelowFinalized { number: 1, finalized: 1, .. })
    ));

    // held until the root moves past where it could attach
    assert!(matches!(add(&h, &rival2).unwrap(), AddOutcome::Orphaned { .. }));
    let b2 = BlockBuilder::child_of(&b1).build();
    add(&h, &b2).unwrap();
    assert_eq!(h.ingest.lib_block().unwrap().hash(), b2.hash());
    assert!(h.ingest.find(&rival2.hash()).unwrap().is_none());
    assert!(matches!(
        add(&h, &rival2),
        Err(IngestError::BelowFinalized { .. })
    ));
}

#[test]
fn witness_change_applies_once_final() {
    let h = Harness::new(quorum(), &["a"]);
    let b1 = BlockBuilder::child_of(&h.genesis)
        .witness("a")
        .tx(tx("a", &[("system", "witnesses", "b")]))
        .build();
    add(&h, &b1).unwrap();

    assert_eq!(h.pool.roster_seen(&b1.hash()), Some(vec![WitnessId::from("b")]));

    let by_a = BlockBuilder::child_of(&b1).build();
    assert!(matches!(
        add(&h, &by_a),
        Err(IngestError::VerificationFailed {
            source: ExecutionError::UnauthorizedWitness { .. },
            ..
        })
    ));
    let by_b = BlockBuilder::child_of(&b1).witness("b").build();
    add(&h, &by_b).unwrap();
}

#[test]
fn witness_change_needs_authority() {
    let h = Harness::new(no_finality(), &["a"]);
    let block = BlockBuilder::child_of(&h.genesis)
        .witness("a")
        .tx(tx("mallory", &[("system", "witnesses", "mallory")]))
        .build();
    assert!(matches!(
        add(&h, &block),
        Err(IngestError::VerificationFailed {
            source: ExecutionError::Unauthorized { .. },
            ..
        })
    ));
}

#[test]
fn queries_fall_back_to_chain_store() {
    let h = Harness::new(quorum(), &["w"]);
    let blocks = ChainBuilder::on(&h.genesis).run("w", 3);
    for block in &blocks {
        add(&h, block).unwrap();
    }

    // genesis is no longer in the tree, only in durable storage
    let stored = h.ingest.block_by_hash(&h.genesis.hash()).unwrap().unwrap();
    assert!(stored.irreversible);
    assert!(stored.witness_list.is_none());
    assert_eq!(stored.block.hash(), h.genesis.hash());

    let root = h.ingest.block_by_hash(&blocks[2].hash()).unwrap().unwrap();
    assert!(root.irreversible);
    assert_eq!(
        root.witness_list.unwrap().active(),
        &[WitnessId::from("w")]
    );

    assert_eq!(h.ingest.hash_by_number(0).unwrap(), Some(h.genesis.hash()));
    assert_eq!(h.ingest.hash_by_number(2).unwrap(), Some(blocks[1].hash()));
    assert_eq!(h.ingest.hash_by_number(3).unwrap(), Some(blocks[2].hash()));
    assert_eq!(h.ingest.hash_by_number(4).unwrap(), None);
    assert!(h.ingest.block_by_hash(&BlockHash::new([9u8; 32])).unwrap().is_none());
    assert_eq!(h.store.len(), 4);
}

#[test]
fn pending_block_is_reported_reversible() {
    let h = Harness::new(no_finality(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let b2 = BlockBuilder::child_of(&b1).build();
    add(&h, &b2).unwrap();

    let pending = h.ingest.block_by_hash(&b2.hash()).unwrap().unwrap();
    assert!(!pending.irreversible);
    assert!(pending.witness_list.is_none());
    assert_eq!(h.ingest.hash_by_number(2).unwrap(), None);
}

#[test]
fn status_record_describes_linked_block() {
    let h = Harness::new(no_finality(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "incr", "n")]))
        .tx(tx("bob", &[("kv", "incr", "n")]))
        .build();
    h.ingest.add(b1.clone(), BlockOrigin::Generated).unwrap();

    let status = h.observer.status_of(&b1.hash()).unwrap();
    assert_eq!(status.origin, BlockOrigin::Generated);
    assert_eq!(status.origin.action(), "Generate");
    assert_eq!(status.number, 1);
    assert_eq!(status.witness, WitnessId::from("w"));
    assert_eq!(status.serial_num, 0);
    assert_eq!(status.confirmed_number, 0);
    assert_eq!(status.tx_count, 2);
    assert_eq!(status.pending_tx_count, PENDING_TXS);
    assert!(status.latency_ms > 0);
}

#[test]
fn existing_checkpoint_is_reused_on_recovery() {
    let genesis = genesis("genesis");
    let b1 = BlockBuilder::child_of(&genesis).witness("w").build();

    let mut state = MemoryStateStore::new(genesis.hash());
    state.put("k", b"restored".to_vec());
    state.commit(b1.hash()).unwrap();
    assert!(state.checkout(&genesis.hash()));

    let h = Harness::with_state(no_finality(), &["w"], genesis, state);
    h.ingest.add(b1.clone(), BlockOrigin::Recovered).unwrap();

    assert_eq!(h.engine.executions(), 0);
    assert_linked(&h, &b1);
    assert_eq!(
        h.ingest.state_at(&b1.hash(), "k").unwrap(),
        Some(b"restored".to_vec())
    );
}

#[test]
fn missing_root_checkpoint_is_refused() {
    let genesis = genesis("genesis");
    let state = MemoryStateStore::new(BlockHash::new([1u8; 32]));
    let result = BlockIngest::new(
        &ChainParams::default(),
        genesis,
        witness_list(&["w"]),
        Box::new(state),
        Collaborators::new(
            Arc::new(ScriptedEngine::default()),
            Arc::new(RecordingPool::new(0)),
            Arc::new(MemoryChainStore::new()),
        ),
    );
    assert!(matches!(result, Err(IngestError::MissingCheckpoint { .. })));
}

#[test]
fn unreachable_store_fails_startup() {
    let genesis = genesis("genesis");
    let store = Arc::new(FlakyStore::new(Arc::new(MemoryChainStore::new())));
    store.set_down(true);

    let result = BlockIngest::new(
        &ChainParams::default(),
        genesis.clone(),
        witness_list(&["w"]),
        Box::new(MemoryStateStore::new(genesis.hash())),
        Collaborators::new(
            Arc::new(ScriptedEngine::default()),
            Arc::new(RecordingPool::new(0)),
            store,
        ),
    );
    let err = result.err().expect("startup must fail");
    assert!(matches!(err, IngestError::ChainStore(_)));
    assert!(err.to_string().contains("chain store"));
}

#[test]
fn merged_actions_cannot_pose_as_honest_block() {
    let h = Harness::new(no_finality(), &["w"]);
    let honest = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "set", "k=1"), ("kv", "set", "k=2")]))
        .build();
    let merged = BlockBuilder::child_of(&h.genesis)
        .witness("w")
        .tx(tx("alice", &[("kv", "set", "k=1kvsetk=2")]))
        .build();
    let tampered =
        CandidateBlock::from_parts(merged.header().clone(), merged.txs().to_vec(), honest.hash());

    assert!(matches!(
        add(&h, &tampered),
        Err(IngestError::SelfCheckFailed { .. })
    ));
    assert!(h.ingest.find(&honest.hash()).unwrap().is_none());

    add(&h, &honest).unwrap();
    assert_linked(&h, &honest);
    assert_eq!(text_at(&h, &honest.hash(), "k").as_deref(), Some("2"));
}

#[test]
fn store_failure_still_links_held_children() {
    let h = Harness::new(quorum(), &["w"]);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let b2 = BlockBuilder::child_of(&b1).build();
    assert!(matches!(add(&h, &b2).unwrap(), AddOutcome::Orphaned { .. }));

    h.chain.set_down(true);
    let err = add(&h, &b1).unwrap_err();
    assert!(matches!(err, IngestError::ChainStore(_)));
    assert!(!err.is_rejection());

    // the link stands and the held child was not dropped
    assert_linked(&h, &b1);
    assert_linked(&h, &b2);
    assert_eq!(h.pool.linked_hashes(), vec![b1.hash(), b2.hash()]);
    assert!(h.observer.status_of(&b1.hash()).is_some());
    assert!(h.observer.status_of(&b2.hash()).is_some());
    assert_eq!(h.ingest.head_block().unwrap().hash(), b2.hash());
    assert_eq!(h.ingest.lib_block().unwrap().hash(), h.genesis.hash());
    assert!(h.observer.roots.lock().unwrap().is_empty());
    assert_eq!(h.store.len(), 1);

    assert!(matches!(h.ingest.advance_finality(), Err(IngestError::ChainStore(_))));

    h.chain.set_down(false);
    assert!(matches!(add(&h, &b1), Err(IngestError::Duplicate { .. })));
    assert_eq!(h.ingest.advance_finality().unwrap(), 2);
    assert_eq!(h.ingest.lib_block().unwrap().hash(), b2.hash());
    assert_eq!(h.store.len(), 3);
    assert_eq!(h.ingest.hash_by_number(1).unwrap(), Some(b1.hash()));
}

#[test]
fn next_link_retries_deferred_finality() {
    let h = Harness::new(quorum(), &["w"]);
    let blocks = ChainBuilder::on(&h.genesis).run("w", 2);

    h.chain.set_down(true);
    assert!(matches!(add(&h, &blocks[0]), Err(IngestError::ChainStore(_))));
    assert_eq!(h.ingest.lib_block().unwrap().number(), 0);

    h.chain.set_down(false);
    add(&h, &blocks[1]).unwrap();
    assert_eq!(h.ingest.lib_block().unwrap().hash(), blocks[1].hash());
    assert_eq!(h.store.tip_number(), Some(2));
    assert_eq!(h.ingest.hash_by_number(1).unwrap(), Some(blocks[0].hash()));
}

#[test]
fn queries_run_while_a_block_executes() {
    let (h, gate) = Harness::gated(no_finality(), &["w"], 2);
    let b1 = BlockBuilder::child_of(&h.genesis).witness("w").build();
    let b2 = BlockBuilder::child_of(&b1).build();
    add(&h, &b1).unwrap();

    thread::scope(|scope| {
        let writer = scope.spawn(|| add(&h, &b2));

        gate.entered.wait();
        // read everything before releasing, so a failed assertion cannot
        // leave the writer parked
        let head = h.ingest.head_block().map(|b| b.hash());
        let first = h.ingest.hash_by_number(1);
        let second = h.ingest.hash_by_number(2);
        let executing = h.ingest.find(&b2.hash()).map(|n| n.map(|n| n.state));
        let stored = h.ingest.block_by_hash(&b1.hash()).map(|b| b.is_some());
        gate.release.wait();

        assert_eq!(head.unwrap(), b1.hash());
        assert_eq!(first.unwrap(), Some(b1.hash()));
        assert_eq!(second.unwrap(), None);
        assert_eq!(executing.unwrap(), Some(LinkState::Pending));
        assert!(stored.unwrap());
        assert!(matches!(
            writer.join().unwrap(),
            Ok(AddOutcome::Linked { .. })
        ));
    });
    assert_eq!(h.ingest.head_block().unwrap().hash(), b2.hash());
}
