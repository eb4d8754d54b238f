//! Key/value execution engine for replayed blocks
//!
//! Understands two contracts:
//! - `kv`: `set` with `key=<json>` and `delete` with `key`. JSON numbers,
//!   strings, booleans and null map onto the matching codec kinds; arrays
//!   and objects are stored opaquely.
//! - `system`: `witnesses` with a comma separated roster, accepted only
//!   from a publisher in the active roster.

use serde_json::Value as Json;
use tessera_codec::Value;
use tessera_common::{CandidateBlock, Transaction, TxHash, WitnessId, WitnessList};
use tessera_module_consensus::{ExecutionEngine, ExecutionError, ExecutionOutcome, TxReceipt};
use tessera_module_state_store::{StateAccess, TypedStateAccess};

#[derive(Debug, Default)]
pub struct KvEngine;

impl KvEngine {
    fn value_from_json(tx: TxHash, raw: &str) -> Result<Value, ExecutionError> {
        let diverged = |reason: String| ExecutionError::Diverged { tx, reason };
        let json: Json =
            serde_json::from_str(raw).map_err(|e| diverged(format!("bad value {raw}: {e}")))?;
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::String(s) => Ok(Value::Text(s)),
            Json::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| diverged(format!("{n} is not a 64-bit integer"))),
            structured => Value::json(&structured).map_err(|e| diverged(e.to_string())),
        }
    }

    fn apply(
        &self,
        tx: &Transaction,
        state: &mut dyn StateAccess,
        witnesses: &WitnessList,
        outcome: &mut ExecutionOutcome,
    ) -> Result<(), ExecutionError> {
        let hash = tx.hash();
        for action in &tx.actions {
            match (action.contract.as_str(), action.action_name.as_str()) {
                ("kv", "set") => {
                    let (key, raw) =
                        action.data.split_once('=').ok_or_else(|| ExecutionError::Diverged {
                            tx: hash,
                            reason: format!("expected key=value, got {}", action.data),
                        })?;
                    let value = Self::value_from_json(hash, raw)?;
                    state.put_value(key, &value);
                }
                ("kv", "delete") => state.delete(&action.data),
                ("system", "witnesses") => {
                    if !witnesses.is_active(&WitnessId::new(tx.publisher.clone())) {
                        return Err(ExecutionError::Unauthorized {
                            tx: hash,
                            reason: format!("{} may not change the witness roster", tx.publisher),
                        });
                    }
                    let roster: Vec<WitnessId> = action
                        .data
                        .split(',')
                        .map(str::trim)
                        .filter(|w| !w.is_empty())
                        .map(WitnessId::from)
                        .collect();
                    if roster.is_empty() {
                        return Err(ExecutionError::Diverged {
                            tx: hash,
                            reason: "empty witness roster".to_string(),
                        });
                    }
                    outcome.witness_update = Some(roster);
                }
                (contract, name) => {
                    return Err(ExecutionError::Diverged {
                        tx: hash,
                        reason: format!("unknown action {contract}.{name}"),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ExecutionEngine for KvEngine {
    fn execute(
        &self,
        block: &CandidateBlock,
        state: &mut dyn StateAccess,
        witnesses: &WitnessList,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !witnesses.is_active(block.witness()) {
            return Err(ExecutionError::UnauthorizedWitness {
                witness: block.witness().clone(),
            });
        }

        let mut outcome = ExecutionOutcome::default();
        let mut last_time = i64::MIN;
        for tx in block.txs() {
            if tx.time < last_time {
                return Err(ExecutionError::Ordering {
                    tx: tx.hash(),
                    reason: format!("time {} precedes {}", tx.time, last_time),
                });
            }
            last_time = tx.time;

            self.apply(tx, state, witnesses, &mut outcome)?;
            outcome.receipts.push(TxReceipt {
                tx: tx.hash(),
                success: true,
                message: String::new(),
            });
        }
        Ok(outcome)
    }
}
