//! Resolver step: apply a change to this controller's model, then work out
//! what its workers must run
//!
//! The coordinator keeps the resolved worker operations in its coordination
//! context; a subordinate returns them inside its prepared result under
//! [`SERVER_OPERATIONS`] for the coordinator to harvest.

use crate::common::{Error, Result};
use crate::controller::Controller;
use crate::coordinator::resolver::{ResolvedOperations, ServerOperationResolver};
use crate::model::address::{HOST, WILDCARD};
use crate::model::registry::NO_OP;
use crate::model::response::{SERVER_OPERATIONS, STAGED_RESULT};
use crate::model::{Address, Operation, OperationResponse, StagedChange};
use crate::worker::{WorkerIdentity, WorkerStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// A staged local change together with the worker operations it implies
#[derive(Debug)]
pub struct ResolvedChange {
    pub staged: StagedChange,
    pub server_operations: ResolvedOperations,
}

/// Wire form of one batch of worker operations
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerOperation {
    workers: Vec<WorkerIdentity>,
    operation: Operation,
}

/// Apply `op` to the model and resolve worker operations against the staged tree.
///
/// Fails if a targeted worker is still starting; the staged change is dropped
/// (and so rolled back) with the error.
pub async fn apply(controller: &Controller, op: &Operation) -> Result<ResolvedChange> {
    let local = controller.name();
    let staged = controller.model().begin(for_model(op, local)).await?;

    let resolver = ServerOperationResolver::new(staged.model(), local, controller.workers().snapshot());
    let server_operations = resolver.resolve(&for_resolver(op, local));

    let starting: BTreeSet<String> = server_operations
        .keys()
        .flatten()
        .filter(|w| controller.workers().status_of(&w.worker) == WorkerStatus::Starting)
        .map(|w| w.worker.clone())
        .collect();
    if !starting.is_empty() {
        return Err(Error::WorkersStarting {
            workers: starting.into_iter().collect(),
        });
    }

    tracing::debug!(
        "{} on {} resolved to {} worker operation batch(es)",
        op,
        local,
        server_operations.len()
    );
    Ok(ResolvedChange {
        staged,
        server_operations,
    })
}

/// The part of `op` this controller's own model executes. Steps owned by
/// another controller or by a worker become placeholders so step numbering
/// is kept; `host=*` means this host.
pub fn for_model(op: &Operation, local: &str) -> Operation {
    match op {
        Operation::Composite(_) => {
            let steps = op.steps().iter().map(|s| for_model(s, local)).collect();
            Operation::composite(steps).with_headers(op.headers().clone())
        }
        Operation::Simple(_) => {
            let address = op.address();
            match address.host() {
                Some(host) if host != local && host != WILDCARD => placeholder(op),
                _ if address.is_worker_scoped() => placeholder(op),
                Some(WILDCARD) => op.readdressed(at_host(address, local)),
                _ => op.clone(),
            }
        }
    }
}

/// `op` as the resolver sees it: only `host=*` is rewritten
pub fn for_resolver(op: &Operation, local: &str) -> Operation {
    match op {
        Operation::Composite(_) => {
            let steps = op.steps().iter().map(|s| for_resolver(s, local)).collect();
            Operation::composite(steps).with_headers(op.headers().clone())
        }
        Operation::Simple(_) if op.address().host() == Some(WILDCARD) => {
            op.readdressed(at_host(op.address(), local))
        }
        Operation::Simple(_) => op.clone(),
    }
}

fn placeholder(op: &Operation) -> Operation {
    Operation::simple(NO_OP, Address::root()).with_headers(op.headers().clone())
}

fn at_host(address: &Address, host: &str) -> Address {
    Address::of(
        std::iter::once((HOST, host)).chain(
            address
                .segments()
                .iter()
                .skip(1)
                .map(|seg| (seg.kind.as_str(), seg.value.as_str())),
        ),
    )
}

pub fn encode_server_operations(ops: &ResolvedOperations) -> Value {
    let batches: Vec<ServerOperation> = ops
        .iter()
        .map(|(workers, operation)| ServerOperation {
            workers: workers.iter().cloned().collect(),
            operation: operation.clone(),
        })
        .collect();
    serde_json::to_value(batches).unwrap_or(Value::Array(Vec::new()))
}

pub fn decode_server_operations(value: &Value) -> Result<ResolvedOperations> {
    let batches: Vec<ServerOperation> = serde_json::from_value(value.clone())?;
    Ok(batches
        .into_iter()
        .map(|b| (b.workers.into_iter().collect(), b.operation))
        .collect())
}

/// Prepared result a subordinate reports to the coordinator
pub fn prepared_payload(change: &ResolvedChange) -> OperationResponse {
    OperationResponse::success(json!({
        STAGED_RESULT: change.staged.result().clone(),
        SERVER_OPERATIONS: encode_server_operations(&change.server_operations),
    }))
}

/// Worker operations embedded in a subordinate's prepared result
pub fn harvest(prepared: &OperationResponse) -> Result<ResolvedOperations> {
    match prepared.server_operations() {
        Some(value) => decode_server_operations(value),
        None => Ok(ResolvedOperations::new()),
    }
}
