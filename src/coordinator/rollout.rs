//! Worker phase: push resolved worker operations out under the rollout plan,
//! then commit or roll back each worker

use crate::common::{Patience, Result, METRICS};
use crate::controller::Controller;
use crate::coordinator::context::{CoordinationContext, Interrupt};
use crate::coordinator::engine::{RolloutOutcome, WorkerDispatch};
use crate::coordinator::plan::{resolve_plan, OpsByGroup};
use crate::coordinator::request::RequestHandle;
use crate::coordinator::resolver::ResolvedOperations;
use crate::coordinator::resolver_step;
use crate::model::registry::REQUIRE_RESTART;
use crate::model::{Address, Operation, OperationResponse};
use crate::transport::{Decision, Target};
use crate::worker::WorkerIdentity;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One request per worker that was sent its operation
pub type WorkerRequests = BTreeMap<WorkerIdentity, RequestHandle>;

/// Gather the coordinator's own worker operations and those every subordinate
/// embedded in its prepared result
pub fn collect_ops(ctx: &CoordinationContext) -> Result<OpsByGroup> {
    let mut ops_by_group = OpsByGroup::new();
    add_batches(&mut ops_by_group, ctx.local_worker_ops());
    for prepared in ctx.prepared().values() {
        add_batches(&mut ops_by_group, resolver_step::harvest(prepared)?);
    }
    Ok(ops_by_group)
}

fn add_batches(ops_by_group: &mut OpsByGroup, batches: ResolvedOperations) {
    for (workers, op) in batches {
        for worker in workers {
            ops_by_group
                .entry(worker.group.clone())
                .or_default()
                .insert(worker, op.clone());
        }
    }
}

/// Sends worker operations for the rollout engine and keeps each request for
/// the decision that follows
struct Dispatcher<'a> {
    controller: &'a Arc<Controller>,
    budget: Duration,
    requests: Mutex<WorkerRequests>,
}

impl WorkerDispatch for Dispatcher<'_> {
    fn dispatch<'a>(&'a self, worker: &'a WorkerIdentity, op: &'a Operation) -> BoxFuture<'a, OperationResponse> {
        async move {
            let permits = self.controller.worker_permits();
            let Ok(_permit) = permits.acquire().await else {
                return OperationResponse::failed("Controller is shutting down");
            };
            METRICS.worker_operations_total.inc();
            let mut request = RequestHandle::execute(self.controller, Target::worker(worker.clone()), op);
            let waited = tokio::time::timeout(self.budget, request.await_prepared()).await;
            let prepared = match waited {
                Ok(prepared) => prepared,
                Err(_) => {
                    tracing::warn!("Worker {} did not prepare within {:?}", worker, self.budget);
                    request.cancel();
                    OperationResponse::failed(format!("Worker {} did not prepare in time", worker))
                }
            };
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(worker.clone(), request);
            prepared
        }
        .boxed()
    }
}

/// Run the rollout for everything the controllers resolved.
///
/// Leaves the complete-rollback flag in the context cleared only if the plan
/// succeeded (or failed within tolerance with `rollback_across_groups` off).
pub async fn run(controller: &Arc<Controller>, ctx: &CoordinationContext, op: &Operation) -> WorkerRequests {
    let ops_by_group = match collect_ops(ctx) {
        Ok(ops) => ops,
        Err(e) => {
            tracing::error!("Cannot read worker operations for {}: {}", op, e);
            ctx.set_failure(e.to_string());
            ctx.set_complete_rollback(true);
            return WorkerRequests::new();
        }
    };
    if ops_by_group.is_empty() {
        tracing::debug!("{} needs no worker operations", op);
        ctx.set_complete_rollback(false);
        return WorkerRequests::new();
    }

    let plan = match resolve_plan(op.headers().rollout_plan.as_ref(), &ops_by_group) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!("Rejecting rollout for {}: {}", op, e);
            ctx.set_failure(e.to_string());
            ctx.set_complete_rollback(true);
            return WorkerRequests::new();
        }
    };
    ctx.set_complete_rollback(plan.rollback_across_groups);

    let dispatcher = Dispatcher {
        controller,
        budget: controller.timeouts().connection_budget(),
        requests: Mutex::new(WorkerRequests::new()),
    };
    let report = controller
        .rollout_engine()
        .run(&ops_by_group, &plan, &dispatcher)
        .await;

    for group in report.failed_groups.iter().chain(&report.skipped_groups) {
        ctx.set_group_rollback(group, true);
    }
    match report.outcome {
        RolloutOutcome::Success => ctx.set_complete_rollback(false),
        RolloutOutcome::Partial if !ctx.complete_rollback() => {
            tracing::warn!("Rollout of {} failed in groups {:?}", op, report.failed_groups);
        }
        outcome => {
            tracing::warn!("Rollout of {} ended {:?}; rolling back everywhere", op, outcome);
            ctx.set_complete_rollback(true);
            ctx.mark_rollout_failed();
        }
    }
    dispatcher
        .requests
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Commit or roll back every worker that was sent an operation and record
/// its result.
///
/// A worker whose own operation failed but whose group commits is sent a
/// `require-restart` marker so it does not keep running on stale settings.
pub async fn finalize_workers(
    controller: &Arc<Controller>,
    ctx: &CoordinationContext,
    requests: &mut WorkerRequests,
    patience: &mut Patience,
    interrupt: &Interrupt,
    interrupted_patience: Duration,
) {
    let mut fallbacks = Vec::new();
    for (worker, request) in requests.iter_mut() {
        let rollback = ctx.complete_rollback() || ctx.group_rollback(&worker.group);
        let failed = request.prepared().is_some_and(OperationResponse::is_failed);
        if rollback {
            METRICS.worker_rollbacks.inc();
            request.complete(Decision::Rollback);
        } else if failed {
            METRICS.restart_fallbacks.inc();
            tracing::warn!("Worker {} failed an operation its group committed; requiring restart", worker);
            request.complete(Decision::Rollback);
            let marker = Operation::simple(REQUIRE_RESTART, Address::root());
            fallbacks.push((
                worker.clone(),
                RequestHandle::execute(controller, Target::worker(worker.clone()), &marker),
            ));
        } else {
            request.complete(Decision::Commit);
        }
    }

    for (worker, request) in requests.iter_mut() {
        if interrupt.is_raised() {
            patience.interrupt(interrupted_patience);
        }
        let final_result = request.await_final(patience.remaining()).await;
        let result = match request.prepared() {
            Some(prepared) if prepared.is_failed() => prepared.clone(),
            _ => final_result,
        };
        if result.is_failed() {
            tracing::debug!("Worker {}: {}", worker, result.failure_text());
        }
        ctx.set_worker_result(worker, result);
    }

    for (worker, mut fallback) in fallbacks {
        if interrupt.is_raised() {
            patience.interrupt(interrupted_patience);
        }
        let prepared = tokio::time::timeout(patience.remaining(), fallback.await_prepared()).await;
        match prepared {
            Ok(prepared) if prepared.is_success() => {
                fallback.complete(Decision::Commit);
                let confirmed = fallback.await_final(patience.remaining()).await;
                if confirmed.is_failed() {
                    tracing::warn!("Worker {} did not confirm restart-required: {}", worker, confirmed.failure_text());
                }
            }
            Ok(prepared) => {
                tracing::warn!("Worker {} refused restart-required: {}", worker, prepared.failure_text());
            }
            Err(_) => {
                tracing::warn!("Gave up marking worker {} restart-required", worker);
                fallback.cancel();
            }
        }
    }
}
