//! Controller phase: prepare barrier, then the commit/rollback decision
//!
//! Every target controller gets one request. No decision is sent until each
//! of them has reported a prepared result, the blocking timeout expired, or
//! the wait was interrupted.

use crate::common::{Patience, METRICS};
use crate::controller::Controller;
use crate::coordinator::context::{CoordinationContext, Interrupt};
use crate::coordinator::request::RequestHandle;
use crate::model::{Operation, OperationResponse};
use crate::transport::{Decision, Target};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// One request per target controller, by name
pub type ControllerRequests = BTreeMap<String, RequestHandle>;

enum Barrier {
    Prepared,
    TimedOut,
    Interrupted,
}

/// Send `op` to every controller in `targets` and wait for all prepared results.
///
/// The wait is bounded by the blocking timeout. A controller still preparing
/// when it expires is cancelled and counts as failed; the others keep their
/// results. Each prepared result (possibly rejected and replaced by a failure) lands in
/// the context under the controller's name.
pub async fn prepare_controllers(
    controller: &Arc<Controller>,
    ctx: &CoordinationContext,
    targets: &BTreeSet<String>,
    op: &Operation,
    mut interrupt: Interrupt,
) -> ControllerRequests {
    let mut delegated = op.clone();
    delegated.headers_mut().execute_for_coordinator = true;

    let mut requests: ControllerRequests = targets
        .iter()
        .map(|name| {
            let handle = RequestHandle::execute(controller, Target::controller(name.as_str()), &delegated);
            (name.clone(), handle)
        })
        .collect();

    let window = controller.timeouts().blocking_timeout();
    let barrier = async {
        for handle in requests.values_mut() {
            handle.await_prepared().await;
        }
    };
    let waited = tokio::select! {
        done = tokio::time::timeout(window, barrier) => match done {
            Ok(()) => Barrier::Prepared,
            Err(_) => Barrier::TimedOut,
        },
        _ = interrupt.raised() => Barrier::Interrupted,
    };

    match waited {
        Barrier::Prepared => {}
        Barrier::Interrupted => {
            tracing::warn!("Interrupted while waiting for controllers to prepare {}", op);
            ctx.mark_failure_reported();
            ctx.set_failure(format!("Operation {} was interrupted before all controllers prepared", op));
            for handle in requests.values_mut() {
                // Zero patience: only results that are already in count
                if handle.try_prepared_now().await.is_none() {
                    handle.cancel();
                }
            }
        }
        Barrier::TimedOut => {
            tracing::warn!("Controllers did not prepare {} within {:?}", op, window);
            for (name, handle) in requests.iter_mut() {
                if handle.try_prepared_now().await.is_none() {
                    handle.abandon(OperationResponse::failed(format!(
                        "Controller {} did not prepare within {:?}",
                        name, window
                    )));
                }
            }
        }
    }

    for (name, handle) in &requests {
        let prepared = handle
            .prepared()
            .cloned()
            .unwrap_or_else(|| OperationResponse::failed(format!("No prepared result from {}", name)));
        if prepared.is_failed() {
            METRICS.prepare_failures.inc();
            tracing::warn!("Controller {} failed to prepare: {}", name, prepared.failure_text());
        } else {
            tracing::debug!("Controller {} prepared", name);
        }
        ctx.set_prepared(name, prepared);
    }
    requests
}

/// Send the decision to every controller and collect final results.
///
/// The decision is commit unless the context still asks for a complete
/// rollback. A retrieval that runs out of patience is logged and recorded as a
/// failure for that controller; the decision itself stands.
pub async fn finalize_controllers(
    ctx: &CoordinationContext,
    requests: &mut ControllerRequests,
    patience: &mut Patience,
    interrupt: &Interrupt,
    interrupted_patience: Duration,
) {
    let decision = if ctx.complete_rollback() {
        Decision::Rollback
    } else {
        Decision::Commit
    };
    for handle in requests.values_mut() {
        handle.complete(decision);
    }
    for (name, handle) in requests.iter_mut() {
        if interrupt.is_raised() {
            patience.interrupt(interrupted_patience);
        }
        let result = handle.await_final(patience.remaining()).await;
        if result.is_failed() && decision == Decision::Commit {
            tracing::warn!("Controller {} did not confirm commit: {}", name, result.failure_text());
        }
        ctx.set_final(name, result);
    }
}
