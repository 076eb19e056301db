//! Two-phase operation pipeline
//!
//! Stages run strictly in order; fan-out only happens inside a stage.
//!
//! ```text
//! Routing → LocalApply → Preparing → Deciding → RollingOut → Assembling → Done
//! ```
//!
//! Decisions are sent workers first, then controllers, then the coordinator's
//! own staged change. The assembler always runs last.

use crate::common::{Patience, METRICS};
use crate::controller::Controller;
use crate::coordinator::assembler;
use crate::coordinator::context::{CoordinationContext, Interrupt};
use crate::coordinator::prepare::{self, ControllerRequests};
use crate::coordinator::resolver_step;
use crate::coordinator::rollout::{self, WorkerRequests};
use crate::coordinator::routing::RoutingDecision;
use crate::model::{Operation, OperationResponse};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Routing,
    LocalApply,
    Preparing,
    Deciding,
    RollingOut,
    Assembling,
    Done,
}

struct Progress<'a> {
    stage: Stage,
    op: &'a Operation,
}

impl Progress<'_> {
    fn enter(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage {:?} after {:?}", next, self.stage);
        tracing::debug!("{}: {:?} -> {:?}", self.op, self.stage, next);
        self.stage = next;
    }
}

/// Run `op` through prepare, rollout and commit across the controllers named
/// by `decision`.
pub async fn run_two_phase(
    controller: &Arc<Controller>,
    op: &Operation,
    decision: &RoutingDecision,
    interrupt: Interrupt,
) -> OperationResponse {
    METRICS.two_phase_total.inc();
    let mut progress = Progress {
        stage: Stage::Routing,
        op,
    };
    let ctx = CoordinationContext::new();
    let local = controller.name();

    // Controllers must not join or leave while an operation spans all of them
    let _topology = if decision.is_global() {
        Some(controller.topology().lock().await)
    } else {
        None
    };
    let targets: BTreeSet<String> = if decision.is_global() {
        controller.known_controllers()
    } else {
        decision.targets.clone()
    };
    tracing::info!("Coordinating {} across {:?}", op, targets);

    let mut staged = None;
    if targets.contains(local) {
        progress.enter(Stage::LocalApply);
        match resolver_step::apply(controller, op).await {
            Ok(change) => {
                ctx.set_local_result(OperationResponse::success(change.staged.result().clone()));
                ctx.set_local_worker_ops(change.server_operations);
                staged = Some(change.staged);
            }
            Err(e) => {
                tracing::warn!("{} failed on {}: {}", op, local, e);
                ctx.set_local_result(OperationResponse::from_error(&e));
            }
        }
    }

    let remote: BTreeSet<String> = targets.iter().filter(|t| *t != local).cloned().collect();
    let mut controllers = ControllerRequests::new();
    if !ctx.has_prepare_failure() && !remote.is_empty() {
        progress.enter(Stage::Preparing);
        controllers = prepare::prepare_controllers(controller, &ctx, &remote, op, interrupt.clone()).await;
    }

    progress.enter(Stage::Deciding);
    let mut workers = WorkerRequests::new();
    if ctx.has_prepare_failure() || ctx.failure_reported() {
        tracing::info!("{} failed to prepare; rolling back", op);
    } else {
        progress.enter(Stage::RollingOut);
        workers = rollout::run(controller, &ctx, op).await;
    }

    let timeouts = controller.timeouts();
    let mut patience = Patience::new(timeouts.blocking_timeout());
    let cap = timeouts.interrupted_patience();
    rollout::finalize_workers(controller, &ctx, &mut workers, &mut patience, &interrupt, cap).await;
    prepare::finalize_controllers(&ctx, &mut controllers, &mut patience, &interrupt, cap).await;
    if let Some(staged) = staged {
        if ctx.complete_rollback() {
            staged.rollback();
        } else {
            staged.commit();
        }
    }

    progress.enter(Stage::Assembling);
    let response = assembler::assemble(op, local, &ctx);
    progress.enter(Stage::Done);
    tracing::info!(
        "{} finished: {}{}",
        op,
        if response.is_success() { "success" } else { "failed" },
        if ctx.complete_rollback() { " (rolled back)" } else { "" }
    );
    response
}
