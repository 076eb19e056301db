//! Top-level dispatcher
//!
//! Entry point for every management operation a controller receives. Picks the
//! cheapest path that keeps the domain consistent: direct apply while booting
//! or for local reads, pass-through for a single worker or a single remote
//! controller, and the two-phase pipeline for everything else.

use crate::common::audit::{AuditEventType, AUDIT_LOGGER};
use crate::common::{generate_domain_uuid, Error, METRICS};
use crate::controller::Controller;
use crate::coordinator::context::Interrupt;
use crate::coordinator::pipeline;
use crate::coordinator::request::RequestHandle;
use crate::coordinator::resolver_step;
use crate::coordinator::routing::{route, RouteContext};
use crate::model::registry;
use crate::model::{Operation, OperationResponse};
use crate::transport::{Decision, Target};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Execute `op` on behalf of a caller of `controller`
pub async fn execute(controller: &Arc<Controller>, mut op: Operation, interrupt: Interrupt) -> OperationResponse {
    let started = Instant::now();
    if op.headers().domain_uuid.is_none() {
        op.headers_mut().domain_uuid = Some(generate_domain_uuid());
    }
    let response = dispatch(controller, &op, interrupt).await;
    METRICS.record_operation(started.elapsed(), response.is_success());
    if is_write(&op) {
        audit(&op, &response);
    }
    response
}

async fn dispatch(controller: &Arc<Controller>, op: &Operation, interrupt: Interrupt) -> OperationResponse {
    if controller.is_booting() {
        tracing::debug!("Booting; applying {} directly", op);
        return apply_directly(controller, op).await;
    }
    if op.headers().execute_for_coordinator {
        return apply_for_coordinator(controller, op).await;
    }

    let address = op.address();
    if address.is_worker_scoped() {
        return to_worker(controller, op).await;
    }

    let known = controller.known_controllers();
    let route_ctx = RouteContext {
        local: controller.name(),
        primary: controller.primary_name(),
        known: &known,
    };
    let decision = match route(op, &route_ctx) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!("Cannot route {}: {}", op, e);
            return OperationResponse::from_error(&e);
        }
    };
    tracing::debug!("{} routed to {:?} (two-phase: {})", op, decision.targets, decision.two_phase);

    match decision.sole_target() {
        // The owning controller coordinates on its own
        Some(target) if target != controller.name() && !op.is_composite() => {
            forward(controller, Target::controller(target), op).await
        }
        Some(target) if target == controller.name() && !decision.two_phase && !reaches_workers(op) => {
            apply_directly(controller, op).await
        }
        _ => pipeline::run_two_phase(controller, op, &decision, interrupt).await,
    }
}

/// Apply to the local model and commit at once
async fn apply_directly(controller: &Controller, op: &Operation) -> OperationResponse {
    match controller.model().begin(op.clone()).await {
        Ok(staged) => {
            let response = OperationResponse::success(staged.result().clone());
            staged.commit();
            response
        }
        Err(e) => OperationResponse::from_error(&e),
    }
}

/// A coordinator's delegated request arriving without a transaction to hold
/// it open: resolve, commit, and report the worker operations
async fn apply_for_coordinator(controller: &Controller, op: &Operation) -> OperationResponse {
    match resolver_step::apply(controller, op).await {
        Ok(change) => {
            let response = resolver_step::prepared_payload(&change);
            change.staged.commit();
            response
        }
        Err(e) => OperationResponse::from_error(&e),
    }
}

/// `/host=h/server=s/...`: straight to the worker, via its controller if remote
async fn to_worker(controller: &Arc<Controller>, op: &Operation) -> OperationResponse {
    let address = op.address();
    let (Some(host), Some(server)) = (address.host(), address.get(1)) else {
        return OperationResponse::failed(format!("Malformed worker address {}", address));
    };
    if host != controller.name() {
        if !controller.known_controllers().contains(host) {
            return OperationResponse::from_error(&Error::UnknownController(host.to_string()));
        }
        return forward(controller, Target::controller(host), op).await;
    }
    let Some(worker) = controller.workers().get(&server.value) else {
        return OperationResponse::from_error(&Error::NotFound(address.to_string()));
    };
    let target = Target::worker(worker.identity().clone());
    forward(controller, target, &op.readdressed(address.skip(2))).await
}

/// Send to one target and commit whatever it prepared successfully
async fn forward(controller: &Arc<Controller>, target: Target, op: &Operation) -> OperationResponse {
    tracing::debug!("Forwarding {} to {}", op, target);
    let timeout = controller.timeouts().blocking_timeout();
    let mut request = RequestHandle::execute(controller, target, op);
    let waited = tokio::time::timeout(timeout, request.await_prepared()).await;
    let prepared = match waited {
        Ok(prepared) => prepared,
        Err(_) => {
            request.cancel();
            return OperationResponse::from_error(&Error::Timeout(format!("{} did not answer", request.target())));
        }
    };
    let decision = if prepared.is_success() {
        Decision::Commit
    } else {
        Decision::Rollback
    };
    request.complete(decision);
    let final_result = request.await_final(timeout).await;
    match decision {
        Decision::Commit => final_result,
        Decision::Rollback => prepared,
    }
}

fn is_write(op: &Operation) -> bool {
    match op {
        Operation::Simple(_) => !registry::is_read_only(op.name()),
        Operation::Composite(_) => op.steps().iter().any(is_write),
    }
}

/// Does any part of `op` have to be carried to a worker?
fn reaches_workers(op: &Operation) -> bool {
    match op {
        Operation::Simple(_) => op.address().is_worker_scoped() || op.headers().push_to_workers,
        Operation::Composite(_) => op.headers().push_to_workers || op.steps().iter().any(reaches_workers),
    }
}

fn audit(op: &Operation, response: &OperationResponse) {
    let event = if response.is_success() {
        AuditEventType::OperationCommitted
    } else if response.rolled_back {
        AuditEventType::OperationRolledBack
    } else {
        AuditEventType::OperationRejected
    };
    let headers = op.headers();
    let message = if response.is_success() {
        op.name().to_string()
    } else {
        json!({ "operation": op.name(), "failure": response.failure_description }).to_string()
    };
    AUDIT_LOGGER.log_event(
        event,
        headers.caller_type.as_deref(),
        Some(op.address().to_string()),
        message,
        headers.domain_uuid.clone(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Address;

    #[test]
    fn test_write_classification() {
        assert!(!is_write(&Operation::simple("read-resource", Address::root())));
        assert!(is_write(&Operation::simple("add", Address::of([("path", "p")]))));
        assert!(is_write(&Operation::composite(vec![
            Operation::simple("read-resource", Address::root()),
            Operation::simple("remove", Address::of([("path", "p")])),
        ])));
    }

    #[test]
    fn test_worker_reach() {
        let worker_read = Operation::simple("read-resource", Address::of([("host", "a"), ("server", "s1")]));
        assert!(reaches_workers(&Operation::composite(vec![worker_read])));
        assert!(!reaches_workers(&Operation::simple("read-resource", Address::root())));
    }
}
