//! Result assembly
//!
//! Runs last, once every decision has been sent and every final result
//! collected, and turns the coordination context into one response.
//!
//! Failure precedence: a failure of the coordinator's own model change, then a
//! failure recorded on the context (bad rollout plan, interruption), then the
//! worker rollout, then the prepare results of the other controllers.

use crate::coordinator::context::CoordinationContext;
use crate::model::address::WILDCARD;
use crate::model::{Operation, OperationResponse};
use crate::worker::WorkerIdentity;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Key under which per-controller prepare failures are reported
pub const HOST_FAILURES: &str = "host-failure-descriptions";

/// Key under which failed workers are reported
pub const WORKER_FAILURES: &str = "worker-failure-descriptions";

pub fn assemble(op: &Operation, local: &str, ctx: &CoordinationContext) -> OperationResponse {
    let worker_results = ctx.worker_results();
    let warnings = collect_warnings(&worker_results);

    let mut response = match failure(op, ctx, &worker_results) {
        Some(failure) => failure,
        None => {
            let view = Results {
                local,
                local_result: ctx.local_result(),
                finals: ctx.finals(),
                workers: &worker_results,
            };
            view.response_for(op, &[])
        }
    };
    if !worker_results.is_empty() {
        response.server_groups = Some(server_groups(&worker_results));
    }
    response.warnings = warnings;
    response
}

fn failure(
    op: &Operation,
    ctx: &CoordinationContext,
    worker_results: &BTreeMap<WorkerIdentity, OperationResponse>,
) -> Option<OperationResponse> {
    if let Some(local) = ctx.local_result().filter(OperationResponse::is_failed) {
        return Some(local.strip_warnings().mark_rolled_back());
    }
    if let Some(description) = ctx.failure() {
        return Some(OperationResponse::failed(description).mark_rolled_back());
    }
    if !worker_results.is_empty() {
        let any_success = worker_results.values().any(OperationResponse::is_success);
        if ctx.rollout_failed() || !any_success {
            return Some(worker_failure(worker_results));
        }
        return None;
    }

    let failed: BTreeMap<String, OperationResponse> = ctx
        .prepared()
        .into_iter()
        .filter(|(_, prepared)| prepared.is_failed())
        .collect();
    if failed.is_empty() {
        return None;
    }
    // Addressed to one controller: its failure is the answer
    if let Some(host) = op.address().host().filter(|h| *h != WILDCARD) {
        if let Some(prepared) = failed.get(host) {
            return Some(prepared.clone().mark_rolled_back());
        }
    }
    let mut response = OperationResponse::success(Value::Null);
    let descriptions: Map<String, Value> = failed
        .into_iter()
        .map(|(name, prepared)| (name, prepared.failure_description.unwrap_or(Value::Null)))
        .collect();
    response.merge_failure(HOST_FAILURES, Value::Object(descriptions));
    Some(response.mark_rolled_back())
}

fn worker_failure(worker_results: &BTreeMap<WorkerIdentity, OperationResponse>) -> OperationResponse {
    let failures: Map<String, Value> = worker_results
        .iter()
        .filter(|(_, resp)| resp.is_failed())
        .map(|(worker, resp)| {
            (
                worker.to_string(),
                resp.failure_description.clone().unwrap_or(Value::Null),
            )
        })
        .collect();
    let mut response = OperationResponse::failed(json!({
        "message": "Operation failed or was rolled back on the workers",
    }));
    response.merge_failure(WORKER_FAILURES, Value::Object(failures));
    response.mark_rolled_back()
}

/// `{group: {"host": {controller: {worker: {"response": ...}}}}}`, with worker
/// warnings stripped since they are reported once at the top level
fn server_groups(worker_results: &BTreeMap<WorkerIdentity, OperationResponse>) -> Value {
    let mut groups = Map::new();
    for (worker, resp) in worker_results {
        let response = serde_json::to_value(resp.strip_warnings()).unwrap_or(Value::Null);
        let group = groups
            .entry(worker.group.clone())
            .or_insert_with(|| json!({"host": {}}));
        if let Some(hosts) = group.get_mut("host").and_then(Value::as_object_mut) {
            let host = hosts
                .entry(worker.controller.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(host) = host.as_object_mut() {
                host.insert(worker.worker.clone(), json!({ "response": response }));
            }
        }
    }
    Value::Object(groups)
}

fn collect_warnings(worker_results: &BTreeMap<WorkerIdentity, OperationResponse>) -> Vec<String> {
    let unique: BTreeSet<&String> = worker_results.values().flat_map(|r| r.warnings.iter()).collect();
    unique.into_iter().cloned().collect()
}

/// Everything a successful operation's response is built from
struct Results<'a> {
    local: &'a str,
    local_result: Option<OperationResponse>,
    finals: BTreeMap<String, OperationResponse>,
    workers: &'a BTreeMap<WorkerIdentity, OperationResponse>,
}

impl Results<'_> {
    /// Response for the step at `path` (empty for the whole operation)
    fn response_for(&self, op: &Operation, path: &[usize]) -> OperationResponse {
        match op {
            Operation::Composite(composite) => {
                let mut steps = Map::new();
                for (i, step) in composite.steps.iter().enumerate() {
                    let mut step_path = path.to_vec();
                    step_path.push(i + 1);
                    let response = self.response_for(step, &step_path).strip_warnings();
                    steps.insert(
                        format!("step-{}", i + 1),
                        serde_json::to_value(response).unwrap_or(Value::Null),
                    );
                }
                OperationResponse::success(Value::Object(steps))
            }
            Operation::Simple(_) => self.leaf(op, path),
        }
    }

    fn leaf(&self, op: &Operation, path: &[usize]) -> OperationResponse {
        let address = op.address();
        if address.is_worker_scoped() {
            let host = address.host().unwrap_or(self.local);
            let server = address.get(1).map(|s| s.value.as_str()).unwrap_or_default();
            return self
                .workers
                .iter()
                .find(|(w, _)| w.controller == host && w.worker == server)
                .map(|(_, resp)| resp.strip_warnings())
                .unwrap_or_else(|| OperationResponse::success(Value::Null));
        }
        let source = match address.host() {
            Some(host) if host != self.local && host != WILDCARD => self.finals.get(host),
            _ => self.local_result.as_ref(),
        };
        source
            .and_then(|resp| at_path(resp, path))
            .unwrap_or_else(|| OperationResponse::success(Value::Null))
    }
}

/// Walk `step-N` results down `path`
fn at_path(resp: &OperationResponse, path: &[usize]) -> Option<OperationResponse> {
    let mut current = resp.clone();
    for step in path {
        let nested = current.result.get(format!("step-{}", step))?.clone();
        current = serde_json::from_value(nested).ok()?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Address;

    fn worker(controller: &str, group: &str, name: &str) -> WorkerIdentity {
        WorkerIdentity::new(controller, group, name)
    }

    #[test]
    fn test_local_failure_wins() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::failed("bad model change"));
        ctx.set_prepared("b", OperationResponse::failed("unreachable"));
        ctx.set_failure("interrupted");
        let resp = assemble(&Operation::simple("add", Address::of([("path", "p")])), "a", &ctx);
        assert!(resp.is_failed());
        assert!(resp.rolled_back);
        assert_eq!(resp.failure_text(), "bad model change");
    }

    #[test]
    fn test_context_failure_before_workers() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(Value::Null));
        ctx.set_failure("Invalid rollout plan: nope");
        let resp = assemble(&Operation::simple("add", Address::of([("path", "p")])), "a", &ctx);
        assert_eq!(resp.failure_text(), "Invalid rollout plan: nope");
    }

    #[test]
    fn test_prepare_failures_are_keyed_by_host() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(Value::Null));
        ctx.set_prepared("b", OperationResponse::failed("timed out"));
        ctx.set_prepared("c", OperationResponse::success(Value::Null));
        let resp = assemble(&Operation::simple("add", Address::of([("path", "p")])), "a", &ctx);
        assert!(resp.is_failed());
        assert_eq!(
            resp.failure_description,
            Some(json!({ HOST_FAILURES: {"b": "timed out"} }))
        );
    }

    #[test]
    fn test_controller_scoped_failure_is_reported_as_is() {
        let ctx = CoordinationContext::new();
        ctx.set_prepared("b", OperationResponse::failed("no such path"));
        let op = Operation::composite(vec![]);
        assert!(assemble(&op, "a", &ctx).failure_description.unwrap().get(HOST_FAILURES).is_some());
        let op = Operation::simple("remove", Address::of([("host", "b"), ("path", "p")]));
        assert_eq!(assemble(&op, "a", &ctx).failure_text(), "no such path");
    }

    #[test]
    fn test_server_groups_and_deduplicated_warnings() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(Value::Null));
        let mut ok = OperationResponse::success(json!("done"));
        ok.warnings.push("s requires a reload".into());
        ctx.set_worker_result(&worker("a", "g1", "s1"), ok.clone());
        ctx.set_worker_result(&worker("b", "g1", "s2"), ok);
        let resp = assemble(&Operation::simple("add", Address::of([("path", "p")])), "a", &ctx);
        assert!(resp.is_success());
        assert_eq!(resp.warnings, vec!["s requires a reload".to_string()]);
        let groups = resp.server_groups.unwrap();
        assert_eq!(groups["g1"]["host"]["a"]["s1"]["response"]["result"], "done");
        assert!(groups["g1"]["host"]["b"]["s2"]["response"].get("warnings").is_none());
    }

    #[test]
    fn test_rollout_failure_summarises_workers() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(Value::Null));
        ctx.set_worker_result(&worker("a", "g1", "s1"), OperationResponse::failed("boom"));
        ctx.set_worker_result(&worker("a", "g2", "s2"), OperationResponse::rolled_back_result());
        ctx.mark_rollout_failed();
        let resp = assemble(&Operation::simple("add", Address::of([("path", "p")])), "a", &ctx);
        assert!(resp.is_failed());
        let description = resp.failure_description.unwrap();
        assert_eq!(description[WORKER_FAILURES]["a:s1"], "boom");
        assert!(resp.server_groups.is_some());
    }

    #[test]
    fn test_composite_demultiplexing() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(json!({
            "step-1": {"outcome": "success", "result": "local"},
            "step-2": {"outcome": "success"},
            "step-3": {"outcome": "success"},
            "step-4": {"outcome": "success", "result": {
                "step-1": {"outcome": "success", "result": "nested"},
            }},
        })));
        ctx.set_final(
            "b",
            OperationResponse::success(json!({
                "step-2": {"outcome": "success", "result": "remote"},
            })),
        );
        ctx.set_worker_result(&worker("a", "g1", "s1"), OperationResponse::success(json!("worker")));

        let op = Operation::composite(vec![
            Operation::simple("read-attribute", Address::of([("path", "p")])),
            Operation::simple("read-attribute", Address::of([("host", "b"), ("path", "p")])),
            Operation::simple("read-resource", Address::of([("host", "a"), ("server", "s1")])),
            Operation::composite(vec![Operation::simple(
                "read-attribute",
                Address::of([("path", "q")]),
            )]),
        ]);
        let resp = assemble(&op, "a", &ctx);
        assert!(resp.is_success());
        assert_eq!(resp.result["step-1"]["result"], "local");
        assert_eq!(resp.result["step-2"]["result"], "remote");
        assert_eq!(resp.result["step-3"]["result"], "worker");
        assert_eq!(resp.result["step-4"]["result"]["step-1"]["result"], "nested");
    }
}
