//! Rollout plan engine
//!
//! Walks a plan's series in order, pushing each group's worker operations
//! through a dispatch callback and applying the group's failure tolerance.

use crate::coordinator::plan::OpsByGroup;
use crate::model::{GroupPolicy, Operation, OperationResponse, RolloutPlan};
use crate::worker::WorkerIdentity;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    pub outcome: RolloutOutcome,
    /// Groups whose tolerance was breached
    pub failed_groups: BTreeSet<String>,
    /// Groups never started because an earlier series failed
    pub skipped_groups: BTreeSet<String>,
}

/// Sends one worker its operation and yields the prepared result
pub trait WorkerDispatch: Send + Sync {
    fn dispatch<'a>(&'a self, worker: &'a WorkerIdentity, op: &'a Operation) -> BoxFuture<'a, OperationResponse>;
}

pub trait RolloutEngine: Send + Sync {
    fn run<'a>(
        &'a self,
        ops_by_group: &'a OpsByGroup,
        plan: &'a RolloutPlan,
        dispatch: &'a dyn WorkerDispatch,
    ) -> BoxFuture<'a, RolloutReport>;
}

/// Default engine: series strictly in order, groups of a series concurrently
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanExecutor;

impl PlanExecutor {
    /// Returns true if the group stayed within its tolerance
    async fn run_group(
        group: &str,
        policy: &GroupPolicy,
        workers: &BTreeMap<WorkerIdentity, Operation>,
        dispatch: &dyn WorkerDispatch,
    ) -> bool {
        let total = workers.len();
        let failed = if policy.rolling_to_workers {
            let mut failed = 0;
            for (worker, op) in workers {
                if dispatch.dispatch(worker, op).await.is_failed() {
                    failed += 1;
                    if policy.is_breached(failed, total) {
                        tracing::warn!("Group {} stopped rolling at {}", group, worker);
                        break;
                    }
                }
            }
            failed
        } else {
            join_all(workers.iter().map(|(worker, op)| dispatch.dispatch(worker, op)))
                .await
                .iter()
                .filter(|resp| resp.is_failed())
                .count()
        };
        let ok = !policy.is_breached(failed, total);
        tracing::debug!("Group {}: {}/{} workers failed, ok={}", group, failed, total, ok);
        ok
    }
}

impl RolloutEngine for PlanExecutor {
    fn run<'a>(
        &'a self,
        ops_by_group: &'a OpsByGroup,
        plan: &'a RolloutPlan,
        dispatch: &'a dyn WorkerDispatch,
    ) -> BoxFuture<'a, RolloutReport> {
        async move {
            let mut failed_groups = BTreeSet::new();
            let mut skipped_groups = BTreeSet::new();
            let mut executed = BTreeSet::new();
            let mut halted = false;

            for series in &plan.series {
                let groups: Vec<_> = series
                    .groups()
                    .into_iter()
                    .filter_map(|(name, policy)| ops_by_group.get(name).map(|w| (name, policy, w)))
                    .collect();
                if halted {
                    skipped_groups.extend(groups.iter().map(|(name, _, _)| name.to_string()));
                    continue;
                }
                let results = join_all(groups.iter().map(|(name, policy, workers)| async move {
                    (*name, Self::run_group(name, policy, workers, dispatch).await)
                }))
                .await;
                for (name, ok) in results {
                    executed.insert(name.to_string());
                    if !ok {
                        failed_groups.insert(name.to_string());
                    }
                }
                if !failed_groups.is_empty() && plan.rollback_across_groups {
                    halted = true;
                }
            }

            let succeeded = executed.difference(&failed_groups).count();
            let outcome = if failed_groups.is_empty() && skipped_groups.is_empty() {
                RolloutOutcome::Success
            } else if succeeded == 0 {
                RolloutOutcome::Failed
            } else {
                RolloutOutcome::Partial
            };
            RolloutReport {
                outcome,
                failed_groups,
                skipped_groups,
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::plan::default_plan;
    use crate::model::{Address, Series};
    use serde_json::Value;
    use std::sync::Mutex;

    /// Fails the listed workers and records dispatch order
    struct Scripted {
        failing: BTreeSet<String>,
        order: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                order: Mutex::new(Vec::new()),
            }
        }

        fn order(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    impl WorkerDispatch for Scripted {
        fn dispatch<'a>(&'a self, worker: &'a WorkerIdentity, _op: &'a Operation) -> BoxFuture<'a, OperationResponse> {
            async move {
                self.order.lock().unwrap().push(worker.worker.clone());
                if self.failing.contains(&worker.worker) {
                    OperationResponse::failed("boom")
                } else {
                    OperationResponse::success(Value::Null)
                }
            }
            .boxed()
        }
    }

    fn ops(layout: &[(&str, &[&str])]) -> OpsByGroup {
        let op = Operation::simple("add", Address::of([("extension", "x")]));
        layout
            .iter()
            .map(|(group, workers)| {
                (
                    group.to_string(),
                    workers
                        .iter()
                        .map(|w| (WorkerIdentity::new("a", *group, *w), op.clone()))
                        .collect(),
                )
            })
            .collect()
    }

    fn serial(groups: &[(&str, GroupPolicy)], rollback_across_groups: bool) -> RolloutPlan {
        RolloutPlan {
            series: groups
                .iter()
                .map(|(name, policy)| Series::Group {
                    name: name.to_string(),
                    policy: policy.clone(),
                })
                .collect(),
            rollback_across_groups,
        }
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let ops = ops(&[("g1", &["s1", "s2"]), ("g2", &["s3"])]);
        let dispatch = Scripted::new(&[]);
        let report = PlanExecutor.run(&ops, &default_plan(&ops), &dispatch).await;
        assert_eq!(report.outcome, RolloutOutcome::Success);
        assert_eq!(dispatch.order().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_group_halts_later_series() {
        let ops = ops(&[("g1", &["s1"]), ("g2", &["s2"])]);
        let plan = serial(&[("g1", GroupPolicy::default()), ("g2", GroupPolicy::default())], true);
        let dispatch = Scripted::new(&["s1"]);
        let report = PlanExecutor.run(&ops, &plan, &dispatch).await;
        assert_eq!(report.outcome, RolloutOutcome::Failed);
        assert_eq!(report.failed_groups, BTreeSet::from(["g1".to_string()]));
        assert_eq!(report.skipped_groups, BTreeSet::from(["g2".to_string()]));
        assert_eq!(dispatch.order(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_partial_without_rollback_across_groups() {
        let ops = ops(&[("g1", &["s1"]), ("g2", &["s2"])]);
        let plan = serial(&[("g1", GroupPolicy::default()), ("g2", GroupPolicy::default())], false);
        let dispatch = Scripted::new(&["s1"]);
        let report = PlanExecutor.run(&ops, &plan, &dispatch).await;
        assert_eq!(report.outcome, RolloutOutcome::Partial);
        assert!(report.skipped_groups.is_empty());
        assert_eq!(dispatch.order(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_tolerated_failures() {
        let ops = ops(&[("g1", &["s1", "s2", "s3", "s4"])]);
        let plan = serial(
            &[(
                "g1",
                GroupPolicy {
                    max_failure_percentage: Some(50),
                    ..Default::default()
                },
            )],
            true,
        );
        let report = PlanExecutor.run(&ops, &plan, &Scripted::new(&["s1", "s2"])).await;
        assert_eq!(report.outcome, RolloutOutcome::Success);
        let report = PlanExecutor.run(&ops, &plan, &Scripted::new(&["s1", "s2", "s3"])).await;
        assert_eq!(report.outcome, RolloutOutcome::Failed);
    }

    #[tokio::test]
    async fn test_rolling_group_stops_at_breach() {
        let ops = ops(&[("g1", &["s1", "s2", "s3"])]);
        let plan = serial(
            &[(
                "g1",
                GroupPolicy {
                    rolling_to_workers: true,
                    ..Default::default()
                },
            )],
            true,
        );
        let dispatch = Scripted::new(&["s2"]);
        let report = PlanExecutor.run(&ops, &plan, &dispatch).await;
        assert_eq!(report.outcome, RolloutOutcome::Failed);
        assert_eq!(dispatch.order(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_default_plan_partitioning_is_stable() {
        let ops = ops(&[("g1", &["s1", "s2"]), ("g2", &["s3"])]);
        let first = Scripted::new(&[]);
        let second = Scripted::new(&[]);
        let a = PlanExecutor.run(&ops, &default_plan(&ops), &first).await;
        let b = PlanExecutor.run(&ops, &default_plan(&ops), &second).await;
        assert_eq!(a, b);
        let mut x = first.order();
        let mut y = second.order();
        x.sort();
        y.sort();
        assert_eq!(x, y);
    }
}
