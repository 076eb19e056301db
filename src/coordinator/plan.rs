//! Rollout plan resolution and validation

use crate::common::{Error, Result};
use crate::model::{GroupPolicy, Operation, RolloutPlan, Series};
use crate::worker::WorkerIdentity;
use std::collections::{BTreeMap, BTreeSet};

/// Worker operations grouped by server group
pub type OpsByGroup = BTreeMap<String, BTreeMap<WorkerIdentity, Operation>>;

/// One concurrent series over every group, nothing tolerated, roll back across groups
pub fn default_plan(ops_by_group: &OpsByGroup) -> RolloutPlan {
    RolloutPlan {
        series: vec![Series::ConcurrentGroups(
            ops_by_group
                .keys()
                .map(|group| (group.clone(), GroupPolicy::default()))
                .collect(),
        )],
        rollback_across_groups: true,
    }
}

/// The supplied plan after validation, or the default plan
pub fn resolve_plan(supplied: Option<&RolloutPlan>, ops_by_group: &OpsByGroup) -> Result<RolloutPlan> {
    match supplied {
        None => Ok(default_plan(ops_by_group)),
        Some(plan) => {
            validate(plan, ops_by_group)?;
            Ok(plan.clone())
        }
    }
}

fn validate(plan: &RolloutPlan, ops_by_group: &OpsByGroup) -> Result<()> {
    let mut seen = BTreeSet::new();
    for series in &plan.series {
        for (group, policy) in series.groups() {
            if !seen.insert(group) {
                return Err(Error::InvalidRolloutPlan(format!(
                    "group {} appears more than once",
                    group
                )));
            }
            validate_policy(group, policy)?;
        }
    }
    let missing: Vec<&str> = ops_by_group
        .keys()
        .map(String::as_str)
        .filter(|g| !seen.contains(g))
        .collect();
    if !missing.is_empty() {
        return Err(Error::InvalidRolloutPlan(format!(
            "plan does not cover server groups: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn validate_policy(group: &str, policy: &GroupPolicy) -> Result<()> {
    if let Some(max) = policy.max_failed_workers {
        if max < 0 {
            return Err(Error::InvalidRolloutPlan(format!(
                "max-failed-workers for {} must not be negative",
                group
            )));
        }
    }
    if let Some(pct) = policy.max_failure_percentage {
        if !(0..=100).contains(&pct) {
            return Err(Error::InvalidRolloutPlan(format!(
                "max-failure-percentage for {} must be between 0 and 100",
                group
            )));
        }
        if policy.max_failed_workers.is_some() {
            return Err(Error::InvalidRolloutPlan(format!(
                "group {} sets both max-failed-workers and max-failure-percentage",
                group
            )));
        }
    }
    Ok(())
}
