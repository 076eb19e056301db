//! Rollout plan document
//!
//! A plan is an ordered list of series. Each series is either a single server
//! group or a set of groups executed concurrently. Series run strictly in order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPlan {
    pub series: Vec<Series>,
    #[serde(default = "default_true")]
    pub rollback_across_groups: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Series {
    /// One group on its own
    Group { name: String, policy: GroupPolicy },
    /// Several groups at once
    ConcurrentGroups(BTreeMap<String, GroupPolicy>),
}

impl Series {
    /// `(group, policy)` pairs in this series
    pub fn groups(&self) -> Vec<(&str, &GroupPolicy)> {
        match self {
            Series::Group { name, policy } => vec![(name.as_str(), policy)],
            Series::ConcurrentGroups(groups) => {
                groups.iter().map(|(n, p)| (n.as_str(), p)).collect()
            }
        }
    }
}

/// Failure tolerance for one group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Push to one worker at a time
    #[serde(default)]
    pub rolling_to_workers: bool,
    #[serde(default)]
    pub max_failed_workers: Option<i64>,
    #[serde(default)]
    pub max_failure_percentage: Option<i64>,
}

impl GroupPolicy {
    /// Does `failed` out of `total` breach this group's tolerance?
    pub fn is_breached(&self, failed: usize, total: usize) -> bool {
        if let Some(pct) = self.max_failure_percentage {
            if total == 0 {
                return false;
            }
            return (failed as i64) * 100 > pct * (total as i64);
        }
        failed as i64 > self.max_failed_workers.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_by_count() {
        let policy = GroupPolicy {
            max_failed_workers: Some(1),
            ..Default::default()
        };
        assert!(!policy.is_breached(1, 4));
        assert!(policy.is_breached(2, 4));
        assert!(GroupPolicy::default().is_breached(1, 4));
        assert!(!GroupPolicy::default().is_breached(0, 4));
    }

    #[test]
    fn test_threshold_by_percentage() {
        let policy = GroupPolicy {
            max_failure_percentage: Some(50),
            ..Default::default()
        };
        assert!(!policy.is_breached(2, 4));
        assert!(policy.is_breached(3, 4));
    }

    #[test]
    fn test_plan_json_shape() {
        let json = serde_json::json!({
            "series": [
                {"group": {"name": "g1", "policy": {"rolling_to_workers": true}}},
                {"concurrent-groups": {"g2": {}, "g3": {"max_failed_workers": 1}}}
            ]
        });
        let plan: RolloutPlan = serde_json::from_value(json).unwrap();
        assert!(plan.rollback_across_groups);
        assert_eq!(plan.series.len(), 2);
        assert_eq!(plan.series[1].groups().len(), 2);
    }
}
