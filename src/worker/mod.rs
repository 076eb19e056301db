//! Worker processes supervised by a controller
//!
//! A worker holds no authoritative configuration: its runtime tree is derived
//! from the controller's model when it starts and is afterwards only changed
//! by operations the coordinator resolves for it.

pub mod process;
pub mod registry;

pub use process::{runtime_model, WorkerProcess};
pub use registry::WorkerRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key for a worker across the domain
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub controller: String,
    pub group: String,
    pub worker: String,
}

impl WorkerIdentity {
    pub fn new(
        controller: impl Into<String>,
        group: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            controller: controller.into(),
            group: group.into(),
            worker: worker.into(),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.worker)
    }
}

/// Lifecycle state of a worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopped,
}

impl WorkerStatus {
    /// Can this worker receive configuration changes?
    pub fn accepts_operations(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }

    /// Should the resolver consider this worker at all?
    pub fn is_live(&self) -> bool {
        matches!(self, WorkerStatus::Running | WorkerStatus::Starting)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_status() {
        assert!(WorkerStatus::Running.accepts_operations());
        assert!(!WorkerStatus::Starting.accepts_operations());
        assert!(WorkerStatus::Starting.is_live());
        assert!(!WorkerStatus::Stopped.is_live());
        assert_eq!(WorkerStatus::Starting.to_string(), "starting");
    }

    #[test]
    fn test_identity_ordering_and_display() {
        let a = WorkerIdentity::new("host-a", "g1", "s1");
        let b = WorkerIdentity::new("host-a", "g1", "s2");
        assert!(a < b);
        assert_eq!(a.to_string(), "host-a:s1");
    }
}
