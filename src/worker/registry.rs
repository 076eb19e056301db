//! Workers supervised by one controller, by name

use crate::worker::{WorkerIdentity, WorkerProcess, WorkerStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<BTreeMap<String, Arc<WorkerProcess>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a worker under its identity's name
    pub fn register(&self, process: WorkerProcess) -> Arc<WorkerProcess> {
        let process = Arc::new(process);
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process.identity().worker.clone(), process.clone());
        process
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerProcess>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn status_of(&self, name: &str) -> WorkerStatus {
        self.get(name)
            .map(|w| w.status())
            .unwrap_or(WorkerStatus::Stopped)
    }

    /// Point-in-time status of every known worker
    pub fn statuses(&self) -> BTreeMap<String, WorkerStatus> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, w)| (name.clone(), w.status()))
            .collect()
    }

    /// Identity and status of every known worker
    pub fn snapshot(&self) -> Vec<(WorkerIdentity, WorkerStatus)> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|w| (w.identity().clone(), w.status()))
            .collect()
    }

    pub fn stop(&self, name: &str) -> bool {
        match self.get(name) {
            Some(w) => {
                w.set_status(WorkerStatus::Stopped);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
