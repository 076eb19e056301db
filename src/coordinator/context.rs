//! Per-operation coordination state
//!
//! One context exists for each two-phase operation. Phase handlers write to it
//! key by key; ordering between phases is what keeps the values consistent.

use crate::coordinator::resolver::ResolvedOperations;
use crate::model::OperationResponse;
use crate::worker::WorkerIdentity;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

pub struct CoordinationContext {
    local_result: Mutex<Option<OperationResponse>>,
    prepared: Mutex<BTreeMap<String, OperationResponse>>,
    finals: Mutex<BTreeMap<String, OperationResponse>>,
    worker_results: Mutex<BTreeMap<WorkerIdentity, OperationResponse>>,
    group_rollback: Mutex<BTreeMap<String, bool>>,
    local_worker_ops: Mutex<ResolvedOperations>,
    failure: Mutex<Option<Value>>,
    complete_rollback: AtomicBool,
    failure_reported: AtomicBool,
    rollout_failed: AtomicBool,
}

impl Default for CoordinationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CoordinationContext {
    pub fn new() -> Self {
        Self {
            local_result: Mutex::new(None),
            prepared: Mutex::new(BTreeMap::new()),
            finals: Mutex::new(BTreeMap::new()),
            worker_results: Mutex::new(BTreeMap::new()),
            group_rollback: Mutex::new(BTreeMap::new()),
            local_worker_ops: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
            complete_rollback: AtomicBool::new(true),
            failure_reported: AtomicBool::new(false),
            rollout_failed: AtomicBool::new(false),
        }
    }

    pub fn set_local_result(&self, result: OperationResponse) {
        *lock(&self.local_result) = Some(result);
    }

    pub fn local_result(&self) -> Option<OperationResponse> {
        lock(&self.local_result).clone()
    }

    pub fn set_prepared(&self, controller: &str, result: OperationResponse) {
        lock(&self.prepared).insert(controller.to_string(), result);
    }

    pub fn prepared(&self) -> BTreeMap<String, OperationResponse> {
        lock(&self.prepared).clone()
    }

    pub fn set_final(&self, controller: &str, result: OperationResponse) {
        lock(&self.finals).insert(controller.to_string(), result);
    }

    pub fn finals(&self) -> BTreeMap<String, OperationResponse> {
        lock(&self.finals).clone()
    }

    pub fn set_worker_result(&self, worker: &WorkerIdentity, result: OperationResponse) {
        lock(&self.worker_results).insert(worker.clone(), result);
    }

    pub fn worker_results(&self) -> BTreeMap<WorkerIdentity, OperationResponse> {
        lock(&self.worker_results).clone()
    }

    pub fn set_group_rollback(&self, group: &str, rollback: bool) {
        lock(&self.group_rollback).insert(group.to_string(), rollback);
    }

    pub fn group_rollback(&self, group: &str) -> bool {
        lock(&self.group_rollback).get(group).copied().unwrap_or(false)
    }

    pub fn set_local_worker_ops(&self, ops: ResolvedOperations) {
        *lock(&self.local_worker_ops) = ops;
    }

    pub fn local_worker_ops(&self) -> ResolvedOperations {
        lock(&self.local_worker_ops).clone()
    }

    /// Failure not attributable to any single controller or worker
    pub fn set_failure(&self, description: impl Into<Value>) {
        *lock(&self.failure) = Some(description.into());
    }

    pub fn failure(&self) -> Option<Value> {
        lock(&self.failure).clone()
    }

    pub fn complete_rollback(&self) -> bool {
        self.complete_rollback.load(Ordering::SeqCst)
    }

    pub fn set_complete_rollback(&self, rollback: bool) {
        self.complete_rollback.store(rollback, Ordering::SeqCst);
    }

    pub fn failure_reported(&self) -> bool {
        self.failure_reported.load(Ordering::SeqCst)
    }

    pub fn mark_failure_reported(&self) {
        self.failure_reported.store(true, Ordering::SeqCst);
    }

    pub fn rollout_failed(&self) -> bool {
        self.rollout_failed.load(Ordering::SeqCst)
    }

    pub fn mark_rollout_failed(&self) {
        self.rollout_failed.store(true, Ordering::SeqCst);
    }

    /// Did the local apply or any controller's prepare fail?
    pub fn has_prepare_failure(&self) -> bool {
        lock(&self.local_result)
            .as_ref()
            .is_some_and(OperationResponse::is_failed)
            || lock(&self.prepared).values().any(OperationResponse::is_failed)
    }
}

/// Receiving side of an operation's interrupt signal
#[derive(Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Raises the interrupt for every clone of the paired [`Interrupt`]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl Interrupt {
    pub fn channel() -> (InterruptHandle, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx }, Interrupt { rx })
    }

    /// An interrupt that never fires
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt is raised; pending forever if it cannot be
    pub async fn raised(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                futures_util::future::pending::<()>().await;
            }
        }
    }
}

impl InterruptHandle {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let ctx = CoordinationContext::new();
        assert!(ctx.complete_rollback());
        assert!(!ctx.failure_reported());
        assert!(!ctx.has_prepare_failure());
        assert!(!ctx.group_rollback("g1"));
    }

    #[test]
    fn test_prepare_failure_detection() {
        let ctx = CoordinationContext::new();
        ctx.set_local_result(OperationResponse::success(Value::Null));
        ctx.set_prepared("b", OperationResponse::success(Value::Null));
        assert!(!ctx.has_prepare_failure());
        ctx.set_prepared("c", OperationResponse::failed("boom"));
        assert!(ctx.has_prepare_failure());
    }

    #[tokio::test]
    async fn test_interrupt() {
        let (handle, mut interrupt) = Interrupt::channel();
        assert!(!interrupt.is_raised());
        let waiter = tokio::spawn(async move {
            interrupt.raised().await;
        });
        handle.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_interrupt_stays_pending() {
        let mut interrupt = Interrupt::never();
        let res = tokio::time::timeout(Duration::from_millis(20), interrupt.raised()).await;
        assert!(res.is_err());
    }
}
