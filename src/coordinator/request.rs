//! Lifecycle of one outbound request
//!
//! transform → send → prepared result → commit/rollback → final result.
//! Nothing past this boundary sees an `Err`: transformation and transport
//! failures become failed responses for the target.

use crate::common::METRICS;
use crate::controller::Controller;
use crate::coordinator::transform::{RejectPolicy, ResultMapper, Transformed};
use crate::model::{Operation, OperationResponse};
use crate::transport::{Decision, PreparedTransaction, Target, TransactionControl};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

pub struct RequestHandle {
    target: Target,
    prepare: Option<JoinHandle<crate::Result<PreparedTransaction>>>,
    prepared: Option<OperationResponse>,
    control: Option<Box<dyn TransactionControl>>,
    finalize: Option<JoinHandle<crate::Result<OperationResponse>>>,
    final_result: Option<OperationResponse>,
    reject: RejectPolicy,
    map_result: ResultMapper,
}

impl RequestHandle {
    /// Transform `op` for the target's model version and send it
    pub fn execute(controller: &Arc<Controller>, target: Target, op: &Operation) -> Self {
        let name = target.controller_name().to_string();
        let version = controller.model_version_of(&name);
        match controller.transformers().transform(&name, version, op) {
            Err(e) => {
                tracing::warn!("Cannot send {} to {}: {}", op, target, e);
                Self::synthesized(target, OperationResponse::from_error(&e))
            }
            Ok(Transformed {
                operation: None, ..
            }) => {
                tracing::debug!("{} has nothing to run on {}", op, target);
                Self::synthesized(target, OperationResponse::success(Value::Null))
            }
            Ok(Transformed {
                operation: Some(operation),
                reject,
                result,
            }) => {
                let future = controller.send_request(target.clone(), operation);
                Self {
                    target,
                    prepare: Some(tokio::spawn(future)),
                    prepared: None,
                    control: None,
                    finalize: None,
                    final_result: None,
                    reject,
                    map_result: result,
                }
            }
        }
    }

    /// A request answered locally without contacting the target
    pub fn synthesized(target: Target, response: OperationResponse) -> Self {
        Self {
            target,
            prepare: None,
            prepared: Some(response.clone()),
            control: None,
            finalize: None,
            final_result: Some(response),
            reject: Arc::new(|_| None),
            map_result: Arc::new(|resp| resp),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Prepared result, if it has been retrieved
    pub fn prepared(&self) -> Option<&OperationResponse> {
        self.prepared.as_ref()
    }

    /// Wait for the prepared result. Cancel-safe: dropping the future leaves
    /// the request in flight.
    pub async fn await_prepared(&mut self) -> OperationResponse {
        if self.prepared.is_none() {
            let outcome = match self.prepare.as_mut() {
                Some(handle) => Some(handle.await),
                None => None,
            };
            self.prepare = None;
            self.accept_prepared(outcome);
        }
        self.prepared.clone().unwrap_or_else(|| OperationResponse::failed("no prepared result"))
    }

    /// Take the prepared result only if it is already available
    pub async fn try_prepared_now(&mut self) -> Option<OperationResponse> {
        if self.prepared.is_none() && self.prepare.as_ref().is_some_and(JoinHandle::is_finished) {
            return Some(self.await_prepared().await);
        }
        self.prepared.clone()
    }

    fn accept_prepared(&mut self, outcome: Option<Result<crate::Result<PreparedTransaction>, JoinError>>) {
        let response = match outcome {
            Some(Ok(Ok(tx))) => {
                self.control = Some(tx.control);
                let mapped = (self.map_result)(tx.prepared);
                match (self.reject)(&mapped) {
                    Some(reason) => {
                        tracing::warn!("Rejecting prepared result from {}: {}", self.target, reason);
                        OperationResponse::failed(reason)
                    }
                    None => mapped,
                }
            }
            Some(Ok(Err(e))) => {
                tracing::warn!("Request to {} failed: {}", self.target, e);
                OperationResponse::from_error(&e)
            }
            Some(Err(e)) if e.is_cancelled() => {
                OperationResponse::failed(format!("Request to {} was cancelled", self.target))
            }
            Some(Err(e)) => {
                tracing::error!("Request task for {} failed: {}", self.target, e);
                OperationResponse::failed(format!("Request to {} failed: {}", self.target, e))
            }
            None => OperationResponse::failed(format!("Request to {} was cancelled", self.target)),
        };
        self.prepared = Some(response);
    }

    /// Send the decision. A target that never prepared has nothing to decide;
    /// its final result is its prepared failure.
    pub fn complete(&mut self, decision: Decision) {
        if self.final_result.is_some() || self.finalize.is_some() {
            return;
        }
        match self.control.take() {
            Some(control) => {
                tracing::debug!("Sending {} to {}", decision.as_str(), self.target);
                self.finalize = Some(tokio::spawn(control.complete(decision)));
            }
            None => {
                self.final_result = Some(
                    self.prepared
                        .clone()
                        .unwrap_or_else(|| OperationResponse::failed("request never prepared")),
                );
            }
        }
    }

    /// Wait up to `patience` for the final result. Running out of patience
    /// cancels the retrieval and yields a failure; a decision the target
    /// already received stands.
    pub async fn await_final(&mut self, patience: Duration) -> OperationResponse {
        if let Some(result) = &self.final_result {
            return result.clone();
        }
        let Some(handle) = self.finalize.as_mut() else {
            return OperationResponse::failed(format!("No decision was sent to {}", self.target));
        };
        let waited = tokio::time::timeout(patience, &mut *handle).await;
        let response = match waited {
            Ok(Ok(Ok(resp))) => (self.map_result)(resp),
            Ok(Ok(Err(e))) => {
                tracing::warn!("Final result from {} failed: {}", self.target, e);
                OperationResponse::from_error(&e)
            }
            Ok(Err(e)) => OperationResponse::failed(format!("Request to {} failed: {}", self.target, e)),
            Err(_) => {
                METRICS.result_timeouts.inc();
                tracing::warn!(
                    "Gave up waiting for the final result from {} after {:?}",
                    self.target,
                    patience
                );
                handle.abort();
                OperationResponse::failed(format!(
                    "Timed out waiting for the final result from {}",
                    self.target
                ))
            }
        };
        self.finalize = None;
        self.final_result = Some(response.clone());
        response
    }

    /// Best-effort cancellation of whatever is still in flight
    pub fn cancel(&mut self) {
        if let Some(handle) = self.prepare.take() {
            tracing::debug!("Cancelling request to {}", self.target);
            handle.abort();
            self.accept_prepared(None);
        }
        self.release();
    }

    /// Cancel a request that is still preparing and record `failure` as its
    /// prepared result
    pub fn abandon(&mut self, failure: OperationResponse) {
        if let Some(handle) = self.prepare.take() {
            tracing::debug!("Abandoning request to {}", self.target);
            handle.abort();
            self.prepared = Some(failure);
        }
        self.release();
    }

    fn release(&mut self) {
        // A decision already handed to `finalize` keeps running detached
        self.finalize = None;
        if let Some(control) = self.control.take() {
            tokio::spawn(control.complete(Decision::Rollback));
        }
    }

    pub fn is_pending(&self) -> bool {
        self.prepared.is_none()
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        // An undecided prepared transaction would otherwise hold the target's write permit
        if let Some(control) = self.control.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                tracing::debug!("Rolling back undecided request to {}", self.target);
                runtime.spawn(control.complete(Decision::Rollback));
            }
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("target", &self.target)
            .field("prepared", &self.prepared)
            .field("final_result", &self.final_result)
            .finish()
    }
}
