//! Controller-to-controller transport
//!
//! Every request crosses a two-step boundary: `send` returns once the target has
//! prepared (applied the operation to a staged copy and computed a result), and
//! the returned [`TransactionControl`] delivers the commit or rollback decision.
//! The in-process [`local::LocalTransport`] and the HTTP
//! [`http::HttpTransport`] implement the same contract.

pub mod http;
pub mod local;

pub use http::{HttpTransport, PendingTransactions};
pub use local::{Fault, LocalTransport};

use crate::common::Result;
use crate::model::{Operation, OperationResponse};
use crate::worker::WorkerIdentity;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a request is delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// A controller's own model
    Controller { name: String },
    /// A worker supervised by the named controller
    Worker { identity: WorkerIdentity },
}

impl Target {
    pub fn controller(name: impl Into<String>) -> Self {
        Target::Controller { name: name.into() }
    }

    pub fn worker(identity: WorkerIdentity) -> Self {
        Target::Worker { identity }
    }

    /// Controller that receives the request
    pub fn controller_name(&self) -> &str {
        match self {
            Target::Controller { name } => name,
            Target::Worker { identity } => &identity.controller,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Controller { name } => write!(f, "controller {}", name),
            Target::Worker { identity } => write!(f, "worker {}", identity),
        }
    }
}

/// Second-phase decision for a prepared request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Commit,
    Rollback,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Commit => "commit",
            Decision::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Decision::Commit),
            "rollback" => Ok(Decision::Rollback),
            other => Err(crate::Error::InvalidOperation(format!(
                "unknown transaction decision: {}",
                other
            ))),
        }
    }
}

/// Delivers the decision for one prepared request and yields its final response
pub trait TransactionControl: Send {
    fn complete(self: Box<Self>, decision: Decision) -> BoxFuture<'static, Result<OperationResponse>>;
}

/// Outcome of the prepare step
pub struct PreparedTransaction {
    pub prepared: OperationResponse,
    pub control: Box<dyn TransactionControl>,
    pending: bool,
}

impl PreparedTransaction {
    pub fn new(prepared: OperationResponse, control: impl TransactionControl + 'static) -> Self {
        Self {
            prepared,
            control: Box::new(control),
            pending: true,
        }
    }

    /// A request the target finished on its own (forwarded or read-only work)
    pub fn completed(response: OperationResponse) -> Self {
        Self {
            prepared: response.clone(),
            control: Box::new(Completed(response)),
            pending: false,
        }
    }

    /// Does the target still hold state waiting for a decision?
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

impl fmt::Debug for PreparedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTransaction")
            .field("prepared", &self.prepared)
            .finish()
    }
}

/// Control for work that has nothing left to decide; either decision returns the
/// response as it was produced.
pub struct Completed(pub OperationResponse);

impl TransactionControl for Completed {
    fn complete(self: Box<Self>, _decision: Decision) -> BoxFuture<'static, Result<OperationResponse>> {
        future::ready(Ok(self.0)).boxed()
    }
}

/// Sends operations to controllers and the workers they supervise
pub trait Transport: Send + Sync {
    fn send(&self, target: Target, operation: Operation) -> BoxFuture<'static, Result<PreparedTransaction>>;
}
