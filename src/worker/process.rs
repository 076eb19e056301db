//! A worker process: runtime tree, lifecycle state and two-phase apply

use crate::common::Result;
use crate::model::address::*;
use crate::model::domain::{self, Scope};
use crate::model::registry::{self, REQUIRE_RELOAD, REQUIRE_RESTART};
use crate::model::resource::Resource;
use crate::model::store::{InMemoryModel, ModelStore, StagedChange};
use crate::model::{Operation, OperationResponse};
use crate::worker::{WorkerIdentity, WorkerStatus};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct WorkerProcess {
    identity: WorkerIdentity,
    status: Mutex<WorkerStatus>,
    runtime: InMemoryModel,
    restart_required: Arc<AtomicBool>,
    reload_required: Arc<AtomicBool>,
}

impl WorkerProcess {
    /// A worker in the `Starting` state with the given runtime tree
    pub fn new(identity: WorkerIdentity, runtime: Resource) -> Self {
        Self {
            identity,
            status: Mutex::new(WorkerStatus::Starting),
            runtime: InMemoryModel::new(runtime),
            restart_required: Arc::new(AtomicBool::new(false)),
            reload_required: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: WorkerStatus) {
        tracing::info!("Worker {} is now {}", self.identity, status);
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn runtime(&self) -> Resource {
        self.runtime.snapshot()
    }

    pub fn restart_required(&self) -> bool {
        self.restart_required.load(Ordering::SeqCst)
    }

    pub fn reload_required(&self) -> bool {
        self.reload_required.load(Ordering::SeqCst)
    }

    /// Apply `op` to a staged copy of the runtime tree.
    ///
    /// The returned transaction must be committed or rolled back; markers only take
    /// effect on commit.
    pub async fn prepare(&self, op: Operation) -> (OperationResponse, WorkerTransaction) {
        let mut tx = WorkerTransaction {
            staged: None,
            restart: false,
            reload: false,
            restart_flag: self.restart_required.clone(),
            reload_flag: self.reload_required.clone(),
        };

        let status = self.status();
        if !status.accepts_operations() {
            let msg = format!("Worker {} is {} and cannot accept operations", self.identity, status);
            return (OperationResponse::failed(msg), tx);
        }

        let (remaining, restart, reload) = split_markers(op);
        tx.restart = restart;
        tx.reload = reload;

        let result = match remaining {
            Some(op) => match self.runtime.begin(op).await {
                Ok(staged) => {
                    let result = staged.result().clone();
                    tx.staged = Some(staged);
                    result
                }
                Err(e) => {
                    tracing::debug!("Worker {} rejected operation: {}", self.identity, e);
                    tx.restart = false;
                    tx.reload = false;
                    return (OperationResponse::from_error(&e), tx);
                }
            },
            None => Value::Null,
        };

        let mut response = OperationResponse::success(result);
        if restart {
            response.warnings.push(format!("{} requires a restart", self.identity));
        } else if reload {
            response.warnings.push(format!("{} requires a reload", self.identity));
        }
        (response, tx)
    }
}

/// Pull restart/reload markers out of an operation; whatever is left is applied to the tree
fn split_markers(op: Operation) -> (Option<Operation>, bool, bool) {
    match op {
        Operation::Simple(s) if s.name == REQUIRE_RESTART => (None, true, false),
        Operation::Simple(s) if s.name == REQUIRE_RELOAD => (None, false, true),
        Operation::Composite(mut c) => {
            let restart = c.steps.iter().any(|s| s.name() == REQUIRE_RESTART);
            let reload = c.steps.iter().any(|s| s.name() == REQUIRE_RELOAD);
            c.steps.retain(|s| !registry::is_marker(s.name()));
            let remaining = if c.steps.is_empty() {
                None
            } else {
                Some(Operation::Composite(c))
            };
            (remaining, restart, reload)
        }
        other => (Some(other), false, false),
    }
}

/// Staged worker change awaiting the coordinator's decision
pub struct WorkerTransaction {
    staged: Option<StagedChange>,
    restart: bool,
    reload: bool,
    restart_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
}

impl WorkerTransaction {
    pub fn commit(self) {
        if let Some(staged) = self.staged {
            staged.commit();
        }
        if self.restart {
            self.restart_flag.store(true, Ordering::SeqCst);
        }
        if self.reload {
            self.reload_flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn rollback(self) {
        if let Some(staged) = self.staged {
            staged.rollback();
        }
    }
}

/// Runtime tree a worker starts with, derived from the controller's model.
///
/// Settings are layered broadest first so that narrower definitions win.
pub fn runtime_model(root: &Resource, host_name: &str, server: &str) -> Result<Resource> {
    let sc = domain::server_config(root, host_name, server).ok_or_else(|| {
        crate::Error::NotFound(format!("/host={}/server-config={}", host_name, server))
    })?;
    let group = sc.attribute_str(domain::GROUP).ok_or_else(|| {
        crate::Error::InvalidOperation(format!("server-config {} has no group", server))
    })?;
    let group_res = domain::server_group(root, group)
        .ok_or_else(|| crate::Error::NotFound(format!("/server-group={}", group)))?;

    let mut runtime = Resource::new()
        .with_attribute("name", server)
        .with_attribute("server-group", group)
        .with_attribute("host", host_name);

    for (name, ext) in root.children_of(EXTENSION) {
        runtime = runtime.with_child(EXTENSION, name.clone(), ext.clone());
    }

    for kind in [SYSTEM_PROPERTY, PATH, INTERFACE] {
        for scope in domain::scopes_for(kind) {
            let source = match scope {
                Scope::Domain => Some(root),
                Scope::Group => Some(group_res),
                Scope::Host => domain::host(root, host_name),
                Scope::Server => Some(sc),
            };
            if let Some(source) = source {
                for (name, def) in source.children_of(kind) {
                    runtime = runtime.with_child(kind, name.clone(), def.clone());
                }
            }
        }
    }

    if let Some(profiles) = domain::profile_set(root, group) {
        for profile in profiles {
            if let Some(p) = root.child(PROFILE, &profile) {
                for (name, subsystem) in p.children_of(SUBSYSTEM) {
                    runtime = runtime.with_child(SUBSYSTEM, name.clone(), subsystem.clone());
                }
            }
        }
    }

    if let Some(sbg) = domain::effective_socket_binding_group(root, host_name, server) {
        if let Some(def) = root.child(SOCKET_BINDING_GROUP, &sbg) {
            runtime = runtime.with_child(SOCKET_BINDING_GROUP, sbg, def.clone());
        }
    }

    for (name, dep) in group_res.children_of(DEPLOYMENT) {
        let mut merged = root.child(DEPLOYMENT, name).cloned().unwrap_or_default();
        merged.attributes.extend(dep.attributes.clone());
        runtime = runtime.with_child(DEPLOYMENT, name.clone(), merged);
    }
    for (name, overlay) in group_res.children_of(DEPLOYMENT_OVERLAY) {
        runtime = runtime.with_child(DEPLOYMENT_OVERLAY, name.clone(), overlay.clone());
    }

    runtime.attributes.insert(
        "profiles".into(),
        json!(domain::profile_set(root, group).unwrap_or_default()),
    );
    Ok(runtime)
}
