//! Model-apply contract and the in-memory configuration model
//!
//! Writes are staged: the operation is applied to a private copy of the tree
//! while the model's write permit is held, and the copy only replaces the live
//! tree on commit. Dropping or rolling back a staged change discards the copy
//! and releases the permit.

use crate::common::Result;
use crate::model::operation::Operation;
use crate::model::registry;
use crate::model::resource::Resource;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Applies operations to a controller's configuration tree
pub trait ModelStore: Send + Sync {
    /// Current committed tree
    fn snapshot(&self) -> Resource;

    /// Apply `op` to a private copy and hold it until commit or rollback
    fn begin(&self, op: Operation) -> BoxFuture<'static, Result<StagedChange>>;
}

/// A change applied to a copy of the model, awaiting the commit/rollback decision
pub struct StagedChange {
    result: Value,
    view: Resource,
    dirty: bool,
    target: Arc<RwLock<Resource>>,
    _permit: Option<OwnedMutexGuard<()>>,
}

impl StagedChange {
    /// Operation result as computed against the staged copy
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Model as it will look after commit
    pub fn model(&self) -> &Resource {
        &self.view
    }

    pub fn is_write(&self) -> bool {
        self.dirty
    }

    pub fn commit(self) {
        if self.dirty {
            *self.target.write().unwrap_or_else(PoisonError::into_inner) = self.view;
        }
    }

    pub fn rollback(self) {
        tracing::debug!("Discarding staged model change");
    }
}

impl std::fmt::Debug for StagedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedChange")
            .field("result", &self.result)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Configuration tree kept in memory, one writer at a time
#[derive(Clone)]
pub struct InMemoryModel {
    tree: Arc<RwLock<Resource>>,
    write_permit: Arc<Mutex<()>>,
}

impl InMemoryModel {
    pub fn new(root: Resource) -> Self {
        Self {
            tree: Arc::new(RwLock::new(root)),
            write_permit: Arc::new(Mutex::new(())),
        }
    }

    /// Load a tree from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let root: Resource = serde_json::from_slice(&bytes)?;
        Ok(Self::new(root))
    }
}

fn is_read_only(op: &Operation) -> bool {
    match op {
        Operation::Simple(s) => registry::is_read_only(&s.name),
        Operation::Composite(c) => c.steps.iter().all(is_read_only),
    }
}

impl ModelStore for InMemoryModel {
    fn snapshot(&self) -> Resource {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self, op: Operation) -> BoxFuture<'static, Result<StagedChange>> {
        let tree = self.tree.clone();
        let write_permit = self.write_permit.clone();
        async move {
            let read_only = is_read_only(&op);
            let permit = if read_only {
                None
            } else {
                Some(write_permit.lock_owned().await)
            };
            let mut view = tree.read().unwrap_or_else(PoisonError::into_inner).clone();
            let result = view.apply(&op)?;
            Ok(StagedChange {
                result,
                view,
                dirty: !read_only,
                target: tree,
                _permit: permit,
            })
        }
        .boxed()
    }
}
