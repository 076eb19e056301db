//! In-process transport between controllers sharing one runtime
//!
//! Used by tests and single-process domains. Faults can be injected per
//! controller to exercise unreachable or slow peers.

use crate::common::{Error, Result};
use crate::controller::Controller;
use crate::model::Operation;
use crate::transport::{PreparedTransaction, Target, Transport};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Simulated network condition for one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every request fails to connect
    Unreachable,
    /// Requests are delivered after a delay
    Delay(Duration),
}

#[derive(Default)]
pub struct LocalTransport {
    controllers: RwLock<BTreeMap<String, Weak<Controller>>>,
    faults: RwLock<BTreeMap<String, Fault>>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `controller` reachable under its name
    pub fn attach(&self, controller: &Arc<Controller>) {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(controller.name().to_string(), Arc::downgrade(controller));
    }

    pub fn detach(&self, name: &str) {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn inject_fault(&self, name: &str, fault: Fault) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), fault);
    }

    pub fn clear_fault(&self, name: &str) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn lookup(&self, name: &str) -> Option<Arc<Controller>> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(Weak::upgrade)
    }

    fn fault_for(&self, name: &str) -> Option<Fault> {
        self.faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

impl Transport for LocalTransport {
    fn send(&self, target: Target, operation: Operation) -> BoxFuture<'static, Result<PreparedTransaction>> {
        let name = target.controller_name().to_string();
        let controller = self.lookup(&name);
        let fault = self.fault_for(&name);
        async move {
            match fault {
                Some(Fault::Unreachable) => {
                    return Err(Error::ConnectionFailed(format!("{} is unreachable", name)))
                }
                Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
                None => {}
            }
            let controller = controller
                .ok_or_else(|| Error::ConnectionFailed(format!("{} is not connected", name)))?;
            controller.handle_request(target, operation).await
        }
        .boxed()
    }
}
