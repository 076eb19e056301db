//! Controller facade
//!
//! A controller owns a configuration model, the workers it supervises and its
//! view of the domain topology. Operations enter through [`Controller::execute`];
//! transports deliver requests from other controllers through
//! [`Controller::handle_request`].

pub mod http;
pub mod server;

pub use server::ControllerServer;

use crate::common::audit::{AuditEventType, AUDIT_LOGGER};
use crate::common::{Config, Error, ModelVersion, Result, TimeoutConfig};
use crate::coordinator::context::Interrupt;
use crate::coordinator::engine::{PlanExecutor, RolloutEngine};
use crate::coordinator::transform::TransformerRegistry;
use crate::coordinator::{dispatcher, resolver_step};
use crate::model::domain::{self, AUTO_START};
use crate::model::{ModelStore, Operation, OperationResponse, StagedChange};
use crate::transport::{Decision, PreparedTransaction, Target, TransactionControl, Transport};
use crate::worker::process::WorkerTransaction;
use crate::worker::{runtime_model, WorkerIdentity, WorkerProcess, WorkerRegistry, WorkerStatus};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard, Semaphore};

/// Controllers known to this one and the model version each speaks
pub struct Topology {
    controllers: RwLock<BTreeMap<String, ModelVersion>>,
    write_lock: Mutex<()>,
}

impl Topology {
    fn new(controllers: BTreeMap<String, ModelVersion>) -> Self {
        Self {
            controllers: RwLock::new(controllers),
            write_lock: Mutex::new(()),
        }
    }

    /// Held for the whole of an operation spanning every controller, and while
    /// controllers join or leave
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn version_of(&self, name: &str) -> Option<ModelVersion> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    fn insert(&self, name: &str, version: ModelVersion) {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), version);
    }

    fn remove(&self, name: &str) -> bool {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}

pub struct Controller {
    config: Config,
    version: ModelVersion,
    model: Arc<dyn ModelStore>,
    workers: WorkerRegistry,
    topology: Topology,
    transport: Arc<dyn Transport>,
    transformers: TransformerRegistry,
    engine: Arc<dyn RolloutEngine>,
    booting: AtomicBool,
    worker_permits: Semaphore,
}

impl Controller {
    pub fn new(config: Config, model: Arc<dyn ModelStore>, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let version = ModelVersion::parse(&config.controller.model_version)?;
        let mut controllers = BTreeMap::new();
        controllers.insert(config.controller.name.clone(), version);
        for (name, peer) in &config.controller.peers {
            controllers.insert(name.clone(), ModelVersion::parse(&peer.model_version)?);
        }
        let transformers = TransformerRegistry::new(&config.transformers)?;
        let worker_permits = Semaphore::new(config.timeouts.max_concurrent_worker_requests);
        Ok(Self {
            version,
            model,
            workers: WorkerRegistry::new(),
            topology: Topology::new(controllers),
            transport,
            transformers,
            engine: Arc::new(PlanExecutor),
            booting: AtomicBool::new(true),
            worker_permits,
            config,
        })
    }

    /// Replace the rollout engine
    pub fn with_rollout_engine(mut self, engine: Arc<dyn RolloutEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.controller.name
    }

    pub fn is_primary(&self) -> bool {
        self.config.controller.primary
    }

    /// The primary's name, or `None` if this is the primary
    pub fn primary_name(&self) -> Option<&str> {
        if self.is_primary() {
            None
        } else {
            Some(self.config.controller.primary_name.as_deref().unwrap_or("unknown"))
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.config.timeouts
    }

    pub fn model(&self) -> &Arc<dyn ModelStore> {
        &self.model
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn known_controllers(&self) -> BTreeSet<String> {
        self.topology.names()
    }

    /// Model version spoken by `name`; unknown controllers are assumed current
    pub fn model_version_of(&self, name: &str) -> ModelVersion {
        self.topology.version_of(name).unwrap_or(self.version)
    }

    pub fn transformers(&self) -> &TransformerRegistry {
        &self.transformers
    }

    pub fn rollout_engine(&self) -> &dyn RolloutEngine {
        self.engine.as_ref()
    }

    pub fn worker_permits(&self) -> &Semaphore {
        &self.worker_permits
    }

    pub fn is_booting(&self) -> bool {
        self.booting.load(Ordering::SeqCst)
    }

    /// Leave boot mode and launch every auto-start worker of this host
    pub fn finish_boot(&self) -> Result<()> {
        self.booting.store(false, Ordering::SeqCst);
        let root = self.model.snapshot();
        for sc in domain::server_configs(&root, self.name()) {
            let auto_start = domain::server_config(&root, self.name(), &sc.name)
                .and_then(|r| r.attribute(AUTO_START))
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if auto_start {
                self.launch_worker(&sc.name)?;
            }
        }
        tracing::info!("Controller {} booted with {} worker(s)", self.name(), self.workers.len());
        Ok(())
    }

    pub async fn register_controller(&self, name: &str, version: ModelVersion) {
        let _guard = self.topology.lock().await;
        self.topology.insert(name, version);
        tracing::info!("Registered controller {} (model {})", name, version);
        AUDIT_LOGGER.log_event(
            AuditEventType::ControllerRegistered,
            None,
            Some(name.to_string()),
            format!("model {}", version),
            None,
        );
    }

    pub async fn unregister_controller(&self, name: &str) -> bool {
        let _guard = self.topology.lock().await;
        let removed = self.topology.remove(name);
        if removed {
            tracing::info!("Unregistered controller {}", name);
            AUDIT_LOGGER.log_event(
                AuditEventType::ControllerUnregistered,
                None,
                Some(name.to_string()),
                "left the domain",
                None,
            );
        }
        removed
    }

    /// Register worker `name` from its server-config; it stays `Starting`
    /// until [`Controller::worker_started`]
    pub fn start_worker(&self, name: &str) -> Result<Arc<WorkerProcess>> {
        let root = self.model.snapshot();
        let runtime = runtime_model(&root, self.name(), name)?;
        let group = domain::server_config(&root, self.name(), name)
            .and_then(|sc| sc.attribute_str(domain::GROUP))
            .unwrap_or_default()
            .to_string();
        let identity = WorkerIdentity::new(self.name(), group, name);
        tracing::info!("Starting worker {}", identity);
        Ok(self.workers.register(WorkerProcess::new(identity, runtime)))
    }

    pub fn worker_started(&self, name: &str) -> Result<()> {
        let worker = self
            .workers
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("worker {}", name)))?;
        worker.set_status(WorkerStatus::Running);
        Ok(())
    }

    /// Start a worker and mark it running
    pub fn launch_worker(&self, name: &str) -> Result<Arc<WorkerProcess>> {
        let worker = self.start_worker(name)?;
        worker.set_status(WorkerStatus::Running);
        Ok(worker)
    }

    pub fn stop_worker(&self, name: &str) -> bool {
        self.workers.stop(name)
    }

    /// Execute a management operation
    pub async fn execute(self: &Arc<Self>, op: Operation) -> OperationResponse {
        dispatcher::execute(self, op, Interrupt::never()).await
    }

    /// Execute a management operation that `interrupt` may cut short
    pub async fn execute_with_interrupt(self: &Arc<Self>, op: Operation, interrupt: Interrupt) -> OperationResponse {
        dispatcher::execute(self, op, interrupt).await
    }

    /// Deliver a request to `target`: this controller's own workers directly,
    /// everything else over the transport
    pub fn send_request(
        self: &Arc<Self>,
        target: Target,
        operation: Operation,
    ) -> BoxFuture<'static, Result<PreparedTransaction>> {
        match &target {
            Target::Worker { identity } if identity.controller == self.name() => {
                self.handle_request(target, operation)
            }
            _ => self.transport.send(target, operation),
        }
    }

    /// Serve a request sent by another controller (or by this one to its own
    /// workers). Delegated coordinator requests are held prepared until the
    /// coordinator decides.
    pub fn handle_request(
        self: &Arc<Self>,
        target: Target,
        operation: Operation,
    ) -> BoxFuture<'static, Result<PreparedTransaction>> {
        let controller = self.clone();
        async move {
            match target {
                Target::Worker { identity } => {
                    let worker = controller
                        .workers
                        .get(&identity.worker)
                        .ok_or_else(|| Error::NotFound(format!("worker {}", identity)))?;
                    let (prepared, tx) = worker.prepare(operation).await;
                    let control = WorkerControl {
                        prepared: prepared.clone(),
                        tx,
                    };
                    Ok(PreparedTransaction::new(prepared, control))
                }
                Target::Controller { name } if name != controller.name() => Err(Error::UnknownController(name)),
                Target::Controller { .. } if operation.headers().execute_for_coordinator => {
                    match resolver_step::apply(&controller, &operation).await {
                        Ok(change) => {
                            let prepared = resolver_step::prepared_payload(&change);
                            Ok(PreparedTransaction::new(prepared, StagedControl { staged: change.staged }))
                        }
                        Err(e) => {
                            tracing::warn!("{} failed to prepare {}: {}", controller.name(), operation, e);
                            Ok(PreparedTransaction::completed(OperationResponse::from_error(&e)))
                        }
                    }
                }
                Target::Controller { .. } => {
                    let response = controller.execute(operation).await;
                    Ok(PreparedTransaction::completed(response))
                }
            }
        }
        .boxed()
    }
}

/// Decision for a model change staged on behalf of a coordinator
struct StagedControl {
    staged: StagedChange,
}

impl TransactionControl for StagedControl {
    fn complete(self: Box<Self>, decision: Decision) -> BoxFuture<'static, Result<OperationResponse>> {
        let response = match decision {
            Decision::Commit => {
                let response = OperationResponse::success(self.staged.result().clone());
                self.staged.commit();
                response
            }
            Decision::Rollback => {
                self.staged.rollback();
                OperationResponse::rolled_back_result()
            }
        };
        futures_util::future::ready(Ok(response)).boxed()
    }
}

struct WorkerControl {
    prepared: OperationResponse,
    tx: WorkerTransaction,
}

impl TransactionControl for WorkerControl {
    fn complete(self: Box<Self>, decision: Decision) -> BoxFuture<'static, Result<OperationResponse>> {
        let response = match decision {
            Decision::Commit => {
                self.tx.commit();
                self.prepared
            }
            Decision::Rollback => {
                self.tx.rollback();
                OperationResponse::rolled_back_result()
            }
        };
        futures_util::future::ready(Ok(response)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PeerConfig;
    use crate::model::{Address, InMemoryModel, Resource};
    use crate::transport::LocalTransport;
    use serde_json::json;

    fn model() -> Resource {
        Resource::new()
            .with_child("profile", "full", Resource::new())
            .with_child("server-group", "g1", Resource::new().with_attribute("profile", "full"))
            .with_child(
                "host",
                "a",
                Resource::new()
                    .with_child("server-config", "s1", Resource::new().with_attribute("group", "g1"))
                    .with_child(
                        "server-config",
                        "s2",
                        Resource::new()
                            .with_attribute("group", "g1")
                            .with_attribute(AUTO_START, false),
                    ),
            )
    }

    fn controller(name: &str, primary: bool) -> Arc<Controller> {
        let mut config = Config::default();
        config.controller.name = name.to_string();
        config.controller.primary = primary;
        if !primary {
            config.controller.primary_name = Some("dc".into());
            config.controller.peers.insert(
                "dc".into(),
                PeerConfig {
                    url: "http://dc".into(),
                    model_version: "1.4".into(),
                },
            );
        }
        let model = Arc::new(InMemoryModel::new(model()));
        Arc::new(Controller::new(config, model, LocalTransport::new()).unwrap())
    }

    #[tokio::test]
    async fn test_boot_launches_auto_start_workers() {
        let controller = controller("a", false);
        assert!(controller.is_booting());
        controller.finish_boot().unwrap();
        assert!(!controller.is_booting());
        assert_eq!(controller.workers().status_of("s1"), WorkerStatus::Running);
        assert_eq!(controller.workers().status_of("s2"), WorkerStatus::Stopped);
        assert_eq!(controller.workers().get("s1").unwrap().identity().group, "g1");
    }

    #[tokio::test]
    async fn test_starting_worker_lifecycle() {
        let controller = controller("a", false);
        controller.finish_boot().unwrap();
        controller.start_worker("s2").unwrap();
        assert_eq!(controller.workers().status_of("s2"), WorkerStatus::Starting);
        controller.worker_started("s2").unwrap();
        assert_eq!(controller.workers().status_of("s2"), WorkerStatus::Running);
        assert!(controller.stop_worker("s2"));
        assert!(controller.start_worker("missing").is_err());
        assert!(controller.worker_started("missing").is_err());
    }

    #[tokio::test]
    async fn test_topology_registration() {
        let controller = controller("dc", true);
        assert_eq!(controller.primary_name(), None);
        assert_eq!(controller.known_controllers(), BTreeSet::from(["dc".to_string()]));

        controller.register_controller("b", ModelVersion::new(1, 2)).await;
        assert!(controller.known_controllers().contains("b"));
        assert_eq!(controller.model_version_of("b"), ModelVersion::new(1, 2));
        // Unknown controllers are assumed to speak our version
        assert_eq!(controller.model_version_of("zz"), ModelVersion::new(2, 0));

        assert!(controller.unregister_controller("b").await);
        assert!(!controller.unregister_controller("b").await);
    }

    #[tokio::test]
    async fn test_peer_versions_from_config() {
        let controller = controller("a", false);
        assert_eq!(controller.primary_name(), Some("dc"));
        assert_eq!(controller.model_version_of("dc"), ModelVersion::new(1, 4));
    }

    #[tokio::test]
    async fn test_delegated_request_is_held_until_decided() {
        let controller = controller("dc", true);
        controller.finish_boot().unwrap();
        let mut op = Operation::simple("add", Address::of([("path", "data")])).with_param("path", "/data");
        op.headers_mut().execute_for_coordinator = true;

        let tx = controller.handle_request(Target::controller("dc"), op).await.unwrap();
        assert!(tx.is_pending());
        assert!(tx.prepared.is_success());
        assert!(controller.model().snapshot().child("path", "data").is_none());

        let final_result = tx.control.complete(Decision::Commit).await.unwrap();
        assert!(final_result.is_success());
        let committed = controller.model().snapshot();
        assert_eq!(
            committed.child("path", "data").and_then(|p| p.attribute("path")),
            Some(&json!("/data"))
        );
    }

    #[tokio::test]
    async fn test_request_for_another_controller() {
        let controller = controller("dc", true);
        let op = Operation::simple("read-resource", Address::root());
        let res = controller.handle_request(Target::controller("elsewhere"), op).await;
        assert!(matches!(res, Err(Error::UnknownController(_))));
    }
}
