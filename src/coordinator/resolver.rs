//! Server-operation resolver
//!
//! Translates a change to a controller's configuration model into the
//! operations its workers must run to pick the change up. Settings that can be
//! re-applied live are forwarded with the address rewritten relative to the
//! worker; structural changes become `require-restart` or `require-reload`
//! markers. Workers receiving byte-identical operations are batched together.
//!
//! The resolver always looks at the model as it will be after the change, so
//! overrides and profile membership reflect the new configuration.

use crate::model::address::*;
use crate::model::domain::{self, Scope, PORT_OFFSET, PROFILE_ATTR, SOCKET_BINDING_GROUP_ATTR};
use crate::model::registry::{self, ADD, REMOVE, REQUIRE_RELOAD, REQUIRE_RESTART, UNDEFINE_ATTRIBUTE, WRITE_ATTRIBUTE};
use crate::model::{Address, Headers, Operation, Resource};
use crate::worker::{WorkerIdentity, WorkerStatus};
use std::collections::{BTreeMap, BTreeSet};

/// Worker operations keyed by the set of workers that receive each one
pub type ResolvedOperations = BTreeMap<BTreeSet<WorkerIdentity>, Operation>;

type Resolution = Vec<(WorkerIdentity, Operation)>;

pub struct ServerOperationResolver<'a> {
    model: &'a Resource,
    host: &'a str,
    workers: Vec<WorkerIdentity>,
}

impl<'a> ServerOperationResolver<'a> {
    /// `model` is the post-change tree, `workers` the local worker snapshot;
    /// stopped workers are ignored.
    pub fn new(
        model: &'a Resource,
        host: &'a str,
        workers: impl IntoIterator<Item = (WorkerIdentity, WorkerStatus)>,
    ) -> Self {
        let workers = workers
            .into_iter()
            .filter(|(_, status)| status.is_live())
            .map(|(identity, _)| identity)
            .collect();
        Self {
            model,
            host,
            workers,
        }
    }

    pub fn resolve(&self, op: &Operation) -> ResolvedOperations {
        let mut per_worker: BTreeMap<WorkerIdentity, Vec<Operation>> = BTreeMap::new();
        self.collect(op, &mut per_worker);
        batch(per_worker, op.headers())
    }

    fn collect(&self, op: &Operation, out: &mut BTreeMap<WorkerIdentity, Vec<Operation>>) {
        match op {
            Operation::Composite(composite) => {
                for step in &composite.steps {
                    self.collect(step, out);
                }
            }
            Operation::Simple(_) => {
                for (worker, worker_op) in self.resolve_simple(op) {
                    out.entry(worker).or_default().push(worker_op);
                }
            }
        }
    }

    fn resolve_simple(&self, op: &Operation) -> Resolution {
        let address = op.address();
        if address.is_worker_scoped() {
            return self.resolve_worker_scoped(op);
        }
        if registry::is_read_only(op.name()) && !op.headers().push_to_workers {
            return Vec::new();
        }

        match address.kind_at(0) {
            Some(EXTENSION) => self.each(self.live(), |_| Some(forward(op, address.clone()))),
            Some(PATH | SYSTEM_PROPERTY | INTERFACE) if address.len() == 1 => {
                self.shadowed(op, Scope::Domain, 0, self.live())
            }
            Some(PROFILE) => self.resolve_profile(op),
            Some(SOCKET_BINDING_GROUP) => self.resolve_socket_binding_group(op),
            Some(SERVER_GROUP) => self.resolve_server_group(op),
            Some(HOST) => self.resolve_host(op),
            Some(DEPLOYMENT) => self.resolve_group_content(op, DEPLOYMENT),
            Some(DEPLOYMENT_OVERLAY) => self.resolve_group_content(op, DEPLOYMENT_OVERLAY),
            // core-service, jvm at domain level and anything unknown stay on the controller
            _ => Vec::new(),
        }
    }

    fn live(&self) -> impl Iterator<Item = &WorkerIdentity> {
        self.workers.iter()
    }

    fn each<'w>(
        &self,
        workers: impl Iterator<Item = &'w WorkerIdentity>,
        f: impl Fn(&WorkerIdentity) -> Option<Operation>,
    ) -> Resolution {
        workers
            .filter_map(|w| f(w).map(|op| (w.clone(), op)))
            .collect()
    }

    /// `/host=h/server=s/...` addressed at one of our workers goes straight to it
    fn resolve_worker_scoped(&self, op: &Operation) -> Resolution {
        let address = op.address();
        let (Some(host), Some(server)) = (address.host(), address.get(1)) else {
            return Vec::new();
        };
        if host != self.host {
            return Vec::new();
        }
        self.each(
            self.live().filter(|w| w.worker == server.value),
            |_| Some(forward(op, address.skip(2))),
        )
    }

    /// Forward a scoped setting to every candidate that does not override it
    /// more narrowly. When a broader definition exists, an add replaces it and a
    /// remove restores it.
    fn shadowed<'w>(
        &self,
        op: &Operation,
        scope: Scope,
        prefix: usize,
        candidates: impl Iterator<Item = &'w WorkerIdentity>,
    ) -> Resolution {
        let address = op.address();
        let Some(seg) = address.get(prefix) else {
            return Vec::new();
        };
        let (kind, name) = (seg.kind.as_str(), seg.value.as_str());
        let local = address.skip(prefix);
        let scopes = domain::scopes_for(kind);

        self.each(candidates, |w| {
            let defined = |s: Scope| {
                domain::definition_at(self.model, s, &w.controller, &w.group, &w.worker, kind, name)
            };
            if scopes.iter().any(|s| *s > scope && defined(*s).is_some()) {
                return None;
            }
            let broader = scopes
                .iter()
                .rev()
                .filter(|s| **s < scope)
                .find_map(|s| defined(*s));
            Some(match (op.name(), broader) {
                (ADD, Some(_)) => Operation::composite(vec![
                    Operation::simple(REMOVE, local.clone()),
                    forward(op, local.clone()),
                ]),
                (REMOVE, Some(def)) => Operation::composite(vec![
                    forward(op, local.clone()),
                    add_from(local.clone(), def),
                ]),
                _ => forward(op, local.clone()),
            })
        })
    }

    fn resolve_profile(&self, op: &Operation) -> Resolution {
        let address = op.address();
        let Some(profile) = address.first().map(|s| s.value.as_str()) else {
            return Vec::new();
        };
        self.each(self.live(), |w| match domain::profile_set(self.model, &w.group) {
            None => {
                tracing::debug!("Profile set of group {} is undefined; {} must reload", w.group, w);
                Some(marker(REQUIRE_RELOAD))
            }
            Some(set) if set.iter().any(|p| p == profile) => {
                if address.len() == 1 {
                    Some(marker(REQUIRE_RELOAD))
                } else {
                    Some(forward(op, address.skip(1)))
                }
            }
            Some(_) => None,
        })
    }

    fn resolve_socket_binding_group(&self, op: &Operation) -> Resolution {
        let address = op.address();
        let Some(name) = address.first().map(|s| s.value.as_str()) else {
            return Vec::new();
        };
        self.each(self.live(), |w| {
            let effective =
                domain::effective_socket_binding_group(self.model, &w.controller, &w.worker)?;
            (effective == name).then(|| forward(op, address.clone()))
        })
    }

    fn resolve_server_group(&self, op: &Operation) -> Resolution {
        let address = op.address();
        let Some(group) = address.first().map(|s| s.value.as_str()) else {
            return Vec::new();
        };
        let members = || {
            self.live()
                .filter(move |w| group == WILDCARD || w.group == group)
        };

        if address.len() == 1 {
            return match attribute_written(op) {
                Some(PROFILE_ATTR) => self.each(members(), |_| Some(marker(REQUIRE_RELOAD))),
                Some(SOCKET_BINDING_GROUP_ATTR | PORT_OFFSET) => {
                    self.each(members(), |_| Some(marker(REQUIRE_RESTART)))
                }
                _ => Vec::new(),
            };
        }

        match address.kind_at(1) {
            Some(SYSTEM_PROPERTY) if address.len() == 2 => {
                self.shadowed(op, Scope::Group, 1, members())
            }
            Some(DEPLOYMENT) => {
                let deployment_op = self.group_deployment_op(op);
                self.each(members(), |_| Some(deployment_op.clone()))
            }
            Some(DEPLOYMENT_OVERLAY) => {
                self.each(members(), |_| Some(forward(op, address.skip(1))))
            }
            Some(JVM) => self.each(members(), |_| Some(marker(REQUIRE_RESTART))),
            _ => Vec::new(),
        }
    }

    /// A group deployment add carries the domain-wide content attributes along
    fn group_deployment_op(&self, op: &Operation) -> Operation {
        let address = op.address();
        let local = address.skip(1);
        let mut worker_op = forward(op, local);
        if op.name() == ADD && address.len() == 2 {
            if let (Some(seg), Operation::Simple(simple)) = (address.get(1), &mut worker_op) {
                if let Some(content) = self.model.child(DEPLOYMENT, &seg.value) {
                    for (k, v) in &content.attributes {
                        simple.params.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
        }
        worker_op
    }

    /// Domain-wide deployments and overlays reach the workers of every group that
    /// references them
    fn resolve_group_content(&self, op: &Operation, kind: &str) -> Resolution {
        let address = op.address();
        let Some(name) = address.first().map(|s| s.value.as_str()) else {
            return Vec::new();
        };
        let referencing: BTreeSet<&str> = self
            .model
            .children_of(SERVER_GROUP)
            .filter(|(_, g)| g.has_child(kind, name))
            .map(|(n, _)| n.as_str())
            .collect();
        self.each(
            self.live().filter(|w| referencing.contains(w.group.as_str())),
            |_| Some(forward(op, address.clone())),
        )
    }

    fn resolve_host(&self, op: &Operation) -> Resolution {
        let address = op.address();
        if address.host() != Some(self.host) {
            return Vec::new();
        }
        match address.kind_at(1) {
            Some(PATH | INTERFACE | SYSTEM_PROPERTY) if address.len() == 2 => {
                self.shadowed(op, Scope::Host, 1, self.live())
            }
            Some(JVM) => self.each(self.live(), |_| Some(marker(REQUIRE_RESTART))),
            Some(SERVER_CONFIG) => self.resolve_server_config(op),
            _ => Vec::new(),
        }
    }

    fn resolve_server_config(&self, op: &Operation) -> Resolution {
        let address = op.address();
        let Some(server) = address.get(1).map(|s| s.value.as_str()) else {
            return Vec::new();
        };
        let worker = || self.live().filter(move |w| w.worker == server);

        if address.len() == 2 {
            return match attribute_written(op) {
                Some(domain::GROUP) => self.each(worker(), |_| Some(marker(REQUIRE_RELOAD))),
                Some(SOCKET_BINDING_GROUP_ATTR | PORT_OFFSET) => {
                    self.each(worker(), |_| Some(marker(REQUIRE_RESTART)))
                }
                _ => Vec::new(),
            };
        }
        match address.kind_at(2) {
            Some(PATH | INTERFACE | SYSTEM_PROPERTY) if address.len() == 3 => {
                self.shadowed(op, Scope::Server, 2, worker())
            }
            Some(JVM) => self.each(worker(), |_| Some(marker(REQUIRE_RESTART))),
            _ => Vec::new(),
        }
    }
}

/// Attribute named by a write-attribute/undefine-attribute
fn attribute_written(op: &Operation) -> Option<&str> {
    match op.name() {
        WRITE_ATTRIBUTE | UNDEFINE_ATTRIBUTE => op.param_str("name"),
        _ => None,
    }
}

/// `op` at `address`, without coordinator headers
fn forward(op: &Operation, address: Address) -> Operation {
    let mut forwarded = op.readdressed(address);
    *forwarded.headers_mut() = Headers::default();
    forwarded
}

fn marker(name: &str) -> Operation {
    Operation::simple(name, Address::root())
}

fn add_from(address: Address, def: &Resource) -> Operation {
    def.attributes
        .iter()
        .fold(Operation::simple(ADD, address), |op, (k, v)| {
            op.with_param(k.clone(), v.clone())
        })
}

/// One operation per worker: a restart marker supersedes everything, then a
/// reload marker, otherwise the steps run as a composite.
fn collapse(mut ops: Vec<Operation>) -> Operation {
    if ops.iter().any(|o| o.name() == REQUIRE_RESTART) {
        return marker(REQUIRE_RESTART);
    }
    if ops.iter().any(|o| o.name() == REQUIRE_RELOAD) {
        return marker(REQUIRE_RELOAD);
    }
    match ops.len() {
        1 => ops.remove(0),
        _ => Operation::composite(ops),
    }
}

fn batch(per_worker: BTreeMap<WorkerIdentity, Vec<Operation>>, headers: &Headers) -> ResolvedOperations {
    let worker_headers = Headers {
        caller_type: headers.caller_type.clone(),
        domain_uuid: headers.domain_uuid.clone(),
        ..Default::default()
    };
    let mut by_encoding: BTreeMap<String, (BTreeSet<WorkerIdentity>, Operation)> = BTreeMap::new();
    for (worker, ops) in per_worker {
        if ops.is_empty() {
            continue;
        }
        let op = collapse(ops).with_headers(worker_headers.clone());
        by_encoding
            .entry(op.canonical())
            .or_insert_with(|| (BTreeSet::new(), op))
            .0
            .insert(worker);
    }
    by_encoding.into_values().collect()
}
