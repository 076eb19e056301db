//! Shared fixture: a primary and two host controllers wired through the
//! in-process transport

#![allow(dead_code)]

use minidomain::common::{Config, PeerConfig};
use minidomain::model::{Address, InMemoryModel, Operation, Resource};
use minidomain::transport::LocalTransport;
use minidomain::worker::WorkerProcess;
use minidomain::Controller;
use serde_json::json;
use std::sync::Arc;

pub const PRIMARY: &str = "primary";

/// Domain layout shared by every controller:
/// - host `a` runs s1 (g1) and s2 (g2)
/// - host `b` runs s3 (g1)
/// - g1 uses profile `full`, g2 uses profile `other`
pub fn domain_model() -> Resource {
    Resource::new()
        .with_child(
            "profile",
            "full",
            Resource::new().with_child("subsystem", "web", Resource::new().with_attribute("port", 8080)),
        )
        .with_child(
            "profile",
            "other",
            Resource::new().with_child("subsystem", "web", Resource::new().with_attribute("port", 9090)),
        )
        .with_child(
            "socket-binding-group",
            "standard",
            Resource::new().with_attribute("default-interface", "public"),
        )
        .with_child(
            "server-group",
            "g1",
            Resource::new()
                .with_attribute("profile", "full")
                .with_attribute("socket-binding-group", "standard"),
        )
        .with_child(
            "server-group",
            "g2",
            Resource::new()
                .with_attribute("profile", "other")
                .with_attribute("socket-binding-group", "standard"),
        )
        .with_child(
            "host",
            "a",
            Resource::new()
                .with_child("server-config", "s1", Resource::new().with_attribute("group", "g1"))
                .with_child("server-config", "s2", Resource::new().with_attribute("group", "g2")),
        )
        .with_child(
            "host",
            "b",
            Resource::new().with_child("server-config", "s3", Resource::new().with_attribute("group", "g1")),
        )
}

pub struct Cluster {
    pub transport: Arc<LocalTransport>,
    pub primary: Arc<Controller>,
    pub a: Arc<Controller>,
    pub b: Arc<Controller>,
}

fn peer() -> PeerConfig {
    PeerConfig {
        url: "http://unused".into(),
        model_version: "2.0".into(),
    }
}

fn config(name: &str, peers: &[&str]) -> Config {
    let mut config = Config::default();
    config.controller.name = name.to_string();
    config.controller.primary = name == PRIMARY;
    if name != PRIMARY {
        config.controller.primary_name = Some(PRIMARY.to_string());
    }
    for p in peers {
        config.controller.peers.insert(p.to_string(), peer());
    }
    config.timeouts.blocking_timeout_ms = 2_000;
    config
}

fn controller(transport: &Arc<LocalTransport>, config: Config) -> Arc<Controller> {
    let model = Arc::new(InMemoryModel::new(domain_model()));
    let controller = Arc::new(Controller::new(config, model, transport.clone()).unwrap());
    transport.attach(&controller);
    controller.finish_boot().unwrap();
    controller
}

impl Cluster {
    pub fn start() -> Self {
        Self::start_with(|_, _| {})
    }

    /// Start the domain, letting `tune` adjust each controller's config first
    pub fn start_with(tune: impl Fn(&str, &mut Config)) -> Self {
        let transport = LocalTransport::new();
        let build = |name: &str, peers: &[&str]| {
            let mut config = config(name, peers);
            tune(name, &mut config);
            controller(&transport, config)
        };
        let primary = build(PRIMARY, &["a", "b"]);
        let a = build("a", &[PRIMARY]);
        let b = build("b", &[PRIMARY]);
        Self {
            transport,
            primary,
            a,
            b,
        }
    }

    pub fn worker(&self, host: &str, name: &str) -> Arc<WorkerProcess> {
        let controller = match host {
            "a" => &self.a,
            "b" => &self.b,
            other => panic!("no host {}", other),
        };
        controller.workers().get(name).unwrap()
    }

    /// Attribute `attr` of the resource at `address` in a worker's runtime tree
    pub fn worker_attr(&self, host: &str, worker: &str, address: &Address, attr: &str) -> serde_json::Value {
        self.worker(host, worker)
            .runtime()
            .navigate(address)
            .and_then(|r| r.attribute(attr).cloned())
            .unwrap_or(serde_json::Value::Null)
    }
}

pub fn write(address: Address, name: &str, value: serde_json::Value) -> Operation {
    Operation::simple("write-attribute", address)
        .with_param("name", name)
        .with_param("value", value)
}

pub fn web() -> Address {
    Address::of([("subsystem", "web")])
}

pub fn port(value: i64) -> serde_json::Value {
    json!(value)
}
