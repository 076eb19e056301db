//! Operation documents
//!
//! An operation is either a single named action on an address, or a composite
//! made of nested steps that must succeed or fail together.

use crate::model::address::Address;
use crate::model::plan::RolloutPlan;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const COMPOSITE: &str = "composite";

/// Flags carried alongside an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    /// The coordinator is delegating this operation to a subordinate controller
    #[serde(default, skip_serializing_if = "is_false")]
    pub execute_for_coordinator: bool,
    /// Forward to workers even if the operation is read-only
    #[serde(default, skip_serializing_if = "is_false")]
    pub push_to_workers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_type: Option<String>,
    /// Correlates every request fanned out for one top-level operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_plan: Option<RolloutPlan>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleOperation {
    pub name: String,
    #[serde(default)]
    pub address: Address,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeOperation {
    pub steps: Vec<Operation>,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Simple(SimpleOperation),
    Composite(CompositeOperation),
}

impl Operation {
    pub fn simple(name: impl Into<String>, address: Address) -> Self {
        Operation::Simple(SimpleOperation {
            name: name.into(),
            address,
            params: BTreeMap::new(),
            headers: Headers::default(),
        })
    }

    pub fn composite(steps: Vec<Operation>) -> Self {
        Operation::Composite(CompositeOperation {
            steps,
            headers: Headers::default(),
        })
    }

    /// Builder: add a parameter (no-op on composites)
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Operation::Simple(op) = &mut self {
            op.params.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        *self.headers_mut() = headers;
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Operation::Simple(op) => &op.name,
            Operation::Composite(_) => COMPOSITE,
        }
    }

    /// Composites always live at the root address
    pub fn address(&self) -> &Address {
        static ROOT: once_cell::sync::Lazy<Address> = once_cell::sync::Lazy::new(Address::root);
        match self {
            Operation::Simple(op) => &op.address,
            Operation::Composite(_) => &ROOT,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Operation::Simple(op) => &op.headers,
            Operation::Composite(op) => &op.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Operation::Simple(op) => &mut op.headers,
            Operation::Composite(op) => &mut op.headers,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        match self {
            Operation::Simple(op) => op.params.get(key),
            Operation::Composite(_) => None,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Operation::Composite(_))
    }

    pub fn steps(&self) -> &[Operation] {
        match self {
            Operation::Simple(_) => &[],
            Operation::Composite(op) => &op.steps,
        }
    }

    /// Same operation at a different address (composites are returned unchanged)
    pub fn readdressed(&self, address: Address) -> Self {
        match self {
            Operation::Simple(op) => Operation::Simple(SimpleOperation {
                address,
                ..op.clone()
            }),
            Operation::Composite(_) => self.clone(),
        }
    }

    /// Stable encoding used to batch workers receiving identical operations
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Simple(op) => write!(f, "{}:{}", op.address, op.name),
            Operation::Composite(op) => write!(f, "composite[{} steps]", op.steps.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_round_trip_shape() {
        let op = Operation::simple(
            "write-attribute",
            Address::of([("profile", "full"), ("subsystem", "web")]),
        )
        .with_param("name", "x")
        .with_param("value", 5);

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "simple");
        assert_eq!(json["address"][0]["kind"], "profile");
        assert_eq!(json["params"]["value"], 5);

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_composite_accessors() {
        let op = Operation::composite(vec![
            Operation::simple("add", Address::of([("path", "logs")])),
            Operation::simple("remove", Address::of([("path", "tmp")])),
        ]);
        assert_eq!(op.name(), COMPOSITE);
        assert!(op.address().is_empty());
        assert_eq!(op.steps().len(), 2);
        assert!(op.param("name").is_none());
    }

    #[test]
    fn test_canonical_is_stable() {
        let a = Operation::simple("add", Address::root())
            .with_param("b", json!(1))
            .with_param("a", json!(2));
        let b = Operation::simple("add", Address::root())
            .with_param("a", json!(2))
            .with_param("b", json!(1));
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_headers_skip_defaults() {
        let op = Operation::simple("read-resource", Address::root());
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["headers"], json!({}));
    }
}
