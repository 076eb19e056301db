//! Generic configuration resource tree
//!
//! Every node carries a flat attribute map and its children grouped by kind.
//! Both the controllers' configuration model and each worker's runtime model
//! are trees of this shape.

use crate::common::{Error, Result};
use crate::model::address::Address;
use crate::model::operation::Operation;
use crate::model::registry;
use crate::model::response::OperationResponse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const ENABLED: &str = "enabled";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, BTreeMap<String, Resource>>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(
        mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        child: Resource,
    ) -> Self {
        self.children
            .entry(kind.into())
            .or_default()
            .insert(name.into(), child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn child(&self, kind: &str, name: &str) -> Option<&Resource> {
        self.children.get(kind).and_then(|c| c.get(name))
    }

    pub fn has_child(&self, kind: &str, name: &str) -> bool {
        self.child(kind, name).is_some()
    }

    /// Children of one kind, by name
    pub fn children_of(&self, kind: &str) -> impl Iterator<Item = (&String, &Resource)> {
        self.children.get(kind).into_iter().flat_map(|c| c.iter())
    }

    pub fn navigate(&self, address: &Address) -> Option<&Resource> {
        let mut current = self;
        for seg in address.segments() {
            current = current.child(&seg.kind, &seg.value)?;
        }
        Some(current)
    }

    pub fn navigate_mut(&mut self, address: &Address) -> Option<&mut Resource> {
        let mut current = self;
        for seg in address.segments() {
            current = current.children.get_mut(&seg.kind)?.get_mut(&seg.value)?;
        }
        Some(current)
    }

    /// Render as a JSON document; without `recursive` children are listed by name only
    pub fn to_value(&self, recursive: bool) -> Value {
        let mut map: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (kind, children) in &self.children {
            let rendered: Map<String, Value> = children
                .iter()
                .map(|(name, child)| {
                    let value = if recursive {
                        child.to_value(true)
                    } else {
                        Value::Null
                    };
                    (name.clone(), value)
                })
                .collect();
            map.insert(kind.clone(), Value::Object(rendered));
        }
        Value::Object(map)
    }

    /// Apply `op` to this tree. A composite is all-or-nothing.
    pub fn apply(&mut self, op: &Operation) -> Result<Value> {
        match op {
            Operation::Composite(composite) => {
                let mut staged = self.clone();
                let mut results = Map::new();
                for (i, step) in composite.steps.iter().enumerate() {
                    let result = staged.apply(step).map_err(|e| {
                        Error::InvalidOperation(format!("step-{} ({}) failed: {}", i + 1, step, e))
                    })?;
                    let step_response = serde_json::to_value(OperationResponse::success(result))?;
                    results.insert(format!("step-{}", i + 1), step_response);
                }
                *self = staged;
                Ok(Value::Object(results))
            }
            Operation::Simple(simple) => self.apply_simple(&simple.name, &simple.address, op),
        }
    }

    fn apply_simple(&mut self, name: &str, address: &Address, op: &Operation) -> Result<Value> {
        match name {
            registry::ADD => {
                let last = address.last().ok_or_else(|| {
                    Error::InvalidOperation("cannot add the root resource".into())
                })?;
                let parent = self
                    .navigate_mut(&address.parent())
                    .ok_or_else(|| Error::NotFound(address.parent().to_string()))?;
                let siblings = parent.children.entry(last.kind.clone()).or_default();
                if siblings.contains_key(&last.value) {
                    return Err(Error::Duplicate(address.to_string()));
                }
                let mut child = Resource::new();
                if let Operation::Simple(simple) = op {
                    child.attributes = simple.params.clone();
                }
                siblings.insert(last.value.clone(), child);
                Ok(Value::Null)
            }
            registry::REMOVE => {
                let last = address.last().ok_or_else(|| {
                    Error::InvalidOperation("cannot remove the root resource".into())
                })?;
                let parent = self
                    .navigate_mut(&address.parent())
                    .ok_or_else(|| Error::NotFound(address.to_string()))?;
                let removed = parent
                    .children
                    .get_mut(&last.kind)
                    .and_then(|c| c.remove(&last.value));
                if removed.is_none() {
                    return Err(Error::NotFound(address.to_string()));
                }
                if parent.children.get(&last.kind).is_some_and(|c| c.is_empty()) {
                    parent.children.remove(&last.kind);
                }
                Ok(Value::Null)
            }
            registry::WRITE_ATTRIBUTE => {
                let attr = required_str(op, "name")?;
                let value = op.param("value").cloned().unwrap_or(Value::Null);
                let target = self.navigate_existing_mut(address)?;
                if value.is_null() {
                    target.attributes.remove(attr);
                } else {
                    target.attributes.insert(attr.to_string(), value);
                }
                Ok(Value::Null)
            }
            registry::UNDEFINE_ATTRIBUTE => {
                let attr = required_str(op, "name")?;
                self.navigate_existing_mut(address)?.attributes.remove(attr);
                Ok(Value::Null)
            }
            registry::READ_RESOURCE => {
                let recursive = op
                    .param("recursive")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(self.navigate_existing(address)?.to_value(recursive))
            }
            registry::READ_ATTRIBUTE => {
                let attr = required_str(op, "name")?;
                Ok(self
                    .navigate_existing(address)?
                    .attribute(attr)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            registry::READ_CHILDREN_NAMES => {
                let kind = required_str(op, "child-type")?;
                let names: Vec<&String> = self
                    .navigate_existing(address)?
                    .children_of(kind)
                    .map(|(n, _)| n)
                    .collect();
                Ok(json!(names))
            }
            registry::NO_OP => Ok(Value::Null),
            registry::READ_CHILDREN_TYPES => {
                let kinds: Vec<&String> = self.navigate_existing(address)?.children.keys().collect();
                Ok(json!(kinds))
            }
            registry::READ_OPERATION_NAMES => {
                self.navigate_existing(address)?;
                let mut names: Vec<&str> = registry::GLOBAL_OPERATIONS.to_vec();
                if address.kind_at(address.len().saturating_sub(1)) == Some("deployment") {
                    names.extend([registry::DEPLOY, registry::UNDEPLOY, registry::REDEPLOY]);
                }
                Ok(json!(names))
            }
            registry::DEPLOY | registry::UNDEPLOY => {
                let enabled = name == registry::DEPLOY;
                self.navigate_existing_mut(address)?
                    .attributes
                    .insert(ENABLED.to_string(), Value::Bool(enabled));
                Ok(Value::Null)
            }
            registry::REDEPLOY => {
                let target = self.navigate_existing(address)?;
                if target.attribute(ENABLED) != Some(&Value::Bool(true)) {
                    return Err(Error::InvalidOperation(format!(
                        "{} is not deployed",
                        address
                    )));
                }
                Ok(Value::Null)
            }
            other => Err(Error::InvalidOperation(format!(
                "operation {} is not supported at {}",
                other, address
            ))),
        }
    }

    fn navigate_existing(&self, address: &Address) -> Result<&Resource> {
        self.navigate(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    fn navigate_existing_mut(&mut self, address: &Address) -> Result<&mut Resource> {
        self.navigate_mut(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }
}

fn required_str<'a>(op: &'a Operation, key: &str) -> Result<&'a str> {
    op.param_str(key).ok_or_else(|| {
        Error::InvalidOperation(format!("{} requires parameter '{}'", op.name(), key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Resource {
        Resource::new()
            .with_child(
                "profile",
                "full",
                Resource::new().with_child("subsystem", "web", Resource::new()),
            )
            .with_child(
                "server-group",
                "g1",
                Resource::new().with_attribute("profile", "full"),
            )
    }

    #[test]
    fn test_add_and_remove() {
        let mut root = sample();
        let addr = Address::of([("path", "logs")]);
        root.apply(&Operation::simple("add", addr.clone()).with_param("path", "/var/log"))
            .unwrap();
        assert_eq!(
            root.navigate(&addr).unwrap().attribute_str("path"),
            Some("/var/log")
        );

        let dup = root.apply(&Operation::simple("add", addr.clone()));
        assert!(matches!(dup, Err(Error::Duplicate(_))));

        root.apply(&Operation::simple("remove", addr.clone())).unwrap();
        assert!(root.navigate(&addr).is_none());
        assert!(!root.children.contains_key("path"));
    }

    #[test]
    fn test_add_requires_parent() {
        let mut root = sample();
        let res = root.apply(&Operation::simple(
            "add",
            Address::of([("profile", "missing"), ("subsystem", "web")]),
        ));
        assert!(matches!(res, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_write_and_read_attribute() {
        let mut root = sample();
        let addr = Address::of([("profile", "full"), ("subsystem", "web")]);
        root.apply(
            &Operation::simple("write-attribute", addr.clone())
                .with_param("name", "x")
                .with_param("value", 42),
        )
        .unwrap();
        let read = root
            .apply(&Operation::simple("read-attribute", addr.clone()).with_param("name", "x"))
            .unwrap();
        assert_eq!(read, json!(42));

        root.apply(&Operation::simple("undefine-attribute", addr.clone()).with_param("name", "x"))
            .unwrap();
        assert!(root.navigate(&addr).unwrap().attribute("x").is_none());
    }

    #[test]
    fn test_composite_is_atomic() {
        let mut root = sample();
        let op = Operation::composite(vec![
            Operation::simple("add", Address::of([("path", "a")])),
            Operation::simple("remove", Address::of([("path", "missing")])),
        ]);
        assert!(root.apply(&op).is_err());
        assert!(root.navigate(&Address::of([("path", "a")])).is_none());

        let ok = Operation::composite(vec![
            Operation::simple("add", Address::of([("path", "a")])),
            Operation::simple("add", Address::of([("path", "b")])),
        ]);
        let result = root.apply(&ok).unwrap();
        assert_eq!(result["step-2"]["outcome"], "success");
        assert!(root.navigate(&Address::of([("path", "b")])).is_some());
    }

    #[test]
    fn test_read_children_names() {
        let mut root = sample();
        let names = root
            .apply(
                &Operation::simple("read-children-names", Address::root())
                    .with_param("child-type", "server-group"),
            )
            .unwrap();
        assert_eq!(names, json!(["g1"]));
    }

    #[test]
    fn test_deploy_undeploy() {
        let mut root = Resource::new().with_child("deployment", "app.war", Resource::new());
        let addr = Address::of([("deployment", "app.war")]);
        assert!(root.apply(&Operation::simple("redeploy", addr.clone())).is_err());
        root.apply(&Operation::simple("deploy", addr.clone())).unwrap();
        assert!(root.apply(&Operation::simple("redeploy", addr.clone())).is_ok());
        root.apply(&Operation::simple("undeploy", addr.clone())).unwrap();
        assert_eq!(
            root.navigate(&addr).unwrap().attribute(ENABLED),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_unknown_operation() {
        let mut root = sample();
        let res = root.apply(&Operation::simple("frobnicate", Address::root()));
        assert!(matches!(res, Err(Error::InvalidOperation(_))));
    }
}
