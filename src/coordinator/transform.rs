//! Version transformation of operations sent to older controllers
//!
//! Rules are keyed by resource kind and the model version that introduced it.
//! A controller whose model predates a rule's version has the rule applied to
//! every operation step touching that kind.

use crate::common::{Error, ModelVersion, Result, TransformAction, TransformerRule};
use crate::model::response::STAGED_RESULT;
use crate::model::{Operation, OperationResponse};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Decides whether a response from the target must be replaced by a failure
pub type RejectPolicy = Arc<dyn Fn(&OperationResponse) -> Option<String> + Send + Sync>;

/// Maps a raw response back to the shape of the untransformed operation
pub type ResultMapper = Arc<dyn Fn(OperationResponse) -> OperationResponse + Send + Sync>;

/// An operation prepared for one target
pub struct Transformed {
    /// `None` when nothing is left to send
    pub operation: Option<Operation>,
    pub reject: RejectPolicy,
    pub result: ResultMapper,
}

impl Transformed {
    /// The operation sent as is
    pub fn identity(op: Operation) -> Self {
        Self {
            operation: Some(op),
            reject: Arc::new(|_| None),
            result: Arc::new(|resp| resp),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    kind: String,
    since: ModelVersion,
    action: TransformAction,
}

#[derive(Debug, Clone, Default)]
pub struct TransformerRegistry {
    rules: Vec<Rule>,
}

impl TransformerRegistry {
    pub fn new(rules: &[TransformerRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|r| {
                Ok(Rule {
                    kind: r.kind.clone(),
                    since: ModelVersion::parse(&r.since)?,
                    action: r.action,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn rule_for(&self, op: &Operation, version: ModelVersion) -> Option<&Rule> {
        let address = op.address();
        self.rules.iter().find(|rule| {
            version < rule.since && address.segments().iter().any(|seg| seg.kind == rule.kind)
        })
    }

    /// Rewrite `op` for `controller`, which speaks model `version`
    pub fn transform(&self, controller: &str, version: ModelVersion, op: &Operation) -> Result<Transformed> {
        if self.rules.is_empty() {
            return Ok(Transformed::identity(op.clone()));
        }
        match op {
            Operation::Simple(_) => match self.rule_for(op, version) {
                None => Ok(Transformed::identity(op.clone())),
                Some(rule) => match rule.action {
                    TransformAction::Discard => {
                        tracing::debug!("Discarding {} for {} ({})", op, controller, version);
                        Ok(Transformed {
                            operation: None,
                            reject: Arc::new(|_| None),
                            result: Arc::new(|resp| resp),
                        })
                    }
                    TransformAction::Reject => Ok(rejecting(op.clone(), controller, vec![op.to_string()])),
                    TransformAction::Fail => Err(unsupported(controller, version, op, rule)),
                },
            },
            Operation::Composite(composite) => {
                let mut kept = Vec::new();
                let mut kept_index = Vec::new();
                let mut rejected = Vec::new();
                for (i, step) in composite.steps.iter().enumerate() {
                    match self.rule_for(step, version).map(|r| (r, r.action)) {
                        None => {}
                        Some((_, TransformAction::Discard)) => {
                            tracing::debug!("Discarding step-{} {} for {}", i + 1, step, controller);
                            continue;
                        }
                        Some((_, TransformAction::Reject)) => rejected.push(step.to_string()),
                        Some((rule, TransformAction::Fail)) => {
                            return Err(unsupported(controller, version, step, rule))
                        }
                    }
                    kept_index.push(i);
                    kept.push(step.clone());
                }
                if kept.is_empty() {
                    return Ok(Transformed {
                        operation: None,
                        reject: Arc::new(|_| None),
                        result: Arc::new(|resp| resp),
                    });
                }

                let total = composite.steps.len();
                let operation = Operation::composite(kept).with_headers(composite.headers.clone());
                let mut transformed = if rejected.is_empty() {
                    Transformed::identity(operation)
                } else {
                    rejecting(operation, controller, rejected)
                };
                if kept_index.len() < total {
                    transformed.result = Arc::new(move |resp| renumber_steps(resp, &kept_index, total));
                }
                Ok(transformed)
            }
        }
    }
}

fn unsupported(controller: &str, version: ModelVersion, op: &Operation, rule: &Rule) -> Error {
    Error::Transformation {
        controller: controller.to_string(),
        reason: format!(
            "{} needs model {} for {} resources but speaks {}",
            op, rule.since, rule.kind, version
        ),
    }
}

fn rejecting(operation: Operation, controller: &str, steps: Vec<String>) -> Transformed {
    let controller = controller.to_string();
    Transformed {
        operation: Some(operation),
        reject: Arc::new(move |resp: &OperationResponse| {
            resp.is_success().then(|| {
                format!(
                    "{} cannot be applied consistently on {}; its result was rejected",
                    steps.join(", "),
                    controller
                )
            })
        }),
        result: Arc::new(|resp| resp),
    }
}

/// Put `step-N` keys back at their original positions, with discarded steps
/// reported as successful no-ops
fn renumber_steps(mut resp: OperationResponse, kept: &[usize], total: usize) -> OperationResponse {
    // A subordinate's prepared payload nests the step results
    let steps = if resp.server_operations().is_some() {
        resp.result.get_mut(STAGED_RESULT)
    } else {
        Some(&mut resp.result)
    };
    if let Some(steps) = steps {
        *steps = renumber(std::mem::take(steps), kept, total);
    }
    resp
}

fn renumber(steps: Value, kept: &[usize], total: usize) -> Value {
    let Value::Object(sent) = steps else {
        return steps;
    };
    let mut restored = Map::new();
    for original in 0..total {
        let key = format!("step-{}", original + 1);
        let value = match kept.iter().position(|i| *i == original) {
            Some(pos) => sent
                .get(&format!("step-{}", pos + 1))
                .cloned()
                .unwrap_or(Value::Null),
            None => serde_json::to_value(OperationResponse::success(Value::Null)).unwrap_or(Value::Null),
        };
        restored.insert(key, value);
    }
    Value::Object(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Address;
    use serde_json::json;

    fn registry() -> TransformerRegistry {
        TransformerRegistry::new(&[
            TransformerRule {
                kind: "extension".into(),
                since: "2.0".into(),
                action: TransformAction::Discard,
            },
            TransformerRule {
                kind: "deployment-overlay".into(),
                since: "2.0".into(),
                action: TransformAction::Reject,
            },
            TransformerRule {
                kind: "jvm".into(),
                since: "2.0".into(),
                action: TransformAction::Fail,
            },
        ])
        .unwrap()
    }

    fn old() -> ModelVersion {
        ModelVersion::parse("1.4").unwrap()
    }

    #[test]
    fn test_current_version_is_untouched() {
        let op = Operation::simple("add", Address::of([("extension", "x")]));
        let t = registry()
            .transform("b", ModelVersion::parse("2.0").unwrap(), &op)
            .unwrap();
        assert_eq!(t.operation, Some(op));
    }

    #[test]
    fn test_discard_drops_operation() {
        let op = Operation::simple("add", Address::of([("extension", "x")]));
        let t = registry().transform("b", old(), &op).unwrap();
        assert!(t.operation.is_none());
    }

    #[test]
    fn test_reject_replaces_success() {
        let op = Operation::simple("add", Address::of([("deployment-overlay", "o")]));
        let t = registry().transform("b", old(), &op).unwrap();
        assert!(t.operation.is_some());
        assert!((t.reject)(&OperationResponse::success(Value::Null)).is_some());
        assert!((t.reject)(&OperationResponse::failed("x")).is_none());
    }

    #[test]
    fn test_fail_is_an_error() {
        let op = Operation::simple(
            "add",
            Address::of([("host", "b"), ("server-config", "s"), ("jvm", "j")]),
        );
        let err = registry().transform("b", old(), &op).err().unwrap();
        assert!(matches!(err, Error::Transformation { ref controller, .. } if controller == "b"));
    }

    #[test]
    fn test_composite_discard_keeps_step_numbering() {
        let op = Operation::composite(vec![
            Operation::simple("add", Address::of([("path", "p")])),
            Operation::simple("add", Address::of([("extension", "x")])),
            Operation::simple("add", Address::of([("path", "q")])),
        ]);
        let t = registry().transform("b", old(), &op).unwrap();
        assert_eq!(t.operation.as_ref().unwrap().steps().len(), 2);

        let raw = OperationResponse::success(json!({
            "step-1": {"outcome": "success", "result": "p"},
            "step-2": {"outcome": "success", "result": "q"},
        }));
        let mapped = (t.result)(raw);
        assert_eq!(mapped.result["step-1"]["result"], "p");
        assert_eq!(mapped.result["step-2"]["outcome"], "success");
        assert_eq!(mapped.result["step-3"]["result"], "q");
    }

    #[test]
    fn test_renumbering_inside_prepared_payload() {
        let op = Operation::composite(vec![
            Operation::simple("add", Address::of([("extension", "x")])),
            Operation::simple("add", Address::of([("path", "p")])),
        ]);
        let t = registry().transform("b", old(), &op).unwrap();
        let raw = OperationResponse::success(json!({
            "result": {"step-1": {"outcome": "success", "result": "p"}},
            "server-operations": [],
        }));
        let mapped = (t.result)(raw);
        assert_eq!(mapped.result["result"]["step-2"]["result"], "p");
        assert_eq!(mapped.result["server-operations"], json!([]));
    }

    #[test]
    fn test_fully_discarded_composite() {
        let op = Operation::composite(vec![Operation::simple(
            "add",
            Address::of([("extension", "x")]),
        )]);
        assert!(registry().transform("b", old(), &op).unwrap().operation.is_none());
    }
}
