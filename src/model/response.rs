//! Operation response documents

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload key under which a subordinate returns its resolved worker operations
pub const SERVER_OPERATIONS: &str = "server-operations";

/// Payload key holding a subordinate's staged model result next to its server operations
pub const STAGED_RESULT: &str = "result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_description: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rolled_back: bool,
    /// Per server-group worker responses, set by the coordinator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_groups: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl OperationResponse {
    pub fn success(result: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            result,
            failure_description: None,
            rolled_back: false,
            server_groups: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(description: impl Into<Value>) -> Self {
        Self {
            outcome: Outcome::Failed,
            result: Value::Null,
            failure_description: Some(description.into()),
            rolled_back: false,
            server_groups: None,
            warnings: Vec::new(),
        }
    }

    /// Outcome reported for a target whose prepared change was discarded
    pub fn rolled_back_result() -> Self {
        let mut resp = Self::failed("Operation was rolled back");
        resp.rolled_back = true;
        resp
    }

    pub fn from_error(err: &crate::Error) -> Self {
        Self::failed(err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }

    pub fn mark_rolled_back(mut self) -> Self {
        self.rolled_back = true;
        self
    }

    /// Copy with the embedded warnings removed
    pub fn strip_warnings(&self) -> Self {
        Self {
            warnings: Vec::new(),
            ..self.clone()
        }
    }

    /// Record `key → value` inside an object-shaped failure description.
    ///
    /// A description that is already a plain string is left as it is rather than
    /// replaced by an object: some failures arrive with a string description where
    /// a keyed map was expected, and the original text is the more useful one.
    pub fn merge_failure(&mut self, key: &str, value: Value) {
        self.outcome = Outcome::Failed;
        match &mut self.failure_description {
            None => {
                let mut map = Map::new();
                map.insert(key.to_string(), value);
                self.failure_description = Some(Value::Object(map));
            }
            Some(Value::Object(map)) => {
                map.insert(key.to_string(), value);
            }
            Some(other) => {
                tracing::debug!(
                    "Keeping non-object failure description {} instead of adding {}",
                    other,
                    key
                );
            }
        }
    }

    /// Human-readable failure text
    pub fn failure_text(&self) -> String {
        match &self.failure_description {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Resolved worker operations embedded by a subordinate, if any
    pub fn server_operations(&self) -> Option<&Value> {
        self.result.get(SERVER_OPERATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_failure_into_empty() {
        let mut resp = OperationResponse::success(Value::Null);
        resp.merge_failure("host-a", json!("boom"));
        assert!(resp.is_failed());
        assert_eq!(resp.failure_description, Some(json!({"host-a": "boom"})));

        resp.merge_failure("host-b", json!("bang"));
        assert_eq!(
            resp.failure_description,
            Some(json!({"host-a": "boom", "host-b": "bang"}))
        );
    }

    #[test]
    fn test_merge_failure_keeps_string_description() {
        let mut resp = OperationResponse::failed("original failure");
        resp.merge_failure("host-a", json!("boom"));
        assert_eq!(resp.failure_description, Some(json!("original failure")));
    }

    #[test]
    fn test_strip_warnings() {
        let mut resp = OperationResponse::success(json!(1));
        resp.warnings.push("deprecated attribute".into());
        let stripped = resp.strip_warnings();
        assert!(stripped.warnings.is_empty());
        assert_eq!(stripped.result, json!(1));
    }

    #[test]
    fn test_serialization_omits_defaults() {
        let json = serde_json::to_value(OperationResponse::success(json!("ok"))).unwrap();
        assert_eq!(json, json!({"outcome": "success", "result": "ok"}));
        let rolled = serde_json::to_value(OperationResponse::rolled_back_result()).unwrap();
        assert_eq!(rolled["rolled_back"], json!(true));
    }
}
