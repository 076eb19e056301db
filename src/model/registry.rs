//! Well-known operation names and their flags

pub const ADD: &str = "add";
pub const REMOVE: &str = "remove";
pub const WRITE_ATTRIBUTE: &str = "write-attribute";
pub const UNDEFINE_ATTRIBUTE: &str = "undefine-attribute";
pub const READ_RESOURCE: &str = "read-resource";
pub const READ_ATTRIBUTE: &str = "read-attribute";
pub const READ_CHILDREN_NAMES: &str = "read-children-names";
pub const READ_CHILDREN_TYPES: &str = "read-children-types";
pub const READ_OPERATION_NAMES: &str = "read-operation-names";
pub const DEPLOY: &str = "deploy";
pub const UNDEPLOY: &str = "undeploy";
pub const REDEPLOY: &str = "redeploy";

/// Placeholder for a step executed by another controller; keeps composite step numbering intact
pub const NO_OP: &str = "no-op";

/// Marker sent to a worker whose new configuration needs a full process restart
pub const REQUIRE_RESTART: &str = "require-restart";
/// Marker sent to a worker whose new configuration needs a reload
pub const REQUIRE_RELOAD: &str = "require-reload";

const READ_ONLY: &[&str] = &[
    READ_RESOURCE,
    READ_ATTRIBUTE,
    READ_CHILDREN_NAMES,
    READ_CHILDREN_TYPES,
    READ_OPERATION_NAMES,
    NO_OP,
];

/// Operations every resource supports
pub const GLOBAL_OPERATIONS: &[&str] = &[
    ADD,
    REMOVE,
    WRITE_ATTRIBUTE,
    UNDEFINE_ATTRIBUTE,
    READ_RESOURCE,
    READ_ATTRIBUTE,
    READ_CHILDREN_NAMES,
    READ_CHILDREN_TYPES,
    READ_OPERATION_NAMES,
];

/// Does the operation leave the model untouched?
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY.contains(&name)
}

/// Is `name` one of the worker state markers?
pub fn is_marker(name: &str) -> bool {
    name == REQUIRE_RESTART || name == REQUIRE_RELOAD
}
