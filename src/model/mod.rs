//! Management model: operation/response documents and the configuration tree

pub mod address;
pub mod domain;
pub mod operation;
pub mod plan;
pub mod registry;
pub mod resource;
pub mod response;
pub mod store;

pub use address::{Address, Segment};
pub use operation::{Headers, Operation};
pub use plan::{GroupPolicy, RolloutPlan, Series};
pub use resource::Resource;
pub use response::{OperationResponse, Outcome};
pub use store::{InMemoryModel, ModelStore, StagedChange};
