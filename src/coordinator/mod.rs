//! Multi-phase operation coordinator
//!
//! The coordinator is responsible for:
//! - Routing an operation to the controllers it affects
//! - Applying it to the local model and resolving worker operations
//! - The prepare barrier and commit/rollback across controllers
//! - Pushing worker operations out under a rollout plan
//! - Assembling one response from many partial results

pub mod assembler;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod pipeline;
pub mod plan;
pub mod prepare;
pub mod request;
pub mod resolver;
pub mod resolver_step;
pub mod rollout;
pub mod routing;
pub mod transform;

pub use context::{CoordinationContext, Interrupt, InterruptHandle};
pub use engine::{PlanExecutor, RolloutEngine, RolloutOutcome, RolloutReport, WorkerDispatch};
pub use resolver::{ResolvedOperations, ServerOperationResolver};
pub use routing::{route, RouteContext, RoutingDecision};
pub use transform::TransformerRegistry;
