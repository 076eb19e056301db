//! # minidomain
//!
//! Management plane for a domain of host controllers and the worker processes
//! they supervise:
//! - One primary controller owns the domain-wide configuration
//! - Subordinate controllers own their host's model and workers
//! - Writes are prepared everywhere, then committed or rolled back as one
//! - Worker changes roll out per server group under a rollout plan
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────────────────────┐
//!   operation ──▶ │     Primary controller    │
//!                 │  route → prepare → decide │
//!                 └──────┬──────────────┬─────┘
//!            prepare /   │              │   commit / rollback
//!                        │ HTTP         │
//!          ┌─────────────▼──┐      ┌────▼───────────┐
//!          │ Controller A   │      │ Controller B   │
//!          │ (host model)   │      │ (host model)   │
//!          └──┬─────────┬───┘      └──┬─────────────┘
//!             │         │             │
//!        ┌────▼───┐ ┌───▼────┐   ┌────▼───┐
//!        │ worker │ │ worker │   │ worker │   rolled out per server group
//!        └────────┘ └────────┘   └────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the primary
//! ```bash
//! minidomain-controller serve \
//!   --name primary --primary \
//!   --bind 0.0.0.0:9990 \
//!   --model ./domain.json \
//!   --peers host-a=http://10.0.0.2:9990,host-b=http://10.0.0.3:9990
//! ```
//!
//! ### Start a subordinate
//! ```bash
//! minidomain-controller serve \
//!   --name host-a --primary-name primary \
//!   --bind 0.0.0.0:9990 \
//!   --peers primary=http://10.0.0.1:9990
//! ```
//!
//! ### Execute an operation
//! ```bash
//! curl -X POST http://localhost:9990/management -d '{
//!   "kind": "simple",
//!   "name": "write-attribute",
//!   "address": [{"kind": "server-group", "value": "main"}],
//!   "params": {"name": "profile", "value": "full"}
//! }'
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod controller;
pub mod coordinator;
pub mod model;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use controller::Controller;
pub use model::{Address, Operation, OperationResponse};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
