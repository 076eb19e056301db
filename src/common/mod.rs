//! Common utilities and types shared across minidomain

pub mod audit;
pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, ControllerConfig, PeerConfig, TimeoutConfig, TransformAction, TransformerRule};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use utils::{generate_domain_uuid, ModelVersion, Patience};
