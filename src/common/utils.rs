//! Utility functions for minidomain

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Generate the domain-wide correlation id attached to a top-level operation
pub fn generate_domain_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A wait budget that shrinks as time passes.
///
/// Each retrieval gets whatever is left of the overall window; once the waiting
/// task has been interrupted every retrieval gets at most `interrupted` patience.
#[derive(Debug, Clone, Copy)]
pub struct Patience {
    deadline: Instant,
    interrupted: Option<Duration>,
}

impl Patience {
    pub fn new(window: Duration) -> Self {
        Self {
            deadline: Instant::now() + window,
            interrupted: None,
        }
    }

    /// Zero patience: only already-available results are taken.
    pub fn none() -> Self {
        Self {
            deadline: Instant::now(),
            interrupted: Some(Duration::ZERO),
        }
    }

    /// Cap every subsequent wait at `cap`.
    pub fn interrupt(&mut self, cap: Duration) {
        self.interrupted = Some(cap);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }

    /// Time the next retrieval may block for.
    pub fn remaining(&self) -> Duration {
        let left = self.deadline.saturating_duration_since(Instant::now());
        match self.interrupted {
            Some(cap) => left.min(cap),
            None => left,
        }
    }
}

/// Management model version (`major.minor`) spoken by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
}

impl ModelVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidConfig(format!("invalid model version: {}", s));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_version() {
        let v = ModelVersion::parse("1.4").unwrap();
        assert_eq!(v, ModelVersion::new(1, 4));
        assert!(v < ModelVersion::new(2, 0));
        assert!(ModelVersion::new(1, 10) > ModelVersion::new(1, 4));
        assert_eq!(v.to_string(), "1.4");
        assert!(ModelVersion::parse("2").is_err());
        assert!(ModelVersion::parse("a.b").is_err());
    }

    #[test]
    fn test_patience_interrupt() {
        let mut patience = Patience::new(Duration::from_secs(60));
        assert!(patience.remaining() > Duration::from_secs(59));
        patience.interrupt(Duration::from_millis(50));
        assert!(patience.is_interrupted());
        assert!(patience.remaining() <= Duration::from_millis(50));
        assert_eq!(Patience::none().remaining(), Duration::ZERO);
    }

    #[test]
    fn test_domain_uuid_unique() {
        assert_ne!(generate_domain_uuid(), generate_domain_uuid());
    }
}
