//! Hierarchical resource addresses (`/host=a/server-config=s1`)

use serde::{Deserialize, Serialize};
use std::fmt;

pub const WILDCARD: &str = "*";

// Well-known segment kinds
pub const HOST: &str = "host";
pub const SERVER: &str = "server";
pub const SERVER_CONFIG: &str = "server-config";
pub const SERVER_GROUP: &str = "server-group";
pub const PROFILE: &str = "profile";
pub const SUBSYSTEM: &str = "subsystem";
pub const EXTENSION: &str = "extension";
pub const PATH: &str = "path";
pub const SYSTEM_PROPERTY: &str = "system-property";
pub const INTERFACE: &str = "interface";
pub const SOCKET_BINDING_GROUP: &str = "socket-binding-group";
pub const DEPLOYMENT: &str = "deployment";
pub const DEPLOYMENT_OVERLAY: &str = "deployment-overlay";
pub const CORE_SERVICE: &str = "core-service";
pub const JVM: &str = "jvm";

/// One `{kind=value}` step of an address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub kind: String,
    pub value: String,
}

impl Segment {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }
}

/// Ordered list of segments; the empty address is the root of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(Vec<Segment>);

impl Address {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from `(kind, value)` pairs
    pub fn of<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| Segment::new(k, v))
                .collect(),
        )
    }

    /// Parse `/kind=value/kind=value`; `/` alone is the root
    pub fn parse(s: &str) -> crate::Result<Self> {
        let mut segments = Vec::new();
        for part in s.split('/').filter(|p| !p.is_empty()) {
            let (kind, value) = part.split_once('=').ok_or_else(|| {
                crate::Error::InvalidOperation(format!("malformed address segment: {}", part))
            })?;
            if kind.is_empty() || value.is_empty() {
                return Err(crate::Error::InvalidOperation(format!(
                    "malformed address segment: {}",
                    part
                )));
            }
            segments.push(Segment::new(kind, value));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.0.first()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.0.get(index)
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Kind of the segment at `index`, if any
    pub fn kind_at(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(|s| s.kind.as_str())
    }

    pub fn append(&self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::new(kind, value));
        Self(segments)
    }

    /// Address with the first `n` segments removed
    pub fn skip(&self, n: usize) -> Self {
        Self(self.0.iter().skip(n).cloned().collect())
    }

    /// Address without its last segment
    pub fn parent(&self) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }

    /// The controller named by a leading `host=` segment
    pub fn host(&self) -> Option<&str> {
        match self.first() {
            Some(seg) if seg.kind == HOST => Some(seg.value.as_str()),
            _ => None,
        }
    }

    /// Does the address reach into a running worker (`/host=h/server=s/...`)?
    pub fn is_worker_scoped(&self) -> bool {
        self.host().is_some() && self.kind_at(1) == Some(SERVER)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.0 {
            write!(f, "/{}={}", seg.kind, seg.value)?;
        }
        Ok(())
    }
}
