//! Audit trail for management writes
//!
//! Every write completed by the dispatcher produces one JSON line, written to an
//! optional file and to the `audit` tracing target.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    OperationCommitted,
    OperationRolledBack,
    OperationRejected,
    ControllerRegistered,
    ControllerUnregistered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    /// Caller type header, or "anonymous"
    pub actor: String,
    /// Address or controller affected
    pub target: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_uuid: Option<String>,
}

pub struct AuditLogger {
    file: Mutex<Option<File>>,
}

pub static AUDIT_LOGGER: Lazy<AuditLogger> = Lazy::new(AuditLogger::disabled);

impl AuditLogger {
    /// Logger that only emits to tracing
    pub fn disabled() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    /// Logger that also appends to `path`
    pub fn to_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(Some(file)),
        })
    }

    /// Start (or switch) appending to `path`
    pub fn open_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }

    pub fn log(&self, entry: &AuditEntry) {
        let line = serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string());
        if let Some(f) = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            if let Err(e) = writeln!(f, "{}", line) {
                tracing::warn!("Failed to write audit entry: {}", e);
            }
        }
        tracing::info!(target: "audit", "{}", line);
    }

    pub fn log_event(
        &self,
        event: AuditEventType,
        actor: Option<&str>,
        target: Option<String>,
        message: impl Into<String>,
        domain_uuid: Option<String>,
    ) {
        self.log(&AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.unwrap_or("anonymous").to_string(),
            target,
            message: message.into(),
            domain_uuid,
        });
    }
}
