//! HTTP transport between controllers
//!
//! Prepare is a `POST /internal/prepare`; the receiving controller parks the
//! prepared transaction under a fresh id and the caller later posts the decision
//! to `/internal/tx/{id}/{commit|rollback}`. Parked transactions nobody decides
//! on are rolled back once they expire.

use crate::common::{Error, Result};
use crate::model::{Operation, OperationResponse};
use crate::transport::{
    Decision, PreparedTransaction, Target, TransactionControl, Transport,
};
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const PREPARE_PATH: &str = "/internal/prepare";

/// Body of a prepare request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub target: Target,
    pub operation: Operation,
}

/// Body of a prepare reply; no `tx_id` means the work is already complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePrepared {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    pub prepared: OperationResponse,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    peers: Arc<BTreeMap<String, String>>,
}

impl HttpTransport {
    /// `peers` maps controller name to base URL (`http://host:port`)
    pub fn new(peers: BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            peers: Arc::new(peers),
        })
    }

    fn base_url(&self, name: &str) -> Result<String> {
        self.peers
            .get(name)
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::UnknownController(name.to_string()))
    }
}

impl Transport for HttpTransport {
    fn send(&self, target: Target, operation: Operation) -> BoxFuture<'static, Result<PreparedTransaction>> {
        let client = self.client.clone();
        let base = self.base_url(target.controller_name());
        async move {
            let base = base?;
            let resp = client
                .post(format!("{}{}", base, PREPARE_PATH))
                .json(&RemoteRequest { target, operation })
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Error::Http(format!(
                    "prepare on {} returned {}",
                    base,
                    resp.status()
                )));
            }
            let reply: RemotePrepared = resp.json().await?;
            Ok(match reply.tx_id {
                Some(tx_id) => PreparedTransaction::new(
                    reply.prepared,
                    HttpTransactionControl { client, base, tx_id },
                ),
                None => PreparedTransaction::completed(reply.prepared),
            })
        }
        .boxed()
    }
}

struct HttpTransactionControl {
    client: reqwest::Client,
    base: String,
    tx_id: String,
}

impl TransactionControl for HttpTransactionControl {
    fn complete(self: Box<Self>, decision: Decision) -> BoxFuture<'static, Result<OperationResponse>> {
        async move {
            let url = format!("{}/internal/tx/{}/{}", self.base, self.tx_id, decision.as_str());
            let resp = self.client.post(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Error::Http(format!("{} returned {}", url, resp.status())));
            }
            Ok(resp.json::<OperationResponse>().await?)
        }
        .boxed()
    }
}

struct Pending {
    control: Box<dyn TransactionControl>,
    created: Instant,
}

/// Transactions prepared on behalf of a remote coordinator, awaiting its decision
pub struct PendingTransactions {
    inner: Mutex<HashMap<String, Pending>>,
    expiry: Duration,
}

impl PendingTransactions {
    pub fn new(expiry: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    /// Park a prepared transaction and return its id
    pub fn insert(&self, control: Box<dyn TransactionControl>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                Pending {
                    control,
                    created: Instant::now(),
                },
            );
        id
    }

    pub fn take(&self, id: &str) -> Option<Box<dyn TransactionControl>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|p| p.control)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove transactions older than the expiry window
    fn drain_expired(&self) -> Vec<(String, Box<dyn TransactionControl>)> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, p)| p.created.elapsed() >= self.expiry)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| inner.remove(&id).map(|p| (id, p.control)))
            .collect()
    }

    /// Roll back every expired transaction; returns how many were dropped
    pub async fn reap_expired(&self) -> usize {
        let expired = self.drain_expired();
        let count = expired.len();
        for (id, control) in expired {
            tracing::warn!("Rolling back transaction {} after the coordinator went silent", id);
            if let Err(e) = control.complete(Decision::Rollback).await {
                tracing::warn!("Rollback of expired transaction {} failed: {}", id, e);
            }
        }
        count
    }

    /// Background task reaping expired transactions
    pub fn spawn_reaper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = (self.expiry / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.reap_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Completed;
    use serde_json::json;

    #[tokio::test]
    async fn test_pending_take_once() {
        let pending = PendingTransactions::new(Duration::from_secs(60));
        let id = pending.insert(Box::new(Completed(OperationResponse::success(json!(1)))));
        assert_eq!(pending.len(), 1);
        assert!(pending.take(&id).is_some());
        assert!(pending.take(&id).is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_expired_transactions_are_reaped() {
        let pending = PendingTransactions::new(Duration::from_millis(10));
        pending.insert(Box::new(Completed(OperationResponse::success(json!(1)))));
        assert_eq!(pending.reap_expired().await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pending.reap_expired().await, 1);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let transport = HttpTransport::new(BTreeMap::new(), Duration::from_secs(1)).unwrap();
        let res = transport
            .send(
                Target::controller("nowhere"),
                Operation::simple("read-resource", crate::model::Address::root()),
            )
            .await;
        assert!(matches!(res, Err(Error::UnknownController(_))));
    }

    #[test]
    fn test_wire_shapes() {
        let reply = RemotePrepared {
            tx_id: None,
            prepared: OperationResponse::success(json!("ok")),
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert!(v.get("tx_id").is_none());
        let req = RemoteRequest {
            target: Target::controller("a"),
            operation: Operation::simple("read-resource", crate::model::Address::root()),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["target"], json!({"type": "controller", "name": "a"}));
    }
}
