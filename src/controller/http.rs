//! HTTP API of a controller
//!
//! `POST /management` is the public entry point. The `/internal` routes carry
//! requests from other controllers: a prepared transaction is parked in
//! [`PendingTransactions`] until its coordinator posts the decision.

use crate::common::{Error, METRICS};
use crate::controller::Controller;
use crate::model::{Operation, OperationResponse};
use crate::transport::http::{RemotePrepared, RemoteRequest, PREPARE_PATH};
use crate::transport::{Decision, PendingTransactions};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ControllerState {
    pub controller: Arc<Controller>,
    pub pending: Arc<PendingTransactions>,
}

pub fn create_router(state: ControllerState) -> Router {
    Router::new()
        .route("/management", axum::routing::post(management))
        .route(PREPARE_PATH, axum::routing::post(prepare))
        .route("/internal/tx/:id/:decision", axum::routing::post(decide))
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Execute a management operation; failures are reported in the body
async fn management(State(state): State<ControllerState>, Json(op): Json<Operation>) -> impl IntoResponse {
    Json(state.controller.execute(op).await)
}

async fn prepare(State(state): State<ControllerState>, Json(req): Json<RemoteRequest>) -> impl IntoResponse {
    match state.controller.handle_request(req.target, req.operation).await {
        Ok(tx) => {
            let tx_id = tx.is_pending().then(|| state.pending.insert(tx.control));
            (
                StatusCode::OK,
                Json(RemotePrepared {
                    tx_id,
                    prepared: tx.prepared,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn decide(
    State(state): State<ControllerState>,
    Path((id, decision)): Path<(String, String)>,
) -> impl IntoResponse {
    let decision: Decision = match decision.parse() {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    let Some(control) = state.pending.take(&id) else {
        return error_response(&Error::NotFound(format!("transaction {}", id)));
    };
    match control.complete(decision).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn health(State(state): State<ControllerState>) -> impl IntoResponse {
    let controller = &state.controller;
    let status = if controller.is_booting() { "booting" } else { "ok" };
    Json(json!({
        "status": status,
        "controller": controller.name(),
        "primary": controller.is_primary(),
        "controllers": controller.known_controllers(),
        "workers": controller.workers().statuses(),
        "pending_transactions": state.pending.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}

fn error_response(err: &Error) -> axum::response::Response {
    (err.to_http_status(), Json(OperationResponse::from_error(err))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::model::{Address, InMemoryModel, Resource};
    use crate::transport::LocalTransport;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> ControllerState {
        let mut config = Config::default();
        config.controller.name = "primary".into();
        config.controller.primary = true;
        let model = Arc::new(InMemoryModel::new(Resource::new()));
        let transport = LocalTransport::new();
        let controller = Arc::new(Controller::new(config, model, transport.clone()).unwrap());
        transport.attach(&controller);
        controller.finish_boot().unwrap();
        ControllerState {
            controller,
            pending: Arc::new(PendingTransactions::new(Duration::from_secs(60))),
        }
    }

    async fn post(router: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_management_endpoint() {
        let router = create_router(state());
        let op = Operation::simple("add", Address::of([("path", "data")])).with_param("path", "/var/data");
        let (status, body) = post(router, "/management", serde_json::to_value(&op).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "success");
    }

    #[tokio::test]
    async fn test_prepare_then_decide() {
        let state = state();
        let mut op = Operation::simple("add", Address::of([("path", "data")])).with_param("path", "/var/data");
        op.headers_mut().execute_for_coordinator = true;
        let req = RemoteRequest {
            target: crate::transport::Target::controller("primary"),
            operation: op,
        };
        let (status, body) = post(create_router(state.clone()), PREPARE_PATH, serde_json::to_value(&req).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let tx_id = body["tx_id"].as_str().unwrap().to_string();
        assert_eq!(state.pending.len(), 1);

        let (status, body) = post(
            create_router(state.clone()),
            &format!("/internal/tx/{}/rollback", tx_id),
            serde_json::Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rolled_back"], true);
        assert!(state.pending.is_empty());
        assert!(state.controller.model().snapshot().child("path", "data").is_none());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let (status, _) = post(create_router(state()), "/internal/tx/nope/commit", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
