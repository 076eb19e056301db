//! Controller server

use crate::common::{Config, Result};
use crate::controller::http::{create_router, ControllerState};
use crate::controller::Controller;
use crate::model::{InMemoryModel, ModelStore, Resource};
use crate::transport::{HttpTransport, PendingTransactions, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ControllerServer {
    config: Config,
}

impl ControllerServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let controller_config = &self.config.controller;
        tracing::info!("Starting controller: {}", controller_config.name);
        tracing::info!("  HTTP API: {}", controller_config.bind_addr);
        tracing::info!(
            "  Role: {}",
            match &controller_config.primary_name {
                _ if controller_config.primary => "primary".to_string(),
                Some(primary) => format!("subordinate of {}", primary),
                None => "subordinate".to_string(),
            }
        );
        tracing::info!("  Peers: {}", controller_config.peers.len());

        let model: Arc<dyn ModelStore> = match &controller_config.model_path {
            Some(path) => {
                tracing::info!("  Model: {}", path.display());
                Arc::new(InMemoryModel::load(path)?)
            }
            None => Arc::new(InMemoryModel::new(Resource::new())),
        };

        let peers: BTreeMap<String, String> = controller_config
            .peers
            .iter()
            .map(|(name, peer)| (name.clone(), peer.url.clone()))
            .collect();
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(peers, self.config.timeouts.connection_budget())?);

        let expiry = self.config.timeouts.pending_tx_expiry();
        let controller = Arc::new(Controller::new(self.config, model, transport)?);
        controller.finish_boot()?;

        let pending = Arc::new(PendingTransactions::new(expiry));
        let _reaper = pending.clone().spawn_reaper();

        let bind_addr = controller.config().controller.bind_addr;
        let router = create_router(ControllerState {
            controller: controller.clone(),
            pending,
        });
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("✓ Controller {} ready", controller.name());

        tokio::select! {
            res = axum::serve(listener, router) => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down controller {}", controller.name());
            }
        }

        Ok(())
    }
}
