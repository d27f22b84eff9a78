//! Node controllers
//!
//! Two watch loops run alongside the node API:
//! - the refresh controller keeps `status.devices` of this node's Node
//!   resource current and answers `spec.refresh=true`;
//! - the init-request controller executes InitRequests addressed to this
//!   node and writes per-device results back.

use super::agent::NodeAgent;
use crate::crd::{DirectPVInitRequest, DirectPVNode, InitStatus};
use crate::domain::ports::WatchEvent;
use crate::error::{Error, Result};
use crate::store::{retry_on_conflict, RetryConfig};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause before re-opening a failed watch
const WATCH_RESTART_DELAY: Duration = Duration::from_secs(5);

// =============================================================================
// Node Refresh Controller
// =============================================================================

/// Keeps this node's device list current
pub struct NodeController {
    agent: Arc<NodeAgent>,
    retry: RetryConfig,
}

impl NodeController {
    pub fn new(agent: Arc<NodeAgent>) -> Self {
        Self {
            agent,
            retry: RetryConfig::default(),
        }
    }

    /// Probe devices and write them to the Node resource, creating it if absent.
    /// `spec.refresh` is cleared in the same update.
    pub async fn sync(&self) -> Result<DirectPVNode> {
        let node_id = self.agent.node_id().to_string();
        let nodes = self.agent.clients().nodes.clone();

        retry_on_conflict(&self.retry, move || {
            let node_id = node_id.clone();
            let nodes = nodes.clone();
            async move {
                let devices = self.agent.probe_node_devices().await?;
                match nodes.get(&node_id).await {
                    Ok(mut node) => {
                        node.status.get_or_insert_with(Default::default).devices = devices;
                        node.spec.refresh = false;
                        nodes.update(&node).await
                    }
                    Err(e) if e.is_not_found() => {
                        info!("Creating node resource {}", node_id);
                        nodes.create(&DirectPVNode::with_devices(&node_id, devices)).await
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    /// Sync at startup, then answer refresh requests until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.sync().await?;
        info!("Node controller started for {}", self.agent.node_id());

        while !cancel.is_cancelled() {
            if let Err(e) = self.watch(cancel.clone()).await {
                warn!("Node watch failed: {}; restarting", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_RESTART_DELAY) => {}
                }
            }
        }
        Ok(())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (mut events, _handle) = self
            .agent
            .clients()
            .node_lister()
            .node_selector(vec![self.agent.node_id().to_string()])
            .watch(cancel.clone())
            .await?;

        while let Some(event) = events.recv().await {
            match event? {
                WatchEvent::Applied(node) if node.spec.refresh => {
                    debug!("Refresh requested on node {}", node.name_any());
                    self.agent.metrics().refresh_requests.inc();
                    if let Err(e) = self.sync().await {
                        error!("Unable to refresh node {}: {}", node.name_any(), e);
                    }
                }
                _ => {}
            }
        }

        if cancel.is_cancelled() {
            Ok(())
        } else {
            Err(Error::Watch("node watch closed".into()))
        }
    }
}

// =============================================================================
// InitRequest Controller
// =============================================================================

/// Executes InitRequests addressed to this node
pub struct InitRequestController {
    agent: Arc<NodeAgent>,
    retry: RetryConfig,
}

impl InitRequestController {
    pub fn new(agent: Arc<NodeAgent>) -> Self {
        Self {
            agent,
            retry: RetryConfig::default(),
        }
    }

    /// Run one request to completion. Requests not in Pending are ignored.
    pub async fn process(&self, request: &DirectPVInitRequest) -> Result<()> {
        if request.init_status() != InitStatus::Pending {
            return Ok(());
        }
        let name = request.name_any();
        let requests = self.agent.clients().init_requests.clone();

        let claimed = retry_on_conflict(&self.retry, || {
            let requests = requests.clone();
            let name = name.clone();
            async move {
                let mut latest = requests.get(&name).await?;
                if latest.init_status() != InitStatus::Pending {
                    return Ok(None);
                }
                latest.status.get_or_insert_with(Default::default).status = InitStatus::Processing;
                requests.update(&latest).await.map(Some)
            }
        })
        .await?;
        let Some(processing) = claimed else {
            return Ok(());
        };
        info!(
            "Processing init request {} with {} devices",
            name,
            processing.spec.devices.len()
        );

        let results = self.agent.init_devices(&processing.spec.devices).await;

        retry_on_conflict(&self.retry, move || {
            let requests = requests.clone();
            let name = name.clone();
            let results = results.clone();
            async move {
                let mut latest = requests.get(&name).await?;
                latest.complete(results);
                requests.update(&latest).await
            }
        })
        .await?;
        Ok(())
    }

    /// Process pending requests until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Init request controller started for {}", self.agent.node_id());
        while !cancel.is_cancelled() {
            if let Err(e) = self.watch(cancel.clone()).await {
                warn!("Init request watch failed: {}; restarting", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_RESTART_DELAY) => {}
                }
            }
        }
        Ok(())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (mut events, _handle) = self
            .agent
            .clients()
            .init_request_lister()
            .node_selector(vec![self.agent.node_id().to_string()])
            .filter(|r: &DirectPVInitRequest| r.init_status() == InitStatus::Pending)
            .watch(cancel.clone())
            .await?;

        while let Some(event) = events.recv().await {
            if let WatchEvent::Applied(request) = event? {
                if let Err(e) = self.process(&request).await {
                    error!("Unable to process init request {}: {}", request.name_any(), e);
                }
            }
        }

        if cancel.is_cancelled() {
            Ok(())
        } else {
            Err(Error::Watch("init request watch closed".into()))
        }
    }
}
