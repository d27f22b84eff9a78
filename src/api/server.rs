//! Node API Server
//!
//! Serves the node API for one node agent until cancelled.

use super::rest::NodeApiRouter;
use crate::admin::Credential;
use crate::consts::NODE_API_PORT;
use crate::error::{Error, Result};
use crate::node::NodeAgent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Configuration for the node API server
#[derive(Debug, Clone)]
pub struct NodeApiServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Request timeout in seconds; formatting many devices can take a while
    pub request_timeout_secs: u64,
}

impl Default for NodeApiServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], NODE_API_PORT)),
            request_timeout_secs: 300,
        }
    }
}

pub struct NodeApiServer {
    config: NodeApiServerConfig,
    agent: Arc<NodeAgent>,
    credential: Credential,
}

impl NodeApiServer {
    pub fn new(config: NodeApiServerConfig, agent: Arc<NodeAgent>, credential: Credential) -> Self {
        Self {
            config,
            agent,
            credential,
        }
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind node API server: {}", e)))?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        let app = NodeApiRouter::new(self.agent, self.credential)
            .build()
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http());

        info!("Node API listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("Node API server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Node API server error: {}", e)))?;
        Ok(())
    }
}
