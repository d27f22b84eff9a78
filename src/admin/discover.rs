//! Device discovery across nodes
//!
//! Sets `spec.refresh` on each selected Node and waits, bounded by the
//! watch timeout, for every node agent to clear it after re-probing.

use super::{finish, Admin};
use crate::crd::{DirectPVNode, NodeDevice};
use crate::domain::ports::WatchEvent;
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::store::retry_on_conflict;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Nodes and drive names to discover; empty means all
#[derive(Debug, Clone, Default)]
pub struct DiscoverArgs {
    pub nodes: Vec<String>,
    pub drives: Vec<String>,
}

impl Admin {
    /// Refresh the selected nodes and collect their devices, keyed by node
    pub async fn discover(
        &self,
        args: &DiscoverArgs,
        progress: Progress,
    ) -> Result<BTreeMap<String, Vec<NodeDevice>>> {
        let result = self.discover_devices(args, &progress).await;
        finish(progress, result)
    }

    async fn discover_devices(
        &self,
        args: &DiscoverArgs,
        progress: &Progress,
    ) -> Result<BTreeMap<String, Vec<NodeDevice>>> {
        let nodes = self
            .clients
            .node_lister()
            .node_selector(args.nodes.clone())
            .ignore_not_found(true)
            .get()
            .await?;
        if nodes.is_empty() {
            if args.nodes.is_empty() {
                return Err(Error::NoMatchingResourcesFound);
            }
            return Err(Error::NotFound {
                kind: "node".into(),
                name: args.nodes.join(","),
            });
        }

        let names: Vec<String> = nodes.iter().map(|n| n.name_any()).collect();
        progress.start(names.len() * 2);
        for (step, name) in names.iter().enumerate() {
            self.request_refresh(name).await?;
            progress.progress(format!("Discovering node '{}'", name), step + 1, name.as_str());
        }

        let deadline = Instant::now() + self.config.watch_timeout;
        let cancel = CancellationToken::new();
        let (mut events, handle) = self
            .clients
            .node_lister()
            .node_selector(names.clone())
            .watch(cancel.clone())
            .await?;

        let mut pending: BTreeSet<String> = names.iter().cloned().collect();
        let mut devices = BTreeMap::new();
        while !pending.is_empty() {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => {
                    warn!("Node watch error: {}; waiting", e);
                    continue;
                }
                Ok(None) => break,
                Err(_) => {
                    handle.stop();
                    return Err(Error::Timeout(format!(
                        "unable to complete the discovery; nodes not responding: {}",
                        pending.into_iter().collect::<Vec<_>>().join(", ")
                    )));
                }
            };
            let node = match event {
                WatchEvent::Applied(node) if !node.spec.refresh => node,
                WatchEvent::Applied(_) => continue,
                WatchEvent::Deleted(node) => {
                    return Err(Error::State(format!(
                        "node {} deleted during discovery",
                        node.name_any()
                    )))
                }
            };
            let name = node.name_any();
            if pending.remove(&name) {
                debug!("Node {} refreshed", name);
                progress.progress(
                    format!("Discovered node '{}'", name),
                    names.len() * 2 - pending.len(),
                    name.as_str(),
                );
                progress.end(name.as_str(), None);
                devices.insert(name, node.devices_by_names(&args.drives));
            }
        }
        handle.stop();

        if !pending.is_empty() {
            return Err(Error::Watch("node watch closed during discovery".into()));
        }
        info!("Discovered devices on {} node(s)", devices.len());
        Ok(devices)
    }

    async fn request_refresh(&self, name: &str) -> Result<DirectPVNode> {
        let nodes = &self.clients.nodes;
        retry_on_conflict(&self.config.retry, move || async move {
            let mut node = nodes.get(name).await?;
            node.spec.refresh = true;
            nodes.update(&node).await
        })
        .await
    }
}
