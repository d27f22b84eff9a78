//! Drive initialization across nodes
//!
//! Creates one InitRequest per node under a shared request ID, waits for
//! each node agent to finish it and always deletes the requests afterwards.

use super::{finish, Admin, InitConfig};
use crate::crd::{DirectPVInitRequest, InitDeviceResult, LabelKey};
use crate::domain::ports::WatchEvent;
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::store::LabelSelector;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one node's InitRequest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    pub request_id: String,
    pub node_id: String,
    pub failed: bool,
    pub devices: Vec<InitDeviceResult>,
}

impl From<&DirectPVInitRequest> for InitResult {
    fn from(request: &DirectPVInitRequest) -> Self {
        let devices = request.results().to_vec();
        Self {
            request_id: request.name_any(),
            node_id: request.node_id().to_string(),
            failed: devices.iter().any(|d| !d.error.is_empty()),
            devices,
        }
    }
}

impl Admin {
    /// Format the devices selected in `config`
    pub async fn init(&self, config: &InitConfig, progress: Progress) -> Result<Vec<InitResult>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let requests = config.to_init_requests(&request_id);
        if requests.is_empty() {
            return finish(progress, Err(Error::NoDrivesToInit));
        }

        let result = self.init_devices(&requests, &request_id, &progress).await;

        let selector = LabelSelector::new().with_label(LabelKey::RequestId.key(), request_id.as_str());
        if let Err(e) = self.clients.init_requests.delete_collection(&selector).await {
            warn!("Unable to delete init requests {}: {}", request_id, e);
        }
        finish(progress, result)
    }

    async fn init_devices(
        &self,
        requests: &[DirectPVInitRequest],
        request_id: &str,
        progress: &Progress,
    ) -> Result<Vec<InitResult>> {
        let total = requests.len();
        progress.start(total * 2);

        for (step, request) in requests.iter().enumerate() {
            let created = self.clients.init_requests.create(request).await?;
            progress.progress(
                format!(
                    "Processing initialization request '{}' for node '{}'",
                    created.name_any(),
                    created.node_id()
                ),
                step + 1,
                created.node_id(),
            );
        }

        let deadline = Instant::now() + self.config.watch_timeout;
        let (mut events, handle) = self
            .clients
            .init_request_lister()
            .request_id_selector(vec![request_id.to_string()])
            .watch(CancellationToken::new())
            .await?;

        let mut pending: BTreeSet<String> = requests.iter().map(|r| r.name_any()).collect();
        let mut results = Vec::with_capacity(total);
        while !pending.is_empty() {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => {
                    warn!("Init request watch error: {}; waiting", e);
                    continue;
                }
                Ok(None) => break,
                Err(_) => {
                    handle.stop();
                    return Err(Error::Timeout(format!(
                        "unable to initialize devices; no response for {}",
                        pending.into_iter().collect::<Vec<_>>().join(", ")
                    )));
                }
            };
            let request = match event {
                WatchEvent::Applied(request) if request.init_status().is_terminal() => request,
                WatchEvent::Applied(_) => continue,
                WatchEvent::Deleted(_) => break,
            };
            if pending.remove(&request.name_any()) {
                let result = InitResult::from(&request);
                progress.progress(
                    format!(
                        "Processed initialization request '{}' for node '{}'",
                        result.request_id, result.node_id
                    ),
                    total * 2 - pending.len(),
                    result.node_id.as_str(),
                );
                progress.end(result.node_id.as_str(), None);
                results.push(result);
            }
        }
        handle.stop();

        if !pending.is_empty() {
            return Err(Error::OperationFailed(format!(
                "unable to initialize devices; requests gone before completion: {}",
                pending.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        results.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        info!(
            "Initialization request {} finished on {} node(s)",
            request_id,
            results.len()
        );

        let failures: Vec<String> = results
            .iter()
            .flat_map(|result| {
                result
                    .devices
                    .iter()
                    .filter(|d| !d.error.is_empty())
                    .map(move |d| format!("{}/{}: {}", result.node_id, d.name, d.error))
            })
            .collect();
        if !failures.is_empty() {
            for failure in &failures {
                error!("Unable to initialize {}", failure);
            }
            return Err(Error::OperationFailed(format!(
                "unable to initialize devices; {}",
                failures.join("; ")
            )));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::admin_with;
    use super::super::AdminConfig;
    use super::*;
    use crate::crd::DriveStatus;
    use crate::node::agent::tests::{disk, FakeDevices, FakeFormatter};
    use crate::node::{InitRequestController, NodeAgent, NodeAgentConfig};
    use crate::store::Clients;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_init_single_drive() {
        let clients = Clients::memory();
        let sda = disk("sda", "8:0");
        let agent = NodeAgent::new(
            NodeAgentConfig {
                node_id: "n1".into(),
                ..Default::default()
            },
            FakeDevices::with(vec![sda.clone()]),
            Arc::new(FakeFormatter::default()),
            clients.clone(),
        );
        let cancel = CancellationToken::new();
        {
            let controller = InitRequestController::new(agent);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel).await });
        }

        let config = InitConfig::parse(&format!(
            "version: v1\nnodes:\n  - name: n1\n    drives:\n      - id: \"{}\"\n        name: sda\n        select: \"yes\"\n",
            sda.id("n1")
        ))
        .unwrap();
        let (admin, _) = admin_with(&clients, AdminConfig::default());

        let (progress, mut rx) = Progress::channel();
        let results = admin.init(&config, progress).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].failed);
        assert_eq!(results[0].node_id, "n1");

        let drives = clients.drive_lister().get().await.unwrap();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].drive_status(), DriveStatus::Ready);
        assert!(!drives[0].fsuuid().is_empty());

        // Requests are cleaned up
        assert!(clients.init_request_lister().get().await.unwrap().is_empty());

        let mut last = None;
        while let Some(message) = rx.recv().await {
            last = Some(message);
        }
        assert_eq!(last, Some(crate::progress::ProgressMessage::Done { error: None }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_init_fails_when_any_device_fails() {
        let clients = Clients::memory();
        let sda = disk("sda", "8:0");
        let agent = NodeAgent::new(
            NodeAgentConfig {
                node_id: "n1".into(),
                ..Default::default()
            },
            FakeDevices::with(vec![sda.clone()]),
            Arc::new(FakeFormatter::default()),
            clients.clone(),
        );
        let cancel = CancellationToken::new();
        {
            let controller = InitRequestController::new(agent);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel).await });
        }

        let config = InitConfig::parse(&format!(
            "version: v1\nnodes:\n  - name: n1\n    drives:\n      - id: \"{}\"\n        name: sda\n        select: \"yes\"\n      - id: \"8:16$gone\"\n        name: sdb\n        select: \"yes\"\n",
            sda.id("n1")
        ))
        .unwrap();
        let (admin, _) = admin_with(&clients, AdminConfig::default());

        assert_matches!(
            admin.init(&config, Progress::none()).await,
            Err(Error::OperationFailed(msg)) if msg.contains("n1/sdb") && !msg.contains("n1/sda")
        );
        // The healthy device is still initialized and requests are cleaned up
        assert_eq!(clients.drive_lister().get().await.unwrap().len(), 1);
        assert!(clients.init_request_lister().get().await.unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_init_nothing_selected() {
        let clients = Clients::memory();
        let (admin, _) = admin_with(&clients, AdminConfig::default());
        let config = InitConfig::parse(
            "version: v1\nnodes:\n  - name: n1\n    drives:\n      - id: x\n        name: sda\n        select: \"no\"\n",
        )
        .unwrap();
        assert_matches!(
            admin.init(&config, Progress::none()).await,
            Err(Error::NoDrivesToInit)
        );
    }

    #[tokio::test]
    async fn test_init_times_out_and_cleans_up() {
        let clients = Clients::memory();
        let (admin, _) = admin_with(
            &clients,
            AdminConfig {
                watch_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let config = InitConfig::parse(
            "version: v1\nnodes:\n  - name: n1\n    drives:\n      - id: \"8:0$x\"\n        name: sda\n        select: \"yes\"\n",
        )
        .unwrap();
        assert_matches!(
            admin.init(&config, Progress::none()).await,
            Err(Error::Timeout(msg)) if msg.starts_with("unable to initialize devices")
        );
        assert!(clients.init_request_lister().get().await.unwrap().is_empty());
    }
}
