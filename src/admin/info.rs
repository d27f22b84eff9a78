//! Installation summary per node

use super::Admin;
use crate::consts::GROUP_NAME;
use crate::error::{Error, Result};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLevelInfo {
    pub drive_count: usize,
    pub drive_size: u64,
    /// Published volumes only
    pub volume_count: usize,
    pub volume_size: u64,
}

impl Admin {
    /// Drive and published-volume totals keyed by node
    pub async fn info(&self) -> Result<BTreeMap<String, NodeLevelInfo>> {
        let crds = self.cluster.installation.crd_names().await?;
        for plural in ["directpvdrives", "directpvvolumes"] {
            let name = format!("{}.{}", plural, GROUP_NAME);
            if !crds.contains(&name) {
                return Err(Error::InstallationIncomplete(format!("CRD {} not found", name)));
            }
        }

        let nodes = self.clients.node_lister().get().await?;
        if nodes.is_empty() {
            return Err(Error::InstallationIncomplete("no nodes found".into()));
        }

        let mut info: BTreeMap<String, NodeLevelInfo> = nodes
            .iter()
            .map(|n| (n.name_any(), NodeLevelInfo::default()))
            .collect();

        for drive in self.clients.drive_lister().get().await? {
            if let Some(node) = info.get_mut(drive.node_id()) {
                node.drive_count += 1;
                node.drive_size += drive.total_capacity();
            }
        }
        for volume in self.clients.volume_lister().get().await? {
            if !volume.is_published() {
                continue;
            }
            if let Some(node) = info.get_mut(volume.node_id()) {
                node.volume_count += 1;
                node.volume_size += volume.total_capacity();
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::admin;
    use super::*;
    use crate::crd::{DirectPVNode, VolumeStatus};
    use crate::lifecycle::drive::tests::{create_drive, create_volume};
    use crate::store::Clients;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_info_requires_crds() {
        let clients = Clients::memory();
        let (admin, cluster) = admin(&clients);
        cluster.crds.lock().push(format!("directpvdrives.{}", GROUP_NAME));
        assert_matches!(admin.info().await, Err(Error::InstallationIncomplete(msg)) if msg.contains("directpvvolumes"));
    }

    #[tokio::test]
    async fn test_info_totals() {
        let clients = Clients::memory();
        let (admin, cluster) = admin(&clients);
        cluster.crds.lock().extend([
            format!("directpvdrives.{}", GROUP_NAME),
            format!("directpvvolumes.{}", GROUP_NAME),
        ]);
        assert_matches!(admin.info().await, Err(Error::InstallationIncomplete(_)));

        for node in ["n1", "n2"] {
            clients
                .nodes
                .create(&DirectPVNode::with_devices(node, vec![]))
                .await
                .unwrap();
        }
        create_drive(&clients, "d1", "n1", "sda", 4 << 30).await;
        create_drive(&clients, "d2", "n1", "sdb", 2 << 30).await;
        let mut published = create_volume(&clients, "v1", "d1", 1 << 30, VolumeStatus::Ready).await;
        published.status_mut().target_path = "/var/lib/kubelet/pods/p/volumes/v1".into();
        clients.volumes.update(&published).await.unwrap();
        create_volume(&clients, "v2", "d1", 1 << 30, VolumeStatus::Ready).await;

        let info = admin.info().await.unwrap();
        assert_eq!(
            info["n1"],
            NodeLevelInfo {
                drive_count: 2,
                drive_size: 6 << 30,
                volume_count: 1,
                volume_size: 1 << 30,
            }
        );
        assert_eq!(info["n2"], NodeLevelInfo::default());
    }
}
