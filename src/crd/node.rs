//! DirectPVNode CRD
//!
//! A worker node's advertised device inventory. Setting `spec.refresh` is
//! the signal for the node agent to re-probe and publish `status.devices`.

use super::labels::{self, LabelKey};
use crate::consts::{APP_NAME, LATEST_API_VERSION};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// DirectPVNode CRD
// =============================================================================

/// Desired state of a node inventory
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "directpv.min.io",
    version = "v1beta1",
    kind = "DirectPVNode",
    plural = "directpvnodes",
    status = "DirectPVNodeStatus",
    printcolumn = r#"{"name": "Refresh", "type": "boolean", "jsonPath": ".spec.refresh"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVNodeSpec {
    /// Request a re-probe of the node's devices
    #[serde(default)]
    pub refresh: bool,
}

/// Observed device inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVNodeStatus {
    #[serde(default)]
    pub devices: Vec<NodeDevice>,
}

/// Device record advertised by a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDevice {
    /// Kernel device name
    pub name: String,

    /// Stable device identifier (`maj:min$hash`)
    pub id: String,

    pub major_minor: String,

    /// Size in bytes
    pub size: u64,

    #[serde(default)]
    pub make: String,

    #[serde(default)]
    pub fs_type: String,

    #[serde(default)]
    pub fsuuid: String,

    /// Non-empty when the device may not be formatted
    #[serde(default)]
    pub denied_reason: String,
}

impl NodeDevice {
    /// Eligible for initialization
    pub fn is_available(&self) -> bool {
        self.denied_reason.is_empty()
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl DirectPVNode {
    /// Build a node inventory record
    pub fn with_devices(node_id: &str, devices: Vec<NodeDevice>) -> Self {
        let mut node = DirectPVNode::new(node_id, DirectPVNodeSpec::default());
        labels::set_reserved_label(&mut node.metadata, LabelKey::Node, node_id);
        labels::set_reserved_label(&mut node.metadata, LabelKey::Version, LATEST_API_VERSION);
        labels::set_reserved_label(&mut node.metadata, LabelKey::CreatedBy, APP_NAME);
        node.status = Some(DirectPVNodeStatus { devices });
        node
    }

    pub fn devices(&self) -> &[NodeDevice] {
        self.status
            .as_ref()
            .map(|s| s.devices.as_slice())
            .unwrap_or_default()
    }

    /// Devices whose kernel name is in `names`; all devices when empty
    pub fn devices_by_names(&self, names: &[String]) -> Vec<NodeDevice> {
        self.devices()
            .iter()
            .filter(|d| names.is_empty() || names.contains(&d.name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_devices_by_names() {
        let node = DirectPVNode::with_devices(
            "node-1",
            vec![
                NodeDevice {
                    name: "sda".into(),
                    id: "8:0$abc".into(),
                    major_minor: "8:0".into(),
                    size: 1 << 30,
                    ..Default::default()
                },
                NodeDevice {
                    name: "sdb".into(),
                    id: "8:16$def".into(),
                    major_minor: "8:16".into(),
                    size: 1 << 20,
                    denied_reason: "Too small".into(),
                    ..Default::default()
                },
            ],
        );

        assert_eq!(node.name_any(), "node-1");
        assert_eq!(node.devices_by_names(&[]).len(), 2);
        let sdb = node.devices_by_names(&["sdb".to_string()]);
        assert_eq!(sdb.len(), 1);
        assert!(!sdb[0].is_available());
        assert!(!node.spec.refresh);
    }
}
