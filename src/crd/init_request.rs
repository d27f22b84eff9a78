//! DirectPVInitRequest CRD
//!
//! A one-shot ticket authorizing a node agent to format specific devices.
//! All requests created by one admin invocation share a `request-id` label
//! so they can be watched and garbage-collected together.

use super::labels::{self, LabelKey};
use super::types::InitStatus;
use crate::consts::{APP_NAME, LATEST_API_VERSION};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// DirectPVInitRequest CRD
// =============================================================================

/// Devices to initialize on one node
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "directpv.min.io",
    version = "v1beta1",
    kind = "DirectPVInitRequest",
    plural = "directpvinitrequests",
    status = "DirectPVInitRequestStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".metadata.labels.directpv\\.min\\.io/node"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVInitRequestSpec {
    pub devices: Vec<InitDevice>,
}

/// A device to format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitDevice {
    /// Stable device identifier as seen by the admin
    pub id: String,

    /// Kernel device name as seen by the admin
    pub name: String,

    /// Overwrite an existing filesystem
    #[serde(default)]
    pub force: bool,
}

impl InitDevice {
    /// major:minor prefix of the device identifier
    pub fn major_minor(&self) -> Option<&str> {
        self.id
            .split_once('$')
            .map(|(mm, _)| mm)
            .filter(|mm| !mm.is_empty())
    }
}

/// Processing result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectPVInitRequestStatus {
    #[serde(default)]
    pub status: InitStatus,

    #[serde(default)]
    pub results: Vec<InitDeviceResult>,
}

/// Per-device outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitDeviceResult {
    pub name: String,

    /// Empty on success
    #[serde(default)]
    pub error: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl DirectPVInitRequest {
    /// Build a pending request for one node
    pub fn pending(name: &str, node_id: &str, request_id: &str, devices: Vec<InitDevice>) -> Self {
        let mut request = DirectPVInitRequest::new(name, DirectPVInitRequestSpec { devices });
        labels::set_reserved_label(&mut request.metadata, LabelKey::Node, node_id);
        labels::set_reserved_label(&mut request.metadata, LabelKey::RequestId, request_id);
        labels::set_reserved_label(&mut request.metadata, LabelKey::Version, LATEST_API_VERSION);
        labels::set_reserved_label(&mut request.metadata, LabelKey::CreatedBy, APP_NAME);
        request.status = Some(DirectPVInitRequestStatus::default());
        request
    }

    pub fn node_id(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::Node)
    }

    pub fn request_id(&self) -> &str {
        labels::get_label(&self.metadata, LabelKey::RequestId)
    }

    pub fn init_status(&self) -> InitStatus {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    pub fn results(&self) -> &[InitDeviceResult] {
        self.status
            .as_ref()
            .map(|s| s.results.as_slice())
            .unwrap_or_default()
    }

    /// Record results and derive the terminal status
    pub fn complete(&mut self, results: Vec<InitDeviceResult>) {
        let failed = results.iter().any(|r| !r.error.is_empty());
        self.status = Some(DirectPVInitRequestStatus {
            status: if failed {
                InitStatus::Error
            } else {
                InitStatus::Success
            },
            results,
        });
    }
}
