//! Custom Resource Definitions for DirectPV
//!
//! This module contains all CRD types:
//! - DirectPVDrive: a formatted, adopted block device
//! - DirectPVVolume: a provisioned slice of a drive
//! - DirectPVNode: a node's advertised device inventory
//! - DirectPVInitRequest: a one-shot format ticket for a node

pub mod drive;
pub mod init_request;
pub mod labels;
pub mod node;
pub mod types;
pub mod volume;

pub use drive::*;
pub use init_request::*;
pub use labels::{LabelKey, normalize_label_value};
pub use node::*;
pub use types::*;
pub use volume::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// CRD manifests as installed on the API server.
///
/// The status subresource is removed so a single update writes labels,
/// finalizers, spec and status together.
pub fn crds() -> Vec<CustomResourceDefinition> {
    let mut crds = vec![
        DirectPVDrive::crd(),
        DirectPVVolume::crd(),
        DirectPVNode::crd(),
        DirectPVInitRequest::crd(),
    ];
    for crd in crds.iter_mut() {
        for version in crd.spec.versions.iter_mut() {
            version.subresources = None;
        }
    }
    crds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_manifests() {
        let crds = crds();
        let names: Vec<_> = crds
            .iter()
            .map(|c| c.metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                "directpvdrives.directpv.min.io",
                "directpvvolumes.directpv.min.io",
                "directpvnodes.directpv.min.io",
                "directpvinitrequests.directpv.min.io",
            ]
        );
        for crd in &crds {
            assert_eq!(crd.spec.scope, "Cluster");
            assert!(crd.spec.versions.iter().all(|v| v.subresources.is_none()));
            assert!(crd.spec.versions.iter().all(|v| v.name == "v1beta1"));
        }
    }
}
