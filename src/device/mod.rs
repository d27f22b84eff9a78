//! Device probe
//!
//! Read-only observation of the node's block devices and the rules that
//! decide whether a device may be formatted.

pub mod probe;
pub mod sysfs;
pub mod types;

pub use probe::{DeviceProber, ProbeConfig};
pub use types::{used_by_app_reason, Device};

use crate::crd::NodeDevice;
use crate::domain::ports::DriveStore;

/// Full denial reason for a device, including the drive ownership check
pub async fn denied_reason(device: &Device, drives: &DriveStore) -> String {
    let mut reasons = device.local_denied_reasons();
    if device.may_be_adopted() {
        match drives.get(device.fsuuid()).await {
            Ok(_) => reasons.push(used_by_app_reason()),
            Err(e) if e.is_not_found() => {}
            Err(e) => reasons.push(format!("internal error; {}", e)),
        }
    }
    reasons.join("; ")
}

/// Convert probed devices into the records advertised on the Node resource
pub async fn node_devices(node_id: &str, devices: &[Device], drives: &DriveStore) -> Vec<NodeDevice> {
    let mut records = Vec::with_capacity(devices.len());
    for device in devices {
        let reason = denied_reason(device, drives).await;
        records.push(device.to_node_device(node_id, reason));
    }
    records
}
