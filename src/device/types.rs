//! Block device record
//!
//! What a probe observes about one device, plus the derived identity,
//! vendor hint and format denial reasons.

use crate::consts::{APP_PRETTY_NAME, MIN_SUPPORTED_DEVICE_SIZE};
use crate::crd::NodeDevice;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Observed block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub major_minor: String,
    /// Size in bytes
    pub size: u64,
    pub hidden: bool,
    pub removable: bool,
    pub read_only: bool,
    pub partitioned: bool,
    pub holders: Vec<String>,
    pub mount_points: Vec<String>,
    pub swap_on: bool,
    pub cdrom: bool,
    pub dm_name: String,
    #[serde(default)]
    pub udev_data: BTreeMap<String, String>,
}

impl Device {
    /// Device node path
    pub fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    pub fn fs_type(&self) -> &str {
        self.udev("E:ID_FS_TYPE")
    }

    pub fn fsuuid(&self) -> &str {
        self.udev("E:ID_FS_UUID")
    }

    /// Partition number from udev; 0 for whole disks
    pub fn partition_number(&self) -> u32 {
        self.udev("E:ID_PART_ENTRY_NUMBER").parse().unwrap_or(0)
    }

    fn udev(&self, key: &str) -> &str {
        self.udev_data.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Stable identifier: `<maj:min>$<base64(sha256)>` over every observed property
    pub fn id(&self, node_id: &str) -> String {
        let mut holders = self.holders.clone();
        holders.sort();
        let mut mount_points = self.mount_points.clone();
        mount_points.sort();

        let udev_data = self
            .udev_data
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";");

        let fields: BTreeMap<&str, String> = [
            ("node", node_id.to_string()),
            ("name", self.name.clone()),
            ("majorminor", self.major_minor.clone()),
            ("size", self.size.to_string()),
            ("hidden", self.hidden.to_string()),
            ("removable", self.removable.to_string()),
            ("readonly", self.read_only.to_string()),
            ("partitioned", self.partitioned.to_string()),
            ("holders", holders.join(",")),
            ("mountpoints", mount_points.join(",")),
            ("swapon", self.swap_on.to_string()),
            ("cdrom", self.cdrom.to_string()),
            ("dmname", self.dm_name.clone()),
            ("udevdata", udev_data),
        ]
        .into_iter()
        .collect();

        let text = fields
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        let digest = Sha256::digest(text.as_bytes());
        format!("{}${}", self.major_minor, STANDARD.encode(digest))
    }

    /// Vendor/model hint
    pub fn make(&self) -> String {
        let mut tokens: Vec<String> = Vec::new();
        for value in [
            self.dm_name.as_str(),
            self.udev("E:ID_VENDOR"),
            self.udev("E:ID_MODEL"),
        ] {
            if !value.is_empty() {
                tokens.push(value.to_string());
            }
        }
        if let Some(number) = self.udev_data.get("E:ID_PART_ENTRY_NUMBER") {
            tokens.push(format!("(Part {})", number));
        }
        tokens.join(" ")
    }

    /// Local reasons the device may not be formatted, in reporting order
    pub fn local_denied_reasons(&self) -> Vec<String> {
        let checks = [
            (self.size < MIN_SUPPORTED_DEVICE_SIZE, "Too small"),
            (self.hidden, "Hidden"),
            (self.read_only, "Read only"),
            (self.partitioned, "Partitioned"),
            (!self.holders.is_empty(), "Held by other device"),
            (!self.mount_points.is_empty(), "Mounted"),
            (self.swap_on, "Swap"),
            (self.cdrom, "CDROM"),
        ];
        checks
            .iter()
            .filter(|(denied, _)| *denied)
            .map(|(_, reason)| reason.to_string())
            .collect()
    }

    /// Carries our filesystem and could belong to an existing drive
    pub fn may_be_adopted(&self) -> bool {
        self.fs_type() == "xfs" && !self.fsuuid().is_empty()
    }

    /// Record advertised on the Node resource
    pub fn to_node_device(&self, node_id: &str, denied_reason: String) -> NodeDevice {
        NodeDevice {
            name: self.name.clone(),
            id: self.id(node_id),
            major_minor: self.major_minor.clone(),
            size: self.size,
            make: self.make(),
            fs_type: self.fs_type().to_string(),
            fsuuid: self.fsuuid().to_string(),
            denied_reason,
        }
    }
}

/// Reason reported for a device formatted by an existing drive
pub fn used_by_app_reason() -> String {
    format!("Used by {}", APP_PRETTY_NAME)
}
