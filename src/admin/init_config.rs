//! Init config document
//!
//! The YAML file produced by discover and consumed by init. Operators edit
//! it to choose which devices to format.

use crate::crd::{DirectPVInitRequest, InitDevice, NodeDevice};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Version written and accepted
pub const INIT_CONFIG_VERSION: &str = "v1";

/// Value of `select` marking a drive for initialization
pub const DRIVE_SELECTED_VALUE: &str = "yes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitConfig {
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub drives: Vec<DriveInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub make: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fs: String,
    #[serde(default)]
    pub select: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            version: INIT_CONFIG_VERSION.to_string(),
            nodes: Vec::new(),
        }
    }
}

impl InitConfig {
    /// Parse and check the version
    pub fn parse(text: &str) -> Result<Self> {
        let config: InitConfig = serde_yaml::from_str(text)?;
        if config.version != INIT_CONFIG_VERSION {
            return Err(Error::UnsupportedInitConfigVersion(config.version));
        }
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Build a config from discovered devices; denied devices are left out
    /// and every other device is pre-selected.
    pub fn from_devices(devices: &BTreeMap<String, Vec<NodeDevice>>) -> Self {
        let nodes = devices
            .iter()
            .map(|(node, devices)| NodeInfo {
                name: node.clone(),
                drives: devices
                    .iter()
                    .filter(|d| d.is_available())
                    .map(|d| DriveInfo {
                        id: d.id.clone(),
                        name: d.name.clone(),
                        size: d.size,
                        make: d.make.clone(),
                        fs: d.fs_type.clone(),
                        select: DRIVE_SELECTED_VALUE.to_string(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Selected devices per node; nodes with nothing selected are omitted.
    /// A device that already carries a filesystem is formatted with force.
    pub fn selected_devices(&self) -> BTreeMap<String, Vec<InitDevice>> {
        let mut selected = BTreeMap::new();
        for node in &self.nodes {
            let devices: Vec<InitDevice> = node
                .drives
                .iter()
                .filter(|d| d.select.to_lowercase() == DRIVE_SELECTED_VALUE)
                .map(|d| InitDevice {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    force: !d.fs.is_empty(),
                })
                .collect();
            if !devices.is_empty() {
                selected.insert(node.name.clone(), devices);
            }
        }
        selected
    }

    /// One pending InitRequest per node, all sharing `request_id`
    pub fn to_init_requests(&self, request_id: &str) -> Vec<DirectPVInitRequest> {
        let prefix = request_id.split('-').next().unwrap_or(request_id);
        self.selected_devices()
            .into_iter()
            .map(|(node, devices)| {
                let name = format!("{}-{}", node, prefix);
                DirectPVInitRequest::pending(&name, &node, request_id, devices)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const CONFIG: &str = r#"
version: v1
nodes:
  - name: node-1
    drives:
      - id: "8:0$abc"
        name: sda
        size: 1073741824
        make: QEMU
        select: "YES"
      - id: "8:16$def"
        name: sdb
        fs: ext4
        select: "yes"
      - id: "8:32$ghi"
        name: sdc
        select: "no"
  - name: node-2
    drives:
      - id: "8:0$jkl"
        name: sda
        select: ""
"#;

    #[test]
    fn test_parse_and_select() {
        let config = InitConfig::parse(CONFIG).unwrap();
        let selected = config.selected_devices();
        assert_eq!(selected.len(), 1);
        let devices = &selected["node-1"];
        assert_eq!(devices.len(), 2);
        assert!(!devices[0].force);
        assert!(devices[1].force);
    }

    #[test]
    fn test_unsupported_version() {
        assert_matches!(
            InitConfig::parse("version: v2\nnodes: []\n"),
            Err(Error::UnsupportedInitConfigVersion(v)) if v == "v2"
        );
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config = InitConfig::parse("version: v1\nextra: 1\nnodes: []\n").unwrap();
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = InitConfig::parse(CONFIG).unwrap();
        let again = InitConfig::parse(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_from_devices_skips_denied() {
        let mut devices = BTreeMap::new();
        devices.insert(
            "node-1".to_string(),
            vec![
                NodeDevice {
                    name: "sda".into(),
                    id: "8:0$abc".into(),
                    size: 1 << 30,
                    ..Default::default()
                },
                NodeDevice {
                    name: "sdb".into(),
                    id: "8:16$def".into(),
                    denied_reason: "mounted".into(),
                    ..Default::default()
                },
            ],
        );
        let config = InitConfig::from_devices(&devices);
        assert_eq!(config.version, INIT_CONFIG_VERSION);
        assert_eq!(config.nodes[0].drives.len(), 1);
        assert_eq!(config.nodes[0].drives[0].select, DRIVE_SELECTED_VALUE);
    }

    #[test]
    fn test_init_requests_share_request_id() {
        let mut config = InitConfig::parse(CONFIG).unwrap();
        config.nodes[1].drives[0].select = "yes".into();
        let requests = config.to_init_requests("0f8fad5b-d9cb-469f-a165-70867728950e");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].metadata.name.as_deref(), Some("node-1-0f8fad5b"));
        assert!(requests
            .iter()
            .all(|r| r.request_id() == "0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert_eq!(requests[1].node_id(), "node-2");
    }
}
