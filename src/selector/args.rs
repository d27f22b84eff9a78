//! Command argument compilation
//!
//! Turns raw user input into validated, expanded selector values. Every
//! check here runs before any resource store call.

use super::ellipsis;
use crate::consts::GROUP_NAME;
use crate::crd::labels::is_valid_label_value;
use crate::crd::{AccessTier, DriveStatus, VolumeStatus};
use crate::error::{Error, Result};
use crate::store::{DriveLister, VolumeLister};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Strip a leading `/dev/` from a device name
pub fn trim_dev_prefix(name: &str) -> &str {
    name.strip_prefix("/dev/").unwrap_or(name)
}

fn expand_all(args: &[String], what: &str, trim: fn(&str) -> &str) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for arg in args {
        let arg = trim(arg.trim()).trim();
        if arg.is_empty() {
            return Err(Error::Validation(format!("empty {}", what)));
        }
        for value in ellipsis::expand(arg)? {
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }
    Ok(values)
}

fn identity(value: &str) -> &str {
    value
}

pub fn parse_node_args(args: &[String]) -> Result<Vec<String>> {
    expand_all(args, "node name", identity)
}

pub fn parse_drive_name_args(args: &[String]) -> Result<Vec<String>> {
    expand_all(args, "drive name", trim_dev_prefix)
}

pub fn parse_pod_name_args(args: &[String]) -> Result<Vec<String>> {
    expand_all(args, "pod name", identity)
}

pub fn parse_pod_namespace_args(args: &[String]) -> Result<Vec<String>> {
    expand_all(args, "pod namespace", identity)
}

/// Volume names are taken literally
pub fn parse_volume_name_args(args: &[String]) -> Result<Vec<String>> {
    args.iter()
        .map(|arg| {
            let arg = arg.trim();
            if arg.is_empty() {
                Err(Error::Validation("empty name".into()))
            } else {
                Ok(arg.to_string())
            }
        })
        .collect()
}

/// Drive IDs must be UUIDs
pub fn parse_drive_id_args(args: &[String]) -> Result<Vec<String>> {
    args.iter()
        .map(|arg| {
            let arg = arg.trim();
            if arg.is_empty() {
                return Err(Error::Validation("empty drive ID".into()));
            }
            uuid::Uuid::parse_str(arg)
                .map(|_| arg.to_string())
                .map_err(|_| Error::Validation(format!("invalid drive ID {}", arg)))
        })
        .collect()
}

fn parse_enum_args<T: FromStr<Err = Error>>(args: &[String]) -> Result<Vec<T>> {
    args.iter().map(|arg| arg.trim().parse()).collect()
}

pub fn parse_drive_status_args(args: &[String]) -> Result<Vec<DriveStatus>> {
    parse_enum_args(args)
}

pub fn parse_volume_status_args(args: &[String]) -> Result<Vec<VolumeStatus>> {
    parse_enum_args(args)
}

pub fn parse_access_tier_args(args: &[String]) -> Result<Vec<AccessTier>> {
    parse_enum_args(args)
}

/// Qualify a label key with the group when it has no prefix
pub fn qualify_label_key(key: &str) -> Result<String> {
    let key = key.trim();
    let name = key.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || !is_valid_label_value(name) {
        return Err(Error::Validation(format!("invalid label key {}", key)));
    }
    Ok(if key.contains('/') {
        key.to_string()
    } else {
        format!("{}/{}", GROUP_NAME, key)
    })
}

/// Parse `key=value` label selectors
pub fn parse_label_args(args: &[String]) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .filter(|(_, v)| !v.contains('='))
            .ok_or_else(|| Error::Validation(format!("invalid label {}", arg)))?;
        let value = value.trim();
        if !is_valid_label_value(value) {
            return Err(Error::Validation(format!("invalid label value {}", value)));
        }
        labels.insert(qualify_label_key(key)?, value.to_string());
    }
    Ok(labels)
}

// =============================================================================
// Selections
// =============================================================================

/// Compiled drive selection shared by drive-targeting operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveSelection {
    pub nodes: Vec<String>,
    pub drive_names: Vec<String>,
    pub drive_ids: Vec<String>,
    pub statuses: Vec<DriveStatus>,
    pub access_tiers: Vec<AccessTier>,
    pub labels: BTreeMap<String, String>,
    pub all: bool,
}

/// Raw drive-selection arguments
#[derive(Debug, Clone, Default)]
pub struct DriveSelectorArgs {
    pub nodes: Vec<String>,
    pub drives: Vec<String>,
    pub drive_ids: Vec<String>,
    pub statuses: Vec<String>,
    pub access_tiers: Vec<String>,
    pub labels: Vec<String>,
    pub all: bool,
}

impl DriveSelectorArgs {
    /// Validate and expand the arguments
    pub fn compile(&self) -> Result<DriveSelection> {
        let selection = DriveSelection {
            nodes: parse_node_args(&self.nodes)?,
            drive_names: parse_drive_name_args(&self.drives)?,
            drive_ids: parse_drive_id_args(&self.drive_ids)?,
            statuses: parse_drive_status_args(&self.statuses)?,
            access_tiers: parse_access_tier_args(&self.access_tiers)?,
            labels: parse_label_args(&self.labels)?,
            all: self.all,
        };
        if !selection.all && selection.is_empty() {
            return Err(Error::Validation("no drive selected".into()));
        }
        Ok(selection)
    }
}

impl DriveSelection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.drive_names.is_empty()
            && self.drive_ids.is_empty()
            && self.statuses.is_empty()
            && self.access_tiers.is_empty()
            && self.labels.is_empty()
    }

    /// Apply to a drive lister
    pub fn apply(&self, lister: DriveLister) -> DriveLister {
        lister
            .node_selector(self.nodes.clone())
            .drive_name_selector(self.drive_names.clone())
            .drive_id_selector(self.drive_ids.clone())
            .status_selector(self.statuses.clone())
            .access_tier_selector(self.access_tiers.clone())
            .label_selector(self.labels.clone())
    }
}

/// Compiled volume selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeSelection {
    pub nodes: Vec<String>,
    pub drive_names: Vec<String>,
    pub drive_ids: Vec<String>,
    pub pod_names: Vec<String>,
    pub pod_namespaces: Vec<String>,
    pub statuses: Vec<VolumeStatus>,
    pub volume_names: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub all: bool,
}

/// Raw volume-selection arguments
#[derive(Debug, Clone, Default)]
pub struct VolumeSelectorArgs {
    pub nodes: Vec<String>,
    pub drives: Vec<String>,
    pub drive_ids: Vec<String>,
    pub pod_names: Vec<String>,
    pub pod_namespaces: Vec<String>,
    pub statuses: Vec<String>,
    pub volumes: Vec<String>,
    pub labels: Vec<String>,
    pub all: bool,
}

impl VolumeSelectorArgs {
    pub fn compile(&self) -> Result<VolumeSelection> {
        let selection = VolumeSelection {
            nodes: parse_node_args(&self.nodes)?,
            drive_names: parse_drive_name_args(&self.drives)?,
            drive_ids: parse_drive_id_args(&self.drive_ids)?,
            pod_names: parse_pod_name_args(&self.pod_names)?,
            pod_namespaces: parse_pod_namespace_args(&self.pod_namespaces)?,
            statuses: parse_volume_status_args(&self.statuses)?,
            volume_names: parse_volume_name_args(&self.volumes)?,
            labels: parse_label_args(&self.labels)?,
            all: self.all,
        };
        if !selection.all && selection.is_empty() {
            return Err(Error::Validation("no volume selected".into()));
        }
        Ok(selection)
    }
}

impl VolumeSelection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.drive_names.is_empty()
            && self.drive_ids.is_empty()
            && self.pod_names.is_empty()
            && self.pod_namespaces.is_empty()
            && self.statuses.is_empty()
            && self.volume_names.is_empty()
            && self.labels.is_empty()
    }

    pub fn apply(&self, lister: VolumeLister) -> VolumeLister {
        lister
            .node_selector(self.nodes.clone())
            .drive_name_selector(self.drive_names.clone())
            .drive_id_selector(self.drive_ids.clone())
            .pod_name_selector(self.pod_names.clone())
            .pod_namespace_selector(self.pod_namespaces.clone())
            .status_selector(self.statuses.clone())
            .volume_name_selector(self.volume_names.clone())
            .label_selector(self.labels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_node_and_drive_args() {
        assert_eq!(
            parse_node_args(&args(&["node-{1...2}", " node-3 "])).unwrap(),
            args(&["node-1", "node-2", "node-3"])
        );
        assert_eq!(
            parse_drive_name_args(&args(&["/dev/sd{a...b}", "nvme0n1"])).unwrap(),
            args(&["sda", "sdb", "nvme0n1"])
        );
        assert_matches!(
            parse_node_args(&args(&[" "])),
            Err(Error::Validation(msg)) if msg == "empty node name"
        );
        assert_matches!(
            parse_drive_name_args(&args(&["/dev/"])),
            Err(Error::Validation(msg)) if msg == "empty drive name"
        );
        assert_matches!(
            parse_drive_name_args(&args(&["xvd{b...}"])),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_status_and_tier_args() {
        assert_eq!(
            parse_drive_status_args(&args(&["ready", "LOST"])).unwrap(),
            vec![DriveStatus::Ready, DriveStatus::Lost]
        );
        assert_matches!(
            parse_drive_status_args(&args(&["bogus"])),
            Err(Error::Validation(msg)) if msg.starts_with("unknown drive status")
        );
        assert_eq!(
            parse_access_tier_args(&args(&["hot"])).unwrap(),
            vec![AccessTier::Hot]
        );
    }

    #[test]
    fn test_drive_id_and_label_args() {
        let id = "2b7d7c6e-7a4c-4f7a-9a3e-9d7b2a1c0f11";
        assert_eq!(parse_drive_id_args(&args(&[id])).unwrap(), args(&[id]));
        assert_matches!(
            parse_drive_id_args(&args(&["not-a-uuid"])),
            Err(Error::Validation(_))
        );

        let labels = parse_label_args(&args(&["tier=fast", "example.com/rack=r1"])).unwrap();
        assert_eq!(labels["directpv.min.io/tier"], "fast");
        assert_eq!(labels["example.com/rack"], "r1");
        assert_matches!(parse_label_args(&args(&["novalue"])), Err(Error::Validation(_)));
    }

    #[test]
    fn test_empty_selection_requires_all() {
        assert_matches!(
            DriveSelectorArgs::default().compile(),
            Err(Error::Validation(msg)) if msg == "no drive selected"
        );
        let all = DriveSelectorArgs {
            all: true,
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(all.is_empty());

        assert_matches!(
            VolumeSelectorArgs::default().compile(),
            Err(Error::Validation(msg)) if msg == "no volume selected"
        );
    }
}
