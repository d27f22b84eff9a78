//! Label keys and label helpers
//!
//! Every resource carries `directpv.min.io/<key>` labels that the selector
//! engine queries. Values written through these helpers are normalized so
//! they always satisfy the Kubernetes label-value grammar.

use crate::consts::GROUP_NAME;
use crate::error::{Error, Result};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Maximum length of a label value
pub const MAX_LABEL_VALUE_LEN: usize = 63;

// =============================================================================
// Label Keys
// =============================================================================

/// Reserved label keys managed by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKey {
    Node,
    DriveName,
    AccessTier,
    DriveId,
    Version,
    CreatedBy,
    PodName,
    PodNamespace,
    Identity,
    Rack,
    Zone,
    Region,
    Migrated,
    RequestId,
    Suspend,
    VolumeClaimId,
    ClaimId,
}

impl LabelKey {
    pub const ALL: [LabelKey; 17] = [
        LabelKey::Node,
        LabelKey::DriveName,
        LabelKey::AccessTier,
        LabelKey::DriveId,
        LabelKey::Version,
        LabelKey::CreatedBy,
        LabelKey::PodName,
        LabelKey::PodNamespace,
        LabelKey::Identity,
        LabelKey::Rack,
        LabelKey::Zone,
        LabelKey::Region,
        LabelKey::Migrated,
        LabelKey::RequestId,
        LabelKey::Suspend,
        LabelKey::VolumeClaimId,
        LabelKey::ClaimId,
    ];

    /// Key without the group prefix
    pub fn short(&self) -> &'static str {
        match self {
            LabelKey::Node => "node",
            LabelKey::DriveName => "drive-name",
            LabelKey::AccessTier => "access-tier",
            LabelKey::DriveId => "drive",
            LabelKey::Version => "version",
            LabelKey::CreatedBy => "created-by",
            LabelKey::PodName => "pod.name",
            LabelKey::PodNamespace => "pod.namespace",
            LabelKey::Identity => "identity",
            LabelKey::Rack => "rack",
            LabelKey::Zone => "zone",
            LabelKey::Region => "region",
            LabelKey::Migrated => "migrated",
            LabelKey::RequestId => "request-id",
            LabelKey::Suspend => "suspend",
            LabelKey::VolumeClaimId => "volume-claim-id",
            LabelKey::ClaimId => "claim-id",
        }
    }

    /// Fully qualified label key
    pub fn key(&self) -> String {
        format!("{}/{}", GROUP_NAME, self.short())
    }
}

impl std::fmt::Display for LabelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", GROUP_NAME, self.short())
    }
}

/// Check whether a fully qualified key is managed by the control plane
pub fn is_reserved_key(key: &str) -> bool {
    LabelKey::ALL.iter().any(|k| k.key() == key)
}

/// Qualify a user label key with the group prefix and reject reserved keys
pub fn user_label_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Validation("empty label key".into()));
    }

    let qualified = if key.contains('/') {
        key.to_string()
    } else {
        format!("{}/{}", GROUP_NAME, key)
    };

    let name = qualified.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name.len() > MAX_LABEL_VALUE_LEN || !is_valid_label_value(name) {
        return Err(Error::Validation(format!("invalid label key {}", key)));
    }

    if is_reserved_key(&qualified) {
        return Err(Error::Validation(format!(
            "label key {} is reserved",
            qualified
        )));
    }

    Ok(qualified)
}

// =============================================================================
// Label Values
// =============================================================================

/// Check a value against the Kubernetes label-value grammar
pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return false;
    }

    let bytes = value.as_bytes();
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Normalize an arbitrary string into a valid label value.
///
/// Valid values are returned unchanged, so the function is idempotent.
pub fn normalize_label_value(value: &str) -> String {
    if is_valid_label_value(value) {
        return value.to_string();
    }

    let mut result: Vec<char> = value.chars().take(MAX_LABEL_VALUE_LEN).collect();
    let last_index = result.len().saturating_sub(1);
    for (i, c) in result.iter_mut().enumerate() {
        if c.is_ascii_alphanumeric() {
            continue;
        }
        *c = if i == 0 || i == last_index {
            'x'
        } else if matches!(*c, '.' | '_' | '-') {
            *c
        } else {
            '-'
        };
    }

    result.into_iter().collect()
}

/// Normalize a list of values
pub fn normalize_label_values(values: &[String]) -> Vec<String> {
    values.iter().map(|v| normalize_label_value(v)).collect()
}

// =============================================================================
// Metadata Helpers
// =============================================================================

/// Set a label; returns false when the label already had this value
pub fn set_label(meta: &mut ObjectMeta, key: &str, value: &str) -> bool {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    let value = normalize_label_value(value);
    if labels.get(key) == Some(&value) {
        return false;
    }
    labels.insert(key.to_string(), value);
    true
}

/// Remove a label; returns false when the label was absent
pub fn remove_label(meta: &mut ObjectMeta, key: &str) -> bool {
    meta.labels
        .as_mut()
        .map(|labels| labels.remove(key).is_some())
        .unwrap_or(false)
}

/// Read a label value
pub fn get_label<'a>(meta: &'a ObjectMeta, key: LabelKey) -> &'a str {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(&key.key()))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Set a reserved label
pub fn set_reserved_label(meta: &mut ObjectMeta, key: LabelKey, value: &str) -> bool {
    set_label(meta, &key.key(), value)
}

// =============================================================================
// Selector Strings
// =============================================================================

/// Render `key in (v1,v2)` requirements joined by commas
pub fn to_label_selector(requirements: &BTreeMap<String, Vec<String>>) -> String {
    requirements
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(key, values)| format!("{} in ({})", key, values.join(",")))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_label_keys() {
        assert_eq!(LabelKey::Node.key(), "directpv.min.io/node");
        assert_eq!(LabelKey::DriveId.key(), "directpv.min.io/drive");
        assert_eq!(LabelKey::PodNamespace.to_string(), "directpv.min.io/pod.namespace");
        assert!(is_reserved_key("directpv.min.io/access-tier"));
        assert!(!is_reserved_key("directpv.min.io/owner"));
    }

    #[test]
    fn test_user_label_key() {
        assert_eq!(user_label_key("owner").unwrap(), "directpv.min.io/owner");
        assert_eq!(user_label_key("example.com/team").unwrap(), "example.com/team");
        assert_matches!(user_label_key("node"), Err(Error::Validation(_)));
        assert_matches!(user_label_key(""), Err(Error::Validation(_)));
        assert_matches!(user_label_key("bad key"), Err(Error::Validation(_)));
    }

    #[test]
    fn test_normalize_keeps_valid_values() {
        assert_eq!(normalize_label_value("sda"), "sda");
        assert_eq!(normalize_label_value("nvme0n1"), "nvme0n1");
        assert_eq!(normalize_label_value(""), "");
    }

    #[test]
    fn test_normalize_invalid_values() {
        assert_eq!(normalize_label_value("dm/0"), "dm-0");
        assert_eq!(normalize_label_value("_sdb"), "xsdb");
        assert_eq!(normalize_label_value("mapper/vg-lv!"), "mapper-vg-lvx");

        let long = "a".repeat(80);
        assert_eq!(normalize_label_value(&long).len(), MAX_LABEL_VALUE_LEN);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["dm/0", "_x_", "héllo wörld", "-", "a.b.c.", &"z/".repeat(40)] {
            let once = normalize_label_value(input);
            assert!(is_valid_label_value(&once), "{:?} -> {:?}", input, once);
            assert_eq!(normalize_label_value(&once), once);
        }
    }

    #[test]
    fn test_set_and_remove_label_round_trip() {
        let mut meta = ObjectMeta::default();
        meta.labels = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        let before = meta.labels.clone();

        assert!(set_label(&mut meta, "directpv.min.io/owner", "team-a"));
        assert!(!set_label(&mut meta, "directpv.min.io/owner", "team-a"));
        assert!(remove_label(&mut meta, "directpv.min.io/owner"));
        assert!(!remove_label(&mut meta, "directpv.min.io/owner"));
        assert_eq!(meta.labels, before);
    }

    #[test]
    fn test_to_label_selector() {
        let mut reqs = BTreeMap::new();
        reqs.insert(LabelKey::Node.key(), vec!["n1".to_string(), "n2".to_string()]);
        reqs.insert(LabelKey::DriveName.key(), vec![]);
        reqs.insert(LabelKey::AccessTier.key(), vec!["Hot".to_string()]);
        assert_eq!(
            to_label_selector(&reqs),
            "directpv.min.io/access-tier in (Hot),directpv.min.io/node in (n1,n2)"
        );
    }
}
