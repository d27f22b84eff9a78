//! Shared CRD value types
//!
//! Status and access-tier enums used across Drive, Volume and InitRequest
//! resources. All of them parse case-insensitively and canonicalize to
//! title case.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Canonicalize a user value to title case ("rEaDy" -> "Ready")
pub fn to_title_case(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Drive Status
// =============================================================================

/// Lifecycle state of a managed drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DriveStatus {
    #[default]
    Ready,
    Lost,
    Error,
    Released,
    Moving,
    Removed,
}

impl DriveStatus {
    pub const ALL: [DriveStatus; 6] = [
        DriveStatus::Ready,
        DriveStatus::Lost,
        DriveStatus::Error,
        DriveStatus::Released,
        DriveStatus::Moving,
        DriveStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriveStatus::Ready => "Ready",
            DriveStatus::Lost => "Lost",
            DriveStatus::Error => "Error",
            DriveStatus::Released => "Released",
            DriveStatus::Moving => "Moving",
            DriveStatus::Removed => "Removed",
        }
    }
}

impl std::fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriveStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let canonical = to_title_case(value);
        DriveStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == canonical)
            .ok_or_else(|| Error::Validation(format!("unknown drive status {}", value)))
    }
}

// =============================================================================
// Volume Status
// =============================================================================

/// Provisioning state of a volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum VolumeStatus {
    #[default]
    Pending,
    Ready,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Pending => "Pending",
            VolumeStatus::Ready => "Ready",
        }
    }
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match to_title_case(value).as_str() {
            "Pending" => Ok(VolumeStatus::Pending),
            "Ready" => Ok(VolumeStatus::Ready),
            _ => Err(Error::Validation(format!("unknown volume status {}", value))),
        }
    }
}

// =============================================================================
// Access Tier
// =============================================================================

/// User-assigned scheduling hint for drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AccessTier {
    #[default]
    Default,
    Warm,
    Hot,
    Cold,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Default => "Default",
            AccessTier::Warm => "Warm",
            AccessTier::Hot => "Hot",
            AccessTier::Cold => "Cold",
        }
    }
}

impl std::fmt::Display for AccessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessTier {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match to_title_case(value).as_str() {
            "Default" => Ok(AccessTier::Default),
            "Warm" => Ok(AccessTier::Warm),
            "Hot" => Ok(AccessTier::Hot),
            "Cold" => Ok(AccessTier::Cold),
            _ => Err(Error::Validation(format!("unknown access tier {}", value))),
        }
    }
}

// =============================================================================
// Init Status
// =============================================================================

/// Processing state of an InitRequest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum InitStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Error,
}

impl InitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitStatus::Pending => "Pending",
            InitStatus::Processing => "Processing",
            InitStatus::Success => "Success",
            InitStatus::Error => "Error",
        }
    }

    /// Terminal states are never left once reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, InitStatus::Success | InitStatus::Error)
    }
}

impl std::fmt::Display for InitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match to_title_case(value).as_str() {
            "Pending" => Ok(InitStatus::Pending),
            "Processing" => Ok(InitStatus::Processing),
            "Success" => Ok(InitStatus::Success),
            "Error" => Ok(InitStatus::Error),
            _ => Err(Error::Validation(format!("unknown init status {}", value))),
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition recorded on a drive or volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: String,
    /// Reason
    #[serde(default)]
    pub reason: String,
    /// Message
    #[serde(default)]
    pub message: String,
}

/// Replace a condition of the same type, or append it
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}
