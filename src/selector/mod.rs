//! Selector engine
//!
//! Compiles node names, drive names, statuses, access tiers, labels and
//! ellipsis patterns into lister selectors.

pub mod args;
pub mod ellipsis;

pub use args::{
    parse_access_tier_args, parse_drive_id_args, parse_drive_name_args, parse_drive_status_args,
    parse_label_args, parse_node_args, parse_pod_name_args, parse_pod_namespace_args,
    parse_volume_name_args, parse_volume_status_args, trim_dev_prefix, DriveSelection,
    DriveSelectorArgs, VolumeSelection, VolumeSelectorArgs,
};
pub use ellipsis::expand;
