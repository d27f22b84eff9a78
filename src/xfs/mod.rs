//! Filesystem formatter
//!
//! XFS superblock probe, mkfs/mount pipeline and the reflink capability probe.

pub mod formatter;
pub mod superblock;

pub use formatter::{metadata_content, mkfs_args, project_id, XfsConfig, XfsFormatter};
pub use superblock::Superblock;
