//! Application-wide constants
//!
//! Names, API group, on-disk layout and cluster locations shared by the
//! node agent, the controller and the admin workflows.

/// Application name
pub const APP_NAME: &str = "directpv";

/// Human-readable application name
pub const APP_PRETTY_NAME: &str = "DirectPV";

/// Upper-case application name, used for environment variables
pub const APP_CAPS_NAME: &str = "DIRECTPV";

/// CRD API group
pub const GROUP_NAME: &str = "directpv.min.io";

/// Latest CRD API version
pub const LATEST_API_VERSION: &str = "v1beta1";

/// Full apiVersion string
pub const API_VERSION: &str = "directpv.min.io/v1beta1";

/// Identity used for the driver, storage class and service account
pub const IDENTITY: &str = "directpv-min-io";

/// Namespace the driver is installed into
pub const NAMESPACE: &str = "directpv";

/// Secret holding the admin/node API credential
pub const CREDENTIALS_SECRET_NAME: &str = "directpv-creds";

/// DaemonSet running the node agent
pub const NODE_SERVER_NAME: &str = "node-server";

/// Root directory for application state on each node
pub const APP_ROOT_DIR: &str = "/var/lib/directpv";

/// Root directory under which drives are mounted
pub const MOUNT_ROOT_DIR: &str = "/var/lib/directpv/mnt";

/// Root directory of the legacy driver
pub const LEGACY_APP_ROOT_DIR: &str = "/var/lib/direct-csi";

/// udev runtime database
pub const UDEV_DATA_DIR: &str = "/run/udev/data";

/// Filesystem label stamped at format time
pub const FS_LABEL: &str = "DIRECTPV";

/// Metadata directory name inside a drive mount
pub const META_DIR_NAME: &str = ".meta";

/// Metadata file name inside the metadata directory
pub const META_FILE_NAME: &str = "info";

/// Name of the self-referencing symlink inside a drive mount
pub const VOLUME_ROOT_LINK_NAME: &str = ".directpv";

/// Devices smaller than this are denied for formatting
pub const MIN_SUPPORTED_DEVICE_SIZE: u64 = 512 * 1024 * 1024;

/// Default timeout for discover and init watches
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 120;

/// Node API port
pub const NODE_API_PORT: u16 = 40443;
