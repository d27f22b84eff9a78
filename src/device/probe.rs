//! Block Device Probe
//!
//! Enumerates block devices from the udev database and fills in their
//! properties from sysfs and procfs. A probe never writes.

use super::sysfs::{
    parse_cdroms, parse_major_minor, parse_mountinfo, parse_swaps, parse_udev_data,
    parse_uevent_devname, read_dir_names, read_first_line, read_optional,
};
use super::types::Device;
use crate::consts::UDEV_DATA_DIR;
use crate::domain::ports::DeviceSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};

const SECTOR_SIZE: u64 = 512;

// =============================================================================
// Probe Configuration
// =============================================================================

/// Filesystem roots the probe reads from
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Path to procfs (for testing)
    pub procfs_path: PathBuf,
    /// udev database directory
    pub udev_data_dir: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sysfs_path: PathBuf::from("/sys"),
            procfs_path: PathBuf::from("/proc"),
            udev_data_dir: PathBuf::from(UDEV_DATA_DIR),
        }
    }
}

// =============================================================================
// Device Prober
// =============================================================================

/// Probes block devices on the local node
pub struct DeviceProber {
    config: ProbeConfig,
}

/// Node-wide facts shared by every device in one probe
struct ProbeContext {
    mounts: BTreeMap<String, Vec<String>>,
    swaps: BTreeSet<String>,
    cdroms: BTreeSet<String>,
}

impl DeviceProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn context(&self) -> Result<ProbeContext> {
        Ok(ProbeContext {
            mounts: self.read_mounts()?,
            swaps: self.read_swaps()?,
            cdroms: parse_cdroms(&read_optional(
                &self.config.procfs_path.join("sys/dev/cdrom/info"),
            )?),
        })
    }

    fn read_mounts(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let path = self.config.procfs_path.join("1/mountinfo");
        parse_mountinfo(&read_optional(&path)?)
    }

    /// major:minor of active swap devices
    fn read_swaps(&self) -> Result<BTreeSet<String>> {
        let content = read_optional(&self.config.procfs_path.join("swaps"))?;
        let mut devices = BTreeSet::new();
        for filename in parse_swaps(&content) {
            match nix::sys::stat::stat(filename.as_str()) {
                Ok(stat) => {
                    let rdev = stat.st_rdev;
                    devices.insert(format!(
                        "{}:{}",
                        nix::sys::stat::major(rdev),
                        nix::sys::stat::minor(rdev)
                    ));
                }
                Err(nix::errno::Errno::ENOENT) => continue,
                Err(e) => {
                    return Err(Error::Probe(format!("unable to stat {}: {}", filename, e)));
                }
            }
        }
        Ok(devices)
    }

    fn device_name(&self, major_minor: &str) -> Result<Option<String>> {
        let path = self
            .config
            .sysfs_path
            .join("dev/block")
            .join(major_minor)
            .join("uevent");
        Ok(parse_uevent_devname(&read_optional(&path)?))
    }

    fn probe_one(&self, major_minor: &str, ctx: &ProbeContext) -> Result<Option<Device>> {
        let Some(name) = self.device_name(major_minor)? else {
            debug!("No device name found for {}", major_minor);
            return Ok(None);
        };
        if name.starts_with("loop") {
            return Ok(None);
        }

        let udev_data = parse_udev_data(&read_optional(
            &self.config.udev_data_dir.join(format!("b{}", major_minor)),
        )?);

        let class_path = self.config.sysfs_path.join("class/block").join(&name);
        let flag = |attr: &str| -> Result<bool> {
            let value = read_first_line(&class_path.join(attr))?;
            Ok(!value.is_empty() && value != "0")
        };

        // Real devices have no `hidden` attribute
        let hidden = read_first_line(&class_path.join("hidden"))
            .map(|v| v == "1")
            .unwrap_or(false);

        let size_text = read_first_line(&class_path.join("size"))?;
        let sectors: u64 = size_text.parse().map_err(|_| {
            Error::Probe(format!("invalid size '{}' for device {}", size_text, name))
        })?;

        let mut device = Device {
            name: name.clone(),
            major_minor: major_minor.to_string(),
            size: sectors * SECTOR_SIZE,
            hidden,
            removable: flag("removable")?,
            read_only: flag("ro")?,
            dm_name: read_first_line(&class_path.join("dm/name"))?,
            mount_points: ctx.mounts.get(major_minor).cloned().unwrap_or_default(),
            udev_data,
            ..Default::default()
        };

        if !device.hidden {
            if device.partition_number() == 0 {
                let entries = read_dir_names(&self.config.sysfs_path.join("block").join(&name))?;
                device.partitioned = entries.iter().any(|e| e.starts_with(&name));
            }
            device.holders = read_dir_names(&class_path.join("holders"))?;
            device.cdrom = ctx.cdroms.contains(&name);
            device.swap_on = ctx.swaps.contains(major_minor);
        }

        Ok(Some(device))
    }

    fn probe_all(&self, major_minors: Option<&[String]>) -> Result<Vec<Device>> {
        let ctx = self.context()?;
        let candidates: Vec<String> = match major_minors {
            Some(list) => list.to_vec(),
            None => read_dir_names(&self.config.udev_data_dir)?
                .into_iter()
                .filter_map(|entry| entry.strip_prefix('b').map(str::to_string))
                .collect(),
        };

        let mut devices = Vec::new();
        for major_minor in candidates {
            if parse_major_minor(&major_minor).is_err() {
                debug!("Skipping udev entry {}", major_minor);
                continue;
            }
            match self.probe_one(&major_minor, &ctx) {
                Ok(Some(device)) => devices.push(device),
                Ok(None) => {}
                Err(e) => debug!("Unable to probe {}: {}", major_minor, e),
            }
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }
}

#[async_trait]
impl DeviceSource for DeviceProber {
    async fn probe(&self) -> Result<Vec<Device>> {
        let devices = self.probe_all(None)?;
        info!("Probed {} block devices", devices.len());
        Ok(devices)
    }

    async fn probe_devices(&self, major_minors: &[String]) -> Result<Vec<Device>> {
        self.probe_all(Some(major_minors))
    }

    async fn mounts(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.read_mounts()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    /// Fake sysfs/procfs/udev tree with the given devices
    pub(crate) struct FakeTree {
        pub dir: tempfile::TempDir,
    }

    impl FakeTree {
        pub fn new() -> Self {
            let tree = Self {
                dir: tempfile::tempdir().unwrap(),
            };
            fs::create_dir_all(tree.root().join("run/udev/data")).unwrap();
            fs::create_dir_all(tree.root().join("proc/1")).unwrap();
            fs::write(tree.root().join("proc/1/mountinfo"), "").unwrap();
            tree
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        pub fn config(&self) -> ProbeConfig {
            ProbeConfig {
                sysfs_path: self.root().join("sys"),
                procfs_path: self.root().join("proc"),
                udev_data_dir: self.root().join("run/udev/data"),
            }
        }

        pub fn add_device(&self, name: &str, major_minor: &str, sectors: u64, udev: &str) {
            let dev_dir = self.root().join("sys/dev/block").join(major_minor);
            fs::create_dir_all(&dev_dir).unwrap();
            fs::write(dev_dir.join("uevent"), format!("DEVNAME={}\n", name)).unwrap();

            let class_dir = self.root().join("sys/class/block").join(name);
            fs::create_dir_all(class_dir.join("holders")).unwrap();
            fs::write(class_dir.join("size"), format!("{}\n", sectors)).unwrap();
            fs::write(class_dir.join("removable"), "0\n").unwrap();
            fs::write(class_dir.join("ro"), "0\n").unwrap();
            fs::create_dir_all(self.root().join("sys/block").join(name)).unwrap();

            fs::write(
                self.root().join("run/udev/data").join(format!("b{}", major_minor)),
                udev,
            )
            .unwrap();
        }

        pub fn set_attr(&self, name: &str, attr: &str, value: &str) {
            let path = self.root().join("sys/class/block").join(name).join(attr);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, value).unwrap();
        }

        pub fn set_mountinfo(&self, content: &str) {
            fs::write(self.root().join("proc/1/mountinfo"), content).unwrap();
        }
    }

    #[tokio::test]
    async fn test_probe_fake_tree() {
        let tree = FakeTree::new();
        tree.add_device("sda", "8:0", 4 << 21, "E:ID_MODEL=Disk\n");
        tree.add_device("sdb", "8:16", 4 << 21, "E:ID_FS_TYPE=xfs\n");
        tree.add_device("loop0", "7:0", 4 << 21, "");
        tree.set_attr("sdb", "ro", "1\n");
        fs::create_dir_all(tree.root().join("sys/block/sda/sda1")).unwrap();
        tree.set_mountinfo("30 22 8:16 / /mnt/data rw - xfs /dev/sdb rw\n");

        let prober = DeviceProber::new(tree.config());
        let devices = prober.probe().await.unwrap();
        assert_eq!(devices.len(), 2);

        let sda = &devices[0];
        assert_eq!(sda.name, "sda");
        assert_eq!(sda.size, (4 << 21) * 512);
        assert!(sda.partitioned);
        assert_eq!(sda.make(), "Disk");

        let sdb = &devices[1];
        assert!(sdb.read_only);
        assert_eq!(sdb.mount_points, vec!["/mnt/data".to_string()]);
        assert_eq!(sdb.fs_type(), "xfs");
        assert_eq!(
            sdb.local_denied_reasons(),
            vec!["Read only".to_string(), "Mounted".to_string()]
        );
    }

    #[tokio::test]
    async fn test_probe_by_major_minor() {
        let tree = FakeTree::new();
        tree.add_device("sda", "8:0", 4 << 21, "");
        tree.add_device("sdb", "8:16", 4 << 21, "");

        let prober = DeviceProber::new(tree.config());
        let devices = prober
            .probe_devices(&["8:16".to_string(), "9:9".to_string()])
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "sdb");
    }

    #[tokio::test]
    async fn test_hidden_device_skips_holders() {
        let tree = FakeTree::new();
        tree.add_device("nvme0c0n1", "259:0", 4 << 21, "");
        tree.set_attr("nvme0c0n1", "hidden", "1\n");
        tree.set_attr("nvme0c0n1", "holders/dm-0", "");

        let devices = DeviceProber::new(tree.config()).probe().await.unwrap();
        assert!(devices[0].hidden);
        assert!(devices[0].holders.is_empty());
    }
}
