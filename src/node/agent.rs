//! Node Agent
//!
//! Per-node service behind the node API. Lists local devices with their
//! denial reasons and initializes selected devices into drives:
//! re-probe, format, mount, write metadata, create the Drive resource.
//!
//! Every device is serialized on its own mutex for the whole sequence, so
//! two requests naming the same device never race on the hardware.

use crate::crd::{
    AccessTier, DirectPVDrive, InitDevice, InitDeviceResult, LabelKey, NewDrive, NodeDevice,
};
use crate::device::{self, Device};
use crate::domain::ports::{SharedDeviceSource, SharedFormatter};
use crate::error::{Error, Result};
use crate::store::Clients;
use super::metrics::NodeMetrics;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Node identity and topology
#[derive(Debug, Clone)]
pub struct NodeAgentConfig {
    /// Kubernetes node name
    pub node_id: String,
    /// CSI driver identity
    pub identity: String,
    pub rack: String,
    pub zone: String,
    pub region: String,
}

impl Default for NodeAgentConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            identity: crate::consts::IDENTITY.to_string(),
            rack: "default".to_string(),
            zone: "default".to_string(),
            region: "default".to_string(),
        }
    }
}

impl NodeAgentConfig {
    /// Topology recorded on every drive this node creates
    pub fn topology(&self) -> BTreeMap<String, String> {
        [
            (LabelKey::Identity, self.identity.as_str()),
            (LabelKey::Rack, self.rack.as_str()),
            (LabelKey::Zone, self.zone.as_str()),
            (LabelKey::Region, self.region.as_str()),
            (LabelKey::Node, self.node_id.as_str()),
        ]
        .into_iter()
        .map(|(key, value)| (key.key(), value.to_string()))
        .collect()
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Filters for a device listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDevicesRequest {
    /// Device names; empty means all
    #[serde(default)]
    pub devices: Vec<String>,
    /// Skip devices with a denial reason
    #[serde(default)]
    pub available_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDevicesResponse {
    pub node_id: String,
    pub devices: Vec<NodeDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitDevicesRequest {
    pub devices: Vec<InitDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitDevicesResponse {
    pub node_id: String,
    pub results: Vec<InitDeviceResult>,
}

// =============================================================================
// Node Agent
// =============================================================================

/// Local device listing and initialization
pub struct NodeAgent {
    config: NodeAgentConfig,
    devices: SharedDeviceSource,
    formatter: SharedFormatter,
    clients: Clients,
    metrics: NodeMetrics,
    /// One mutex per device name
    device_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NodeAgent {
    pub fn new(
        config: NodeAgentConfig,
        devices: SharedDeviceSource,
        formatter: SharedFormatter,
        clients: Clients,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            devices,
            formatter,
            clients,
            metrics: NodeMetrics::new(),
            device_locks: DashMap::new(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeAgentConfig {
        &self.config
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn device_source(&self) -> &SharedDeviceSource {
        &self.devices
    }

    pub fn formatter(&self) -> &SharedFormatter {
        &self.formatter
    }

    /// Probe every local device and annotate it with its denial reason
    pub async fn probe_node_devices(&self) -> Result<Vec<NodeDevice>> {
        let probed = self.devices.probe().await?;
        self.metrics.devices_probed.set(probed.len() as i64);
        Ok(device::node_devices(&self.config.node_id, &probed, &self.clients.drives).await)
    }

    /// Devices matching the request filters
    pub async fn list_devices(&self, request: &ListDevicesRequest) -> Result<ListDevicesResponse> {
        let devices = self
            .probe_node_devices()
            .await?
            .into_iter()
            .filter(|d| request.devices.is_empty() || request.devices.contains(&d.name))
            .filter(|d| !request.available_only || d.is_available())
            .collect();

        Ok(ListDevicesResponse {
            node_id: self.config.node_id.clone(),
            devices,
        })
    }

    /// Initialize devices concurrently; one result per requested device
    pub async fn init_devices(&self, devices: &[InitDevice]) -> Vec<InitDeviceResult> {
        let results = join_all(devices.iter().map(|device| async move {
            let error = match self.init_device(device).await {
                Ok(drive) => {
                    self.metrics.drives_initialized.inc();
                    info!(
                        "Initialized device {} as drive {} on node {}",
                        device.name,
                        drive.drive_id(),
                        self.config.node_id
                    );
                    String::new()
                }
                Err(e) => {
                    self.metrics.init_failures.inc();
                    error!("Unable to initialize device {}: {}", device.name, e);
                    e.to_string()
                }
            };
            InitDeviceResult {
                name: device.name.clone(),
                error,
            }
        }))
        .await;
        results
    }

    fn device_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Re-probe a device and confirm it is the one the admin selected
    async fn verify_device(&self, request: &InitDevice) -> Result<Device> {
        let major_minor = request
            .major_minor()
            .ok_or_else(|| Error::device(&request.name, "device not found"))?;

        let probed = self.devices.probe_devices(&[major_minor.to_string()]).await?;
        let device = probed
            .into_iter()
            .find(|d| d.major_minor == major_minor)
            .ok_or_else(|| Error::device(&request.name, "device not found"))?;

        if device.id(&self.config.node_id) != request.id {
            return Err(Error::device(&request.name, "device state changed"));
        }

        let mounts = self.devices.mounts().await?;
        if let Some(points) = mounts.get(major_minor).filter(|p| !p.is_empty()) {
            return Err(Error::device(
                &request.name,
                format!("device mounted at {}", points.join(", ")),
            ));
        }

        if !device.fs_type().is_empty() && !request.force {
            return Err(Error::device(
                &request.name,
                format!("device already has a {} filesystem; retry with force", device.fs_type()),
            ));
        }

        Ok(device)
    }

    async fn init_device(&self, request: &InitDevice) -> Result<DirectPVDrive> {
        let lock = self.device_lock(&request.name);
        let _guard = lock.lock().await;

        let device = self.verify_device(request).await?;
        let fsuuid = uuid::Uuid::new_v4().to_string();

        debug!("Formatting {} with fsuuid {}", device.path(), fsuuid);
        let fs = self
            .formatter
            .make_fs(&device.path(), &fsuuid, request.force)
            .await?;
        self.formatter.mount(&device.path(), &fs.fsuuid).await?;

        match self.adopt(&device, &fs.fsuuid, fs.total_capacity).await {
            Ok(drive) => Ok(drive),
            Err(e) => {
                if let Err(unmount_err) = self.formatter.unmount(&fs.fsuuid).await {
                    warn!("Unable to unmount {} after failure: {}", fs.fsuuid, unmount_err);
                }
                Err(e)
            }
        }
    }

    /// Write the metadata marker and create the Drive resource
    async fn adopt(
        &self,
        device: &Device,
        fsuuid: &str,
        total_capacity: u64,
    ) -> Result<DirectPVDrive> {
        self.formatter.write_metadata(fsuuid).await?;

        let drive = DirectPVDrive::initialized(NewDrive {
            fsuuid: fsuuid.to_string(),
            node_id: self.config.node_id.clone(),
            drive_name: device.name.clone(),
            make: device.make(),
            total_capacity,
            access_tier: AccessTier::Default,
            topology: self.config.topology(),
        });
        self.clients.drives.create(&drive).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::DriveStatus;
    use crate::domain::ports::{DeviceSource, Formatter, FsInfo};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    /// Device source backed by a fixed list
    #[derive(Default)]
    pub(crate) struct FakeDevices {
        pub devices: SyncMutex<Vec<Device>>,
        pub mounts: SyncMutex<BTreeMap<String, Vec<String>>>,
    }

    impl FakeDevices {
        pub fn with(devices: Vec<Device>) -> Arc<Self> {
            Arc::new(Self {
                devices: SyncMutex::new(devices),
                mounts: SyncMutex::new(BTreeMap::new()),
            })
        }
    }

    #[async_trait]
    impl DeviceSource for FakeDevices {
        async fn probe(&self) -> Result<Vec<Device>> {
            Ok(self.devices.lock().clone())
        }

        async fn probe_devices(&self, major_minors: &[String]) -> Result<Vec<Device>> {
            Ok(self
                .devices
                .lock()
                .iter()
                .filter(|d| major_minors.contains(&d.major_minor))
                .cloned()
                .collect())
        }

        async fn mounts(&self) -> Result<BTreeMap<String, Vec<String>>> {
            Ok(self.mounts.lock().clone())
        }
    }

    /// Formatter that records calls instead of touching devices
    #[derive(Default)]
    pub(crate) struct FakeFormatter {
        pub formatted: SyncMutex<Vec<(String, bool)>>,
        pub mounted: SyncMutex<Vec<String>>,
        pub unmounted: SyncMutex<Vec<String>>,
        pub fail_metadata: bool,
    }

    #[async_trait]
    impl Formatter for FakeFormatter {
        async fn make_fs(&self, device: &str, fsuuid: &str, force: bool) -> Result<FsInfo> {
            self.formatted.lock().push((device.to_string(), force));
            Ok(FsInfo {
                fsuuid: fsuuid.to_string(),
                label: "DIRECTPV".into(),
                total_capacity: 1 << 30,
                free_capacity: (1 << 30) - (1 << 20),
            })
        }

        async fn mount(&self, _device: &str, fsuuid: &str) -> Result<()> {
            self.mounted.lock().push(fsuuid.to_string());
            Ok(())
        }

        async fn unmount(&self, fsuuid: &str) -> Result<()> {
            self.unmounted.lock().push(fsuuid.to_string());
            Ok(())
        }

        async fn write_metadata(&self, _fsuuid: &str) -> Result<()> {
            if self.fail_metadata {
                return Err(Error::Internal("disk full".into()));
            }
            Ok(())
        }
    }

    pub(crate) fn disk(name: &str, major_minor: &str) -> Device {
        let mut udev_data = BTreeMap::new();
        udev_data.insert("E:ID_MODEL".to_string(), "QEMU_HARDDISK".to_string());
        Device {
            name: name.into(),
            major_minor: major_minor.into(),
            size: 1 << 30,
            udev_data,
            ..Default::default()
        }
    }

    fn agent(devices: Arc<FakeDevices>, formatter: Arc<FakeFormatter>) -> Arc<NodeAgent> {
        NodeAgent::new(
            NodeAgentConfig {
                node_id: "node-1".into(),
                ..Default::default()
            },
            devices,
            formatter,
            Clients::memory(),
        )
    }

    fn request_for(device: &Device, force: bool) -> InitDevice {
        InitDevice {
            id: device.id("node-1"),
            name: device.name.clone(),
            force,
        }
    }

    #[tokio::test]
    async fn test_list_devices_filters() {
        let mut small = disk("sdc", "8:32");
        small.size = 1 << 20;
        let devices = FakeDevices::with(vec![disk("sda", "8:0"), disk("sdb", "8:16"), small]);
        let agent = agent(devices, Arc::new(FakeFormatter::default()));

        let all = agent.list_devices(&ListDevicesRequest::default()).await.unwrap();
        assert_eq!(all.node_id, "node-1");
        assert_eq!(all.devices.len(), 3);

        let available = agent
            .list_devices(&ListDevicesRequest {
                devices: vec!["sdb".into(), "sdc".into()],
                available_only: true,
            })
            .await
            .unwrap();
        assert_eq!(available.devices.len(), 1);
        assert_eq!(available.devices[0].name, "sdb");
    }

    #[tokio::test]
    async fn test_init_device_creates_ready_drive() {
        let sda = disk("sda", "8:0");
        let formatter = Arc::new(FakeFormatter::default());
        let agent = agent(FakeDevices::with(vec![sda.clone()]), formatter.clone());

        let results = agent.init_devices(&[request_for(&sda, false)]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error, "");

        let drives = agent.clients().drive_lister().get().await.unwrap();
        assert_eq!(drives.len(), 1);
        let drive = &drives[0];
        assert_eq!(drive.drive_status(), DriveStatus::Ready);
        assert_eq!(drive.node_id(), "node-1");
        assert_eq!(drive.drive_name(), "sda");
        assert_eq!(drive.make(), "QEMU_HARDDISK");
        assert_eq!(drive.total_capacity(), 1 << 30);
        assert_eq!(drive.free_capacity(), drive.total_capacity());
        assert_eq!(drive.allocated_capacity(), 0);
        let topology = &drive.status.as_ref().unwrap().topology;
        assert_eq!(topology["directpv.min.io/node"], "node-1");
        assert_eq!(topology["directpv.min.io/rack"], "default");

        assert_eq!(formatter.formatted.lock().as_slice(), &[("/dev/sda".to_string(), false)]);
        assert_eq!(formatter.mounted.lock().as_slice(), &[drive.drive_id()]);
    }

    #[tokio::test]
    async fn test_init_device_state_checks() {
        let sda = disk("sda", "8:0");
        let sdb = disk("sdb", "8:16");
        let mut sdc = disk("sdc", "8:32");
        sdc.udev_data.insert("E:ID_FS_TYPE".into(), "ext4".into());

        let devices = FakeDevices::with(vec![sda.clone(), sdb.clone(), sdc.clone()]);
        devices
            .mounts
            .lock()
            .insert("8:16".into(), vec!["/mnt/b".into()]);
        let formatter = Arc::new(FakeFormatter::default());
        let agent = agent(devices, formatter.clone());

        let mut stale = request_for(&sda, false);
        stale.id = "8:0$stale".into();
        let missing = InitDevice {
            id: "8:48$abc".into(),
            name: "sdd".into(),
            force: false,
        };

        let results = agent
            .init_devices(&[
                stale,
                request_for(&sdb, false),
                request_for(&sdc, false),
                missing,
            ])
            .await;
        assert!(results[0].error.contains("device state changed"));
        assert!(results[1].error.contains("device mounted at /mnt/b"));
        assert!(results[2].error.contains("ext4"));
        assert!(results[3].error.contains("device not found"));
        assert!(formatter.formatted.lock().is_empty());

        let forced = agent.init_devices(&[request_for(&sdc, true)]).await;
        assert_eq!(forced[0].error, "");
        assert_eq!(formatter.formatted.lock()[0], ("/dev/sdc".to_string(), true));
    }

    #[tokio::test]
    async fn test_init_failure_unmounts() {
        let sda = disk("sda", "8:0");
        let formatter = Arc::new(FakeFormatter {
            fail_metadata: true,
            ..Default::default()
        });
        let agent = agent(FakeDevices::with(vec![sda.clone()]), formatter.clone());

        let results = agent.init_devices(&[request_for(&sda, false)]).await;
        assert!(results[0].error.contains("disk full"));
        assert_eq!(formatter.unmounted.lock().len(), 1);
        assert_eq!(formatter.mounted.lock().as_slice(), formatter.unmounted.lock().as_slice());
        assert!(agent.clients().drive_lister().get().await.unwrap().is_empty());
    }
}
