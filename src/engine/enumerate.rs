//! Block device enumeration
//!
//! Walks `/sys/class/block` for whole disks, skipping partitions and
//! virtual devices. The port exists so the scan engine can be driven by a
//! scripted inventory in tests.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::device::Bus;
use crate::error::Result;

/// A block device as seen by enumeration, before any SMART read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub os_name: String,
    pub bus: Bus,
    pub rotational: Option<bool>,
    pub capacity_bytes: Option<u64>,
}

/// Inventory source abstraction
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DiscoveredDevice>>;
}

// =============================================================================
// Sysfs Adapter
// =============================================================================

/// Enumerates whole-disk block devices from sysfs
pub struct SysfsEnumerator {
    sysfs_path: PathBuf,
}

impl SysfsEnumerator {
    pub fn new() -> Self {
        Self::with_sysfs_path("/sys")
    }

    pub fn with_sysfs_path(sysfs_path: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_path: sysfs_path.into(),
        }
    }

    fn should_include(name: &str) -> bool {
        const VIRTUAL_PREFIXES: [&str; 5] = ["loop", "ram", "dm-", "md", "zram"];
        !VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    fn read_attr(&self, device: &str, attr: &str) -> Option<String> {
        let path = self.sysfs_path.join("class/block").join(device).join(attr);
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn detect_bus(&self, device: &str) -> Bus {
        if device.starts_with("nvme") {
            return Bus::Nvme;
        }
        // The sysfs device path of a USB-attached disk runs through the USB
        // controller.
        let link = self.sysfs_path.join("class/block").join(device);
        if let Ok(target) = std::fs::canonicalize(&link) {
            if target.to_string_lossy().contains("/usb") {
                return Bus::Usb;
            }
        }
        Bus::Ata
    }
}

impl Default for SysfsEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceEnumerator for SysfsEnumerator {
    async fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        let block_path = self.sysfs_path.join("class/block");
        let mut devices = Vec::new();

        let entries = match std::fs::read_dir(&block_path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %block_path.display(), error = %e, "no block sysfs");
                return Ok(devices);
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !Self::should_include(&name) {
                continue;
            }
            // Partitions carry a "partition" attribute.
            if entry.path().join("partition").exists() {
                continue;
            }

            let rotational = self
                .read_attr(&name, "queue/rotational")
                .and_then(|s| match s.as_str() {
                    "0" => Some(false),
                    "1" => Some(true),
                    _ => None,
                });
            let capacity_bytes = self
                .read_attr(&name, "size")
                .and_then(|s| s.parse::<u64>().ok())
                .map(|sectors| sectors * 512);

            devices.push(DiscoveredDevice {
                bus: self.detect_bus(&name),
                os_name: name,
                rotational,
                capacity_bytes,
            });
        }

        devices.sort_by(|a, b| a.os_name.cmp(&b.os_name));
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_virtual_devices_excluded() {
        assert!(SysfsEnumerator::should_include("sda"));
        assert!(SysfsEnumerator::should_include("nvme0n1"));
        assert!(!SysfsEnumerator::should_include("loop0"));
        assert!(!SysfsEnumerator::should_include("ram0"));
        assert!(!SysfsEnumerator::should_include("dm-3"));
        assert!(!SysfsEnumerator::should_include("md127"));
        assert!(!SysfsEnumerator::should_include("zram0"));
    }

    #[tokio::test]
    async fn test_enumerate_fake_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let block = dir.path().join("class/block");

        // Whole disk with rotational flag and size.
        let sda = block.join("sda");
        fs::create_dir_all(sda.join("queue")).unwrap();
        fs::write(sda.join("queue/rotational"), "1\n").unwrap();
        fs::write(sda.join("size"), "7814037168\n").unwrap();

        // A partition of it, which must be skipped.
        let sda1 = block.join("sda1");
        fs::create_dir_all(&sda1).unwrap();
        fs::write(sda1.join("partition"), "1\n").unwrap();

        // A loop device, skipped as virtual.
        fs::create_dir_all(block.join("loop0")).unwrap();

        let enumerator = SysfsEnumerator::with_sysfs_path(dir.path());
        let devices = enumerator.enumerate().await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].os_name, "sda");
        assert_eq!(devices[0].rotational, Some(true));
        assert_eq!(devices[0].capacity_bytes, Some(7814037168 * 512));
    }

    #[tokio::test]
    async fn test_enumerate_missing_sysfs_is_empty() {
        let enumerator = SysfsEnumerator::with_sysfs_path("/definitely/not/here");
        assert!(enumerator.enumerate().await.unwrap().is_empty());
    }
}
