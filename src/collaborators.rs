//! Interfaces to systems outside the attestation engine.
//!
//! Forensic image scanning and removable-device enumeration live in other
//! components; the engine only knows them through these traits and ships no
//! implementation for either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp source for certificate issuance.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub name: String,
    pub inode: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovableDevice {
    pub device: String,
    pub mountpoint: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Deleted-file scanner over a raw disk image.
pub trait ForensicScanner {
    type Image;

    fn scan_deleted_entries(&self, image: &Self::Image) -> anyhow::Result<Vec<DeletedEntry>>;
}

/// Source of removable devices eligible for a mountpoint wipe.
pub trait RemovableDeviceEnumerator {
    fn enumerate_removable(&self) -> anyhow::Result<Vec<RemovableDevice>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDevices(Vec<RemovableDevice>);

    impl RemovableDeviceEnumerator for FixedDevices {
        fn enumerate_removable(&self) -> anyhow::Result<Vec<RemovableDevice>> {
            Ok(self.0.clone())
        }
    }

    struct RawImageScanner;

    impl ForensicScanner for RawImageScanner {
        type Image = Vec<u8>;

        fn scan_deleted_entries(&self, image: &Vec<u8>) -> anyhow::Result<Vec<DeletedEntry>> {
            if image.is_empty() {
                anyhow::bail!("empty image");
            }
            Ok(vec![DeletedEntry {
                name: "LOST.TXT".to_string(),
                inode: 12,
                size: image.len() as u64,
            }])
        }
    }

    #[test]
    fn test_enumerator_usable_as_trait_object() {
        let enumerator: Box<dyn RemovableDeviceEnumerator> = Box::new(FixedDevices(vec![
            RemovableDevice {
                device: "/dev/sdb1".to_string(),
                mountpoint: "/media/usb0".to_string(),
                total_bytes: 8 << 30,
                free_bytes: 1 << 30,
            },
        ]));

        let devices = enumerator.enumerate_removable().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mountpoint, "/media/usb0");
    }

    #[test]
    fn test_scanner_reports_entries() {
        let entries = RawImageScanner.scan_deleted_entries(&vec![0u8; 512]).unwrap();
        assert_eq!(entries[0].size, 512);
        assert!(RawImageScanner.scan_deleted_entries(&Vec::new()).is_err());
    }

    #[test]
    fn test_system_clock_is_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
