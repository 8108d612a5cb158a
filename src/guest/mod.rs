//! Guest identity and hardware configuration.
//!
//! A guest is known to the control plane by its name, `distro + update + arch`.
//! Everything else (paths, domain name, lock file) derives from that name, so
//! two sessions with the same identity must never run at once.

pub mod paths;

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use paths::GuestPaths;

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    I386,
    X86_64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::I386 => "i386",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "i386" => Ok(Arch::I386),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(Error::Configuration(format!(
                "unsupported guest arch '{other}' (expected i386 or x86_64)"
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Random address under a fixed three-byte prefix.
    pub fn generate(prefix: [u8; 3], rng: &mut impl Rng) -> Self {
        let mut tail = [0u8; 3];
        rng.fill(&mut tail);
        Self([prefix[0], prefix[1], prefix[2], tail[0], tail[1], tail[2]])
    }

    /// Parse an `aa:bb:cc` OUI prefix.
    pub fn parse_prefix(s: &str) -> Result<[u8; 3]> {
        let parts = s
            .split(':')
            .map(|p| u8::from_str_radix(p, 16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::Configuration(format!("invalid MAC prefix '{s}'")))?;
        match parts.as_slice() {
            [a, b, c] => Ok([*a, *b, *c]),
            _ => Err(Error::Configuration(format!(
                "MAC prefix '{s}' must have exactly three octets"
            ))),
        }
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// QEMU/KVM locally administered prefix.
pub const DEFAULT_MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// Immutable identity of one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestIdentity {
    pub distro: String,
    pub update: String,
    pub arch: Arch,
    pub uuid: Uuid,
    pub mac: MacAddr,
    name: String,
}

impl GuestIdentity {
    /// Generate a fresh UUID and MAC for `distro`/`update`/`arch`.
    pub fn generate(
        distro: &str,
        update: &str,
        arch: Arch,
        mac_prefix: [u8; 3],
        rng: &mut impl Rng,
    ) -> Self {
        let mut uuid_bytes = [0u8; 16];
        rng.fill(&mut uuid_bytes);
        let uuid = uuid::Builder::from_random_bytes(uuid_bytes).into_uuid();
        let mac = MacAddr::generate(mac_prefix, rng);

        Self {
            distro: distro.to_string(),
            update: update.to_string(),
            arch,
            uuid,
            mac,
            name: format!("{distro}{update}{arch}"),
        }
    }

    /// Domain name and path key.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Virtual disk bus presented to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskBus {
    #[default]
    Ide,
    Virtio,
}

impl DiskBus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBus::Ide => "ide",
            DiskBus::Virtio => "virtio",
        }
    }

    /// Target device name for the primary disk on this bus.
    pub fn device(&self) -> &'static str {
        match self {
            DiskBus::Ide => "hda",
            DiskBus::Virtio => "vda",
        }
    }
}

impl FromStr for DiskBus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ide" => Ok(DiskBus::Ide),
            "virtio" => Ok(DiskBus::Virtio),
            other => Err(Error::Configuration(format!(
                "unknown disk bus '{other}' (expected ide or virtio)"
            ))),
        }
    }
}

/// Pointer device attached to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseType {
    #[default]
    Ps2,
    Usb,
}

impl FromStr for MouseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ps2" => Ok(MouseType::Ps2),
            "usb" => Ok(MouseType::Usb),
            other => Err(Error::Configuration(format!(
                "unknown mouse type '{other}' (expected ps2 or usb)"
            ))),
        }
    }
}

/// Validated virtual hardware for a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub nic_model: String,
    pub clock_offset: String,
    pub mouse: MouseType,
    pub disk_bus: DiskBus,
    pub memory_kib: u64,
    pub vcpus: u32,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            nic_model: "rtl8139".to_string(),
            clock_offset: "utc".to_string(),
            mouse: MouseType::Ps2,
            disk_bus: DiskBus::Ide,
            memory_kib: 1024 * 1024,
            vcpus: 1,
        }
    }
}

/// Which attached device the firmware boots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Cdrom,
    Floppy,
    HardDisk,
}

impl BootDevice {
    /// libvirt `<boot dev=…>` value.
    pub fn tag(&self) -> &'static str {
        match self {
            BootDevice::Cdrom => "cdrom",
            BootDevice::Floppy => "fd",
            BootDevice::HardDisk => "hd",
        }
    }
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootDevice::Cdrom => "cdrom",
            BootDevice::Floppy => "floppy",
            BootDevice::HardDisk => "harddisk",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_disk_bus_devices() {
        assert_eq!("ide".parse::<DiskBus>().unwrap().device(), "hda");
        assert_eq!("virtio".parse::<DiskBus>().unwrap().device(), "vda");
    }

    #[test]
    fn test_unknown_disk_bus_is_configuration_error() {
        for bus in ["scsi", "sata", "IDE", ""] {
            assert!(
                matches!(bus.parse::<DiskBus>(), Err(Error::Configuration(_))),
                "bus {bus:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unsupported_arch() {
        assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert!(matches!(
            "ppc64".parse::<Arch>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_identity_name_and_mac_prefix() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = GuestIdentity::generate("fedora", "14", Arch::X86_64, DEFAULT_MAC_PREFIX, &mut rng);

        assert_eq!(id.name(), "fedora14x86_64");
        assert!(id.mac.to_string().starts_with("52:54:00:"));
        assert_eq!(id.mac.to_string().len(), 17);
    }

    #[test]
    fn test_identity_is_deterministic_for_seed() {
        let a = GuestIdentity::generate(
            "rhel",
            "6",
            Arch::I386,
            DEFAULT_MAC_PREFIX,
            &mut StdRng::seed_from_u64(42),
        );
        let b = GuestIdentity::generate(
            "rhel",
            "6",
            Arch::I386,
            DEFAULT_MAC_PREFIX,
            &mut StdRng::seed_from_u64(42),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_mac_prefix() {
        assert_eq!(MacAddr::parse_prefix("52:54:00").unwrap(), DEFAULT_MAC_PREFIX);
        assert!(MacAddr::parse_prefix("52:54").is_err());
        assert!(MacAddr::parse_prefix("zz:54:00").is_err());
    }

    #[test]
    fn test_boot_device_tags() {
        assert_eq!(BootDevice::Cdrom.tag(), "cdrom");
        assert_eq!(BootDevice::Floppy.tag(), "fd");
        assert_eq!(BootDevice::HardDisk.tag(), "hd");
    }
}
