//! Domain definition: descriptors and their registration with the control plane.

pub mod builder;
pub mod descriptor;

use std::path::PathBuf;

use crate::guest::BootDevice;

pub use builder::{resolve_bridge_ip, DomainBuilder};
pub use descriptor::{DomainDescriptor, DomainView, NetworkView};

/// Kind of removable install medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    Cdrom,
    Floppy,
}

impl MediumKind {
    /// libvirt `<disk device=…>` value.
    pub fn device(&self) -> &'static str {
        match self {
            MediumKind::Cdrom => "cdrom",
            MediumKind::Floppy => "floppy",
        }
    }

    /// Guest-side target device.
    pub fn target(&self) -> &'static str {
        match self {
            MediumKind::Cdrom => "hdc",
            MediumKind::Floppy => "fda",
        }
    }

    pub fn boot_device(&self) -> BootDevice {
        match self {
            MediumKind::Cdrom => BootDevice::Cdrom,
            MediumKind::Floppy => BootDevice::Floppy,
        }
    }
}

/// Install medium attached to the domain during the install phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallMedium {
    pub kind: MediumKind,
    pub path: PathBuf,
}

/// What the domain boots from. A medium is attached only while booting from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSource {
    Medium(InstallMedium),
    HardDisk,
}

impl BootSource {
    pub fn boot_device(&self) -> BootDevice {
        match self {
            BootSource::Medium(medium) => medium.kind.boot_device(),
            BootSource::HardDisk => BootDevice::HardDisk,
        }
    }

    pub fn medium(&self) -> Option<&InstallMedium> {
        match self {
            BootSource::Medium(medium) => Some(medium),
            BootSource::HardDisk => None,
        }
    }
}
