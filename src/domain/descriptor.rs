//! libvirt domain and network XML, modelled with serde.
//!
//! [`DomainDescriptor`] is what the installer writes. The `*View` types are
//! partial read models for documents the control plane hands back; unknown
//! elements and attributes are ignored so live descriptors parse as well as
//! our own.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First TCP port QEMU assigns to VNC display `:0`.
pub const VNC_BASE_PORT: i32 = 5900;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename = "domain")]
pub struct DomainDescriptor {
    #[serde(rename = "@type")]
    pub hypervisor: String,
    pub name: String,
    pub uuid: String,
    pub memory: Memory,
    #[serde(rename = "currentMemory")]
    pub current_memory: Memory,
    pub vcpu: u32,
    pub clock: Clock,
    pub features: Features,
    pub os: Os,
    pub on_poweroff: String,
    pub on_reboot: String,
    pub on_crash: String,
    pub devices: Devices,
}

impl DomainDescriptor {
    pub fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|e| Error::Descriptor(e.to_string()))
    }

    /// Boot device tag from `<os><boot dev=…>`.
    pub fn boot_dev(&self) -> &str {
        &self.os.boot.dev
    }

    /// Disks other than the primary one.
    pub fn install_media(&self) -> impl Iterator<Item = &Disk> {
        self.devices.disk.iter().filter(|d| d.device != "disk")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Memory {
    #[serde(rename = "@unit")]
    pub unit: String,
    #[serde(rename = "$text")]
    pub value: u64,
}

impl Memory {
    pub fn kib(value: u64) -> Self {
        Self {
            unit: "KiB".to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clock {
    #[serde(rename = "@offset")]
    pub offset: String,
}

/// Empty marker element such as `<acpi/>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Flag {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Features {
    pub acpi: Flag,
    pub apic: Flag,
    pub pae: Flag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Os {
    #[serde(rename = "type")]
    pub os_type: String,
    pub boot: Boot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boot {
    #[serde(rename = "@dev")]
    pub dev: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Devices {
    pub console: Console,
    pub graphics: Graphics,
    pub interface: Interface,
    pub input: Input,
    pub disk: Vec<Disk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Console {
    #[serde(rename = "@type")]
    pub kind: String,
    pub target: ConsoleTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleTarget {
    #[serde(rename = "@port")]
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Graphics {
    #[serde(rename = "@type")]
    pub kind: String,
    /// `-1` asks the control plane to pick a free port.
    #[serde(rename = "@port")]
    pub port: i32,
    #[serde(rename = "@autoport")]
    pub autoport: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    #[serde(rename = "@type")]
    pub kind: String,
    pub source: InterfaceSource,
    pub mac: MacElement,
    pub model: Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSource {
    #[serde(rename = "@bridge")]
    pub bridge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacElement {
    #[serde(rename = "@address")]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Input {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@bus")]
    pub bus: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    #[serde(rename = "@type")]
    pub kind: String,
    /// `disk`, `cdrom` or `floppy`.
    #[serde(rename = "@device")]
    pub device: String,
    pub source: DiskSource,
    pub target: DiskTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSource {
    #[serde(rename = "@file")]
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskTarget {
    #[serde(rename = "@dev")]
    pub dev: String,
    #[serde(rename = "@bus", skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// Read model of a domain descriptor: just the devices the installer inspects.
#[derive(Debug, Default, Deserialize)]
pub struct DomainView {
    #[serde(default)]
    pub devices: DevicesView,
}

#[derive(Debug, Default, Deserialize)]
pub struct DevicesView {
    #[serde(default)]
    pub disk: Vec<DiskView>,
    #[serde(default)]
    pub graphics: Vec<GraphicsView>,
}

#[derive(Debug, Deserialize)]
pub struct DiskView {
    #[serde(rename = "@device", default)]
    pub device: Option<String>,
    #[serde(default)]
    pub source: Option<SourceView>,
}

#[derive(Debug, Deserialize)]
pub struct SourceView {
    #[serde(rename = "@file", default)]
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphicsView {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@port", default)]
    pub port: Option<i32>,
}

impl DomainView {
    pub fn parse(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| Error::Descriptor(e.to_string()))
    }

    /// File-backed disk sources.
    pub fn disk_sources(&self) -> impl Iterator<Item = &str> {
        self.devices
            .disk
            .iter()
            .filter_map(|d| d.source.as_ref())
            .filter_map(|s| s.file.as_deref())
    }
}

/// Read model of a virtual network descriptor.
#[derive(Debug, Default, Deserialize)]
pub struct NetworkView {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bridge: Option<BridgeView>,
    #[serde(default)]
    pub ip: Vec<IpView>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeView {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IpView {
    #[serde(rename = "@address", default)]
    pub address: Option<String>,
    #[serde(rename = "@family", default)]
    pub family: Option<String>,
}

impl NetworkView {
    pub fn parse(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| Error::Descriptor(e.to_string()))
    }

    pub fn bridge_name(&self) -> Option<&str> {
        self.bridge.as_ref().and_then(|b| b.name.as_deref())
    }

    /// The network's IPv4 address, if it has exactly one.
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        let mut v4 = self
            .ip
            .iter()
            .filter(|ip| ip.family.as_deref().map_or(true, |f| f == "ipv4"))
            .filter_map(|ip| ip.address.as_deref()?.parse::<Ipv4Addr>().ok());
        let first = v4.next()?;
        match v4.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}
