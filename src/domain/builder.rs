//! Builds domain descriptors and registers them with the control plane.
//!
//! The same builder is used for every phase of a guest's life: the install
//! boot (medium attached, boot from it) and each later boot (no medium, boot
//! from the primary disk). Redefining with the same name updates the domain
//! in place, so the disk image survives the switch.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::descriptor::{
    Boot, Clock, Console, ConsoleTarget, Devices, Disk, DiskSource, DiskTarget,
    DomainDescriptor, Features, Graphics, Input, Interface, InterfaceSource, MacElement, Memory,
    Model, NetworkView, Os,
};
use super::BootSource;
use crate::control::ControlPlane;
use crate::error::{BestEffort, Error, Result};
use crate::guest::{DomainConfig, GuestIdentity, MouseType};

/// Find the IPv4 address of the control plane network bound to `bridge`.
///
/// Without that network the guest has no route back to the host, so its
/// absence is an environment error.
pub fn resolve_bridge_ip(control: &dyn ControlPlane, bridge: &str) -> Result<Ipv4Addr> {
    for network in control.networks()? {
        let view = NetworkView::parse(&control.network_descriptor(&network)?)?;
        if view.bridge_name() != Some(bridge) {
            continue;
        }
        return view.ipv4_address().ok_or_else(|| {
            Error::Environment(format!(
                "network '{network}' on bridge {bridge} does not have exactly one IPv4 address"
            ))
        });
    }

    Err(Error::Environment(format!(
        "no virtual network is bound to bridge {bridge}; install cannot continue"
    )))
}

pub struct DomainBuilder<'a> {
    control: &'a dyn ControlPlane,
    identity: GuestIdentity,
    config: DomainConfig,
    disk_image: PathBuf,
    bridge: String,
    host_bridge_ip: Ipv4Addr,
}

impl<'a> DomainBuilder<'a> {
    pub fn new(
        control: &'a dyn ControlPlane,
        identity: GuestIdentity,
        config: DomainConfig,
        disk_image: impl Into<PathBuf>,
        bridge: &str,
    ) -> Result<Self> {
        let host_bridge_ip = resolve_bridge_ip(control, bridge)?;
        let disk_image = disk_image.into();

        debug!(
            guest = identity.name(),
            uuid = %identity.uuid,
            mac = %identity.mac,
            distro = %identity.distro,
            update = %identity.update,
            arch = %identity.arch,
            "guest identity"
        );
        debug!(
            guest = identity.name(),
            host_ip = %host_bridge_ip,
            disk = %disk_image.display(),
            nic = %config.nic_model,
            clock = %config.clock_offset,
            mouse = ?config.mouse,
            bus = config.disk_bus.as_str(),
            dev = config.disk_bus.device(),
            "domain configuration"
        );

        Ok(Self {
            control,
            identity,
            config,
            disk_image,
            bridge: bridge.to_string(),
            host_bridge_ip,
        })
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn identity(&self) -> &GuestIdentity {
        &self.identity
    }

    pub fn disk_image(&self) -> &Path {
        &self.disk_image
    }

    /// Address of the host on the guest's bridge network.
    pub fn host_bridge_ip(&self) -> Ipv4Addr {
        self.host_bridge_ip
    }

    pub fn descriptor(&self, source: &BootSource) -> DomainDescriptor {
        let (input_kind, input_bus) = match self.config.mouse {
            MouseType::Ps2 => ("mouse", "ps2"),
            MouseType::Usb => ("tablet", "usb"),
        };

        let mut disks = vec![Disk {
            kind: "file".to_string(),
            device: "disk".to_string(),
            source: DiskSource {
                file: self.disk_image.display().to_string(),
            },
            target: DiskTarget {
                dev: self.config.disk_bus.device().to_string(),
                bus: Some(self.config.disk_bus.as_str().to_string()),
            },
        }];

        if let Some(medium) = source.medium() {
            disks.push(Disk {
                kind: "file".to_string(),
                device: medium.kind.device().to_string(),
                source: DiskSource {
                    file: medium.path.display().to_string(),
                },
                target: DiskTarget {
                    dev: medium.kind.target().to_string(),
                    bus: None,
                },
            });
        }

        DomainDescriptor {
            hypervisor: "kvm".to_string(),
            name: self.identity.name().to_string(),
            uuid: self.identity.uuid.to_string(),
            memory: Memory::kib(self.config.memory_kib),
            current_memory: Memory::kib(self.config.memory_kib),
            vcpu: self.config.vcpus,
            clock: Clock {
                offset: self.config.clock_offset.clone(),
            },
            features: Features::default(),
            os: Os {
                os_type: "hvm".to_string(),
                boot: Boot {
                    dev: source.boot_device().tag().to_string(),
                },
            },
            on_poweroff: "destroy".to_string(),
            on_reboot: "destroy".to_string(),
            on_crash: "destroy".to_string(),
            devices: Devices {
                console: Console {
                    kind: "pty".to_string(),
                    target: ConsoleTarget { port: 0 },
                },
                graphics: Graphics {
                    kind: "vnc".to_string(),
                    port: -1,
                    autoport: "yes".to_string(),
                },
                interface: Interface {
                    kind: "bridge".to_string(),
                    source: InterfaceSource {
                        bridge: self.bridge.clone(),
                    },
                    mac: MacElement {
                        address: self.identity.mac.to_string(),
                    },
                    model: Model {
                        kind: self.config.nic_model.clone(),
                    },
                },
                input: Input {
                    kind: input_kind.to_string(),
                    bus: input_bus.to_string(),
                },
                disk: disks,
            },
        }
    }

    /// Build the descriptor for `source` and register it, replacing any
    /// existing definition with the same name.
    pub fn define(&self, source: &BootSource) -> Result<DomainDescriptor> {
        info!(
            guest = self.name(),
            boot = %source.boot_device(),
            "defining domain"
        );
        let descriptor = self.descriptor(source);
        let xml = descriptor.to_xml()?;
        debug!(guest = self.name(), xml = %xml, "generated descriptor");

        self.control.define_domain(&xml)?;
        Ok(descriptor)
    }

    /// Remove any previous domain and disk image with this guest's name.
    ///
    /// Nothing here is load-bearing; every failure is logged and ignored.
    pub fn cleanup_old_guest(&self) {
        let name = self.name();
        info!(guest = name, "cleaning up old guest");

        if self
            .control
            .domain_exists(name)
            .best_effort("looking up old domain")
            == Some(true)
        {
            let active = self
                .control
                .domain_state(name)
                .best_effort("querying old domain state")
                .is_some_and(|state| state.is_active());
            if active {
                self.control
                    .destroy_domain(name)
                    .best_effort("stopping old domain");
            }
            self.control
                .undefine_domain(name)
                .best_effort("undefining old domain");
        }

        if self.disk_image.exists() {
            fs::remove_file(&self.disk_image).best_effort("removing stale disk image");
        }
    }
}
