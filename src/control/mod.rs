//! Hypervisor control-plane capability.
//!
//! Components never talk to libvirt directly; they get a `&dyn ControlPlane`
//! so the install logic can be driven against a fake in tests.

pub mod virsh;

use std::fmt;

use crate::error::Result;

pub use virsh::VirshControlPlane;

/// Run state of a domain as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    ShutOff,
    Crashed,
    Suspended,
}

impl DomainState {
    /// Whether the guest is still executing (the installer has not finished).
    pub fn is_active(&self) -> bool {
        matches!(self, DomainState::Running | DomainState::Blocked)
    }

    /// Parse `virsh domstate` output.
    pub fn from_virsh(s: &str) -> Self {
        match s.trim() {
            "running" => DomainState::Running,
            "idle" | "blocked" => DomainState::Blocked,
            "paused" => DomainState::Paused,
            "in shutdown" => DomainState::ShuttingDown,
            "shut off" => DomainState::ShutOff,
            "crashed" => DomainState::Crashed,
            "pmsuspended" => DomainState::Suspended,
            _ => DomainState::NoState,
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainState::NoState => "no state",
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::ShuttingDown => "shutting down",
            DomainState::ShutOff => "shut off",
            DomainState::Crashed => "crashed",
            DomainState::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Operations the installer needs from the hypervisor control plane.
///
/// Descriptors cross this boundary as XML documents, the same form the
/// control plane stores them in.
pub trait ControlPlane {
    /// Names of active virtual networks.
    fn networks(&self) -> Result<Vec<String>>;

    fn network_descriptor(&self, network: &str) -> Result<String>;

    /// Define or redefine a domain. An existing domain with the same name is
    /// updated in place.
    fn define_domain(&self, descriptor_xml: &str) -> Result<()>;

    fn domain_exists(&self, name: &str) -> Result<bool>;

    fn start_domain(&self, name: &str) -> Result<()>;

    /// Hard power-off.
    fn destroy_domain(&self, name: &str) -> Result<()>;

    fn undefine_domain(&self, name: &str) -> Result<()>;

    fn domain_state(&self, name: &str) -> Result<DomainState>;

    /// Live descriptor, including runtime values such as the VNC port.
    fn domain_descriptor(&self, name: &str) -> Result<String>;

    /// Names of every active domain: running, paused, blocked or shutting
    /// down. All of them hold their disks open.
    fn running_domains(&self) -> Result<Vec<String>>;
}
