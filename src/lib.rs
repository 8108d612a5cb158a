//! Unattended operating system installs into libvirt virtual machines.
//!
//! An install runs in phases, each owned by one module:
//!
//! - **Media** ([`media`]) - fetch the original ISO or floppy, unpack it for
//!   customization, repack the boot medium
//! - **Domain definition** ([`domain`]) - describe the VM and register it
//!   with the control plane, once with the medium attached and once without
//! - **Install lifecycle** ([`install`]) - boot the installer and poll until
//!   the guest powers itself off, capturing a screenshot on timeout
//! - **Boot handshake** ([`network`]) - wait for the installed guest to
//!   connect back through a temporarily opened firewall port
//! - **Inspection** ([`inspect`]) - mount the finished disk offline and
//!   produce a package manifest
//!
//! # Architecture
//!
//! ```text
//! MediaFetcher ──▶ InstallMedia (OpticalMedia | FloppyMedia)
//!                        │ install medium
//!                        ▼
//! DomainBuilder ──▶ InstallController ──▶ GuestNetworkWaiter
//!      │                 │ timeout                 │
//!      │                 └──▶ DiagnosticCapture    └──▶ Firewall
//!      ▼
//! ControlPlane (virsh)        GuestDiskInspector ──▶ IntrospectionBackend (guestfish)
//! ```
//!
//! Every host-facing collaborator sits behind a trait ([`ControlPlane`],
//! [`Firewall`], [`IntrospectionBackend`], [`DiagnosticCapture`]) so the
//! orchestration logic runs against in-memory fakes in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use guest_installer::{Config, DomainBuilder, GuestIdentity, VirshControlPlane};
//!
//! let config = Config::default();
//! let control = VirshControlPlane::system();
//! let identity = GuestIdentity::generate("fedora", "14", "x86_64".parse()?,
//!     config.mac_prefix()?, &mut rand::rng());
//! let paths = config.guest_paths(identity.name());
//! let builder = DomainBuilder::new(&control, identity, config.domain_config()?,
//!     &paths.disk_image, &config.network.bridge)?;
//! builder.cleanup_old_guest();
//! ```

pub mod cancel;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod disk;
pub mod domain;
pub mod error;
pub mod guest;
pub mod inspect;
pub mod install;
pub mod media;
pub mod network;
pub mod preflight;
pub mod process;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use config::Config;
pub use control::{ControlPlane, DomainState, VirshControlPlane};
pub use diagnostics::{DiagnosticCapture, VncScreenshot};
pub use domain::{BootSource, DomainBuilder, InstallMedium, MediumKind};
pub use error::{Error, Result};
pub use guest::{Arch, DomainConfig, GuestIdentity, GuestPaths};
pub use inspect::{DiskInspectionHandle, GuestDiskInspector, GuestfishBackend, IntrospectionBackend};
pub use install::{InstallController, InstallReport, InstallSettings};
pub use media::{FloppyMedia, InstallMedia, MediaFetcher, OpticalMedia};
pub use network::firewall::Firewall;
pub use network::{GuestNetworkWaiter, Iptables};
