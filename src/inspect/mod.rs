//! Offline inspection of an installed guest's disk image.
//!
//! A [`DiskInspectionHandle`] owns one introspection session with the guest's
//! filesystems mounted at their usual places. Opening is refused while any
//! running domain has the disk attached; mounting a live disk a second time
//! corrupts it.

pub mod guestfish;
pub mod manifest;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::control::ControlPlane;
use crate::domain::DomainView;
use crate::error::{Error, Result};

pub use guestfish::GuestfishBackend;
pub use manifest::package_manifest;

/// One guest introspection session.
pub trait GuestFs {
    fn add_drive(&mut self, disk: &Path) -> Result<()>;
    fn launch(&mut self) -> Result<()>;
    /// Root devices of the operating systems found on the attached drives.
    fn inspect_os(&mut self) -> Result<Vec<String>>;
    /// `(mountpoint, device)` pairs for the OS rooted at `root`.
    fn mountpoints(&mut self, root: &str) -> Result<Vec<(String, String)>>;
    fn mount(&mut self, device: &str, mountpoint: &str) -> Result<()>;
    /// Run `command` inside the guest and return its output lines.
    fn command_lines(&mut self, command: &str) -> Result<Vec<String>>;
    fn sync(&mut self) -> Result<()>;
    fn umount_all(&mut self) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
}

pub trait IntrospectionBackend {
    fn open_session(&self) -> Result<Box<dyn GuestFs>>;
}

pub struct GuestDiskInspector<'a> {
    control: &'a dyn ControlPlane,
    backend: &'a dyn IntrospectionBackend,
}

impl<'a> GuestDiskInspector<'a> {
    pub fn new(control: &'a dyn ControlPlane, backend: &'a dyn IntrospectionBackend) -> Self {
        Self { control, backend }
    }

    /// Attach `disk`, find the installed OS and mount its filesystems.
    ///
    /// `disk` is resolved to its canonical path first, so a missing image is
    /// an I/O error and aliases of a live disk are still refused.
    pub fn open(&self, disk: &Path) -> Result<DiskInspectionHandle> {
        let disk = fs::canonicalize(disk)?;
        self.ensure_not_running(&disk)?;

        info!(disk = %disk.display(), "setting up inspection handle");
        let mut handle = DiskInspectionHandle {
            session: self.backend.open_session()?,
            disk,
            closed: false,
        };
        // On failure the handle is dropped here, which tears the session down.
        handle.attach()?;
        Ok(handle)
    }

    // `disk` is canonical; sources that cannot be resolved are compared as given.
    fn ensure_not_running(&self, disk: &Path) -> Result<()> {
        for name in self.control.running_domains()? {
            let view = DomainView::parse(&self.control.domain_descriptor(&name)?)?;
            let same_disk = |source: &str| {
                fs::canonicalize(source).unwrap_or_else(|_| PathBuf::from(source)) == disk
            };
            if view.disk_sources().any(same_disk) {
                return Err(Error::Conflict {
                    disk: disk.to_path_buf(),
                    domain: name,
                });
            }
        }
        Ok(())
    }
}

/// Live introspection session over one disk image. Torn down on
/// [`close`](Self::close) or drop.
pub struct DiskInspectionHandle {
    session: Box<dyn GuestFs>,
    disk: PathBuf,
    closed: bool,
}

impl std::fmt::Debug for DiskInspectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskInspectionHandle")
            .field("disk", &self.disk)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DiskInspectionHandle {
    fn attach(&mut self) -> Result<()> {
        debug!(disk = %self.disk.display(), "adding drive");
        self.session.add_drive(&self.disk)?;
        self.session.launch()?;

        let roots = self.session.inspect_os()?;
        let Some(root) = roots.first() else {
            return Err(Error::Inspection(format!(
                "no operating system found on {}",
                self.disk.display()
            )));
        };
        if roots.len() > 1 {
            warn!(root = %root, count = roots.len(), "multiple operating systems found, using the first");
        }

        let mountpoints = self.session.mountpoints(root)?;
        let Some((_, root_device)) = mountpoints.iter().find(|(mp, _)| mp == "/") else {
            return Err(Error::Inspection(format!(
                "{root} has no root filesystem"
            )));
        };

        debug!(device = %root_device, "mounting /");
        self.session.mount(root_device, "/")?;
        for (mountpoint, device) in mountpoints.iter().filter(|(mp, _)| mp != "/") {
            debug!(device = %device, mountpoint = %mountpoint, "mounting");
            self.session.mount(device, mountpoint)?;
        }
        Ok(())
    }

    pub fn disk(&self) -> &Path {
        &self.disk
    }

    /// Run `command` inside the mounted guest.
    pub fn command_lines(&mut self, command: &str) -> Result<Vec<String>> {
        self.session.command_lines(command)
    }

    /// Package manifest document built from the output of `query`, one
    /// package per line (for example `rpm -qa`).
    pub fn package_manifest(&mut self, query: &str) -> Result<String> {
        let lines = self.command_lines(query)?;
        package_manifest(lines.as_slice())
    }

    /// Sync, unmount and shut the session down, returning the first failure.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    // Every step runs even if an earlier one failed.
    fn teardown(&mut self) -> Result<()> {
        self.closed = true;
        info!(disk = %self.disk.display(), "cleaning up inspection handle");

        let sync = self.session.sync();
        let umount = self.session.umount_all();
        let shutdown = self.session.shutdown();

        for (step, result) in [("sync", &sync), ("umount-all", &umount), ("shutdown", &shutdown)] {
            if let Err(e) = result {
                warn!(step, error = %e, "inspection teardown step failed");
            }
        }
        sync.and(umount).and(shutdown)
    }
}

impl Drop for DiskInspectionHandle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.teardown();
        }
    }
}
