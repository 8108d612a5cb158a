//! Unpacking and repacking install media.

use std::fs;
use std::path::Path;

use tracing::{error, info};

use super::filesystem::{atomic_move, copy_tree, remove_tree};
use crate::error::{BestEffort, Error, Result};
use crate::process::Cmd;

/// El Torito boot image, relative to the ISO root.
pub const ISOLINUX_BIN: &str = "isolinux/isolinux.bin";
/// El Torito boot catalog, relative to the ISO root.
pub const ISOLINUX_CATALOG: &str = "isolinux/boot.cat";

/// Host programs used to unpack and rebuild media.
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub mount: String,
    pub unmount: String,
    pub mkisofs: String,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            mount: "fuseiso".to_string(),
            unmount: "fusermount".to_string(),
            mkisofs: "xorriso".to_string(),
        }
    }
}

impl MediaTools {
    /// Copy the contents of `original` (an ISO image) into `scratch`.
    ///
    /// The image is mounted read-only through FUSE at `mountpoint` for the
    /// duration of the copy. Unmount failures are logged and ignored; a copy
    /// failure is returned after the unmount has been attempted.
    pub fn remaster_iso(&self, original: &Path, mountpoint: &Path, scratch: &Path) -> Result<()> {
        info!(iso = %original.display(), "copying ISO contents for modification");

        if mountpoint.exists() {
            fs::remove_dir(mountpoint)?;
        }
        fs::create_dir_all(mountpoint)?;
        remove_tree(scratch)?;

        let mounted = Cmd::new(&self.mount)
            .arg_path(original)
            .arg_path(mountpoint)
            .error_msg("failed to mount ISO")
            .run();
        if let Err(e) = mounted {
            fs::remove_dir(mountpoint).best_effort("removing ISO mountpoint");
            return Err(e);
        }

        let copied = copy_tree(mountpoint, scratch);

        if let Err(e) = Cmd::new(&self.unmount).arg("-u").arg_path(mountpoint).run() {
            error!(error = %e, "failed to unmount ISO; continuing anyway");
        }
        fs::remove_dir(mountpoint).best_effort("removing ISO mountpoint");

        copied
    }

    fn build_iso_cmd(&self, scratch: &Path, output: &Path, label: &str) -> Cmd {
        Cmd::new(&self.mkisofs)
            .args(["-as", "mkisofs", "-o"])
            .arg_path(output)
            .args(["-V", label])
            .args(["-J", "-R", "-l"])
            .args(["-b", ISOLINUX_BIN, "-c", ISOLINUX_CATALOG])
            .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
            .arg_path(scratch)
    }

    /// Build a BIOS-bootable (isolinux) ISO from `scratch` at `output`.
    ///
    /// The image is written next to `output` first and moved into place once
    /// complete, so a failed build never leaves a truncated ISO behind.
    pub fn build_iso(&self, scratch: &Path, output: &Path, label: &str) -> Result<()> {
        if !scratch.join(ISOLINUX_BIN).is_file() {
            return Err(Error::media(
                scratch,
                format!("boot image {ISOLINUX_BIN} is missing"),
            ));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = output.with_extension("iso.tmp");
        info!(output = %output.display(), label, "building install ISO");
        let built = self
            .build_iso_cmd(scratch, &staging, label)
            .error_msg("xorriso failed to build the install ISO")
            .run();
        if let Err(e) = built {
            fs::remove_file(&staging).best_effort("removing partial ISO");
            return Err(e);
        }

        atomic_move(&staging, output)
    }
}

/// Byte-for-byte copy of the original floppy image.
pub fn remaster_floppy(original: &Path, output: &Path) -> Result<()> {
    info!(floppy = %original.display(), "copying floppy contents for modification");
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(original, output)?;
    Ok(())
}
